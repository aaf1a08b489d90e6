//! Mosaic remover CLI
//!
//! Runs the HTTP service or the removal pipeline on a single file.

use crate::{
    cache::{format_size, ModelCache},
    config::{BackendType, DeviceConfig, ExecutionProvider, ModelSource, ServiceConfig},
    detector::MosaicDetector,
    download::ModelDownloader,
    model::ModelHandle,
    processor::{MosaicRemovalProcessor, ProcessorConfig},
    services::ImageIOService,
    tracing_config::{TracingConfig, TracingFormat},
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use image::DynamicImage;
use std::path::PathBuf;
use std::sync::Arc;

/// Mosaic detection and inpainting service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "mosaic-remover")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Hub repository (owner/name) or path to a local .onnx file
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Inference backend
    #[arg(short, long, global = true, value_enum, default_value_t = CliBackend::Onnx)]
    pub backend: CliBackend,

    /// Execution provider (auto, cpu, cuda, coreml)
    #[arg(short, long, global = true, default_value = "auto")]
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads (0 = auto-detect)
    #[arg(short, long, global = true, default_value_t = 0)]
    pub threads: usize,

    /// Text prompt handed to the inpainting model
    #[arg(long, global = true)]
    pub prompt: Option<String>,

    /// Model cache directory [default: per-user cache]
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format (console, compact, json)
    #[arg(long, global = true, default_value = "console")]
    pub log_format: TracingFormat,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP service
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8000)]
        port: u16,
        /// Root for per-request upload directories
        #[arg(long, default_value = "temp_files")]
        temp_dir: PathBuf,
        /// Directory processed images are written to
        #[arg(long, default_value = "processed_files")]
        output_dir: PathBuf,
        /// Maximum request body size in MiB
        #[arg(long, default_value_t = 20)]
        max_upload_mb: usize,
        /// Load the model before accepting requests; exit if that fails
        #[arg(long)]
        preload: bool,
    },
    /// Remove the mosaic from one image
    Process {
        input: PathBuf,
        #[arg(short, long, default_value = "processed_files")]
        output_dir: PathBuf,
    },
    /// Write the detector's mask for an image as PNG
    DetectMask { input: PathBuf, output: PathBuf },
    /// Fetch the configured model into the cache
    Download,
    /// List cached models
    Cache {
        /// Remove the configured model from the cache
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliBackend {
    Onnx,
    Tract,
}

impl From<CliBackend> for BackendType {
    fn from(backend: CliBackend) -> Self {
        match backend {
            CliBackend::Onnx => Self::Onnx,
            CliBackend::Tract => Self::Tract,
        }
    }
}

impl Cli {
    /// Service configuration from the global flags plus `serve` options
    ///
    /// # Errors
    /// - Invalid resulting configuration
    pub fn service_config(&self) -> Result<ServiceConfig> {
        let mut builder = ServiceConfig::builder()
            .backend(self.backend.into())
            .execution_provider(self.execution_provider)
            .intra_threads(self.threads);

        if let Some(model) = &self.model {
            builder = builder.model_source(ModelSource::parse(model));
        }
        if let Some(prompt) = &self.prompt {
            builder = builder.prompt(prompt.clone());
        }
        if let Some(cache_dir) = &self.cache_dir {
            builder = builder.cache_dir(cache_dir.clone());
        }

        match &self.command {
            Command::Serve {
                host,
                port,
                temp_dir,
                output_dir,
                max_upload_mb,
                preload,
            } => {
                builder = builder
                    .host(host.clone())
                    .port(*port)
                    .temp_dir(temp_dir.clone())
                    .output_dir(output_dir.clone())
                    .max_upload_bytes(max_upload_mb.saturating_mul(1024 * 1024))
                    .preload_model(*preload);
            },
            Command::Process { output_dir, .. } => {
                builder = builder.output_dir(output_dir.clone());
            },
            Command::DetectMask { .. } | Command::Download | Command::Cache { .. } => {},
        }

        builder.build().context("Invalid configuration")
    }
}

/// CLI entry point
pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut tracing_config = TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(cli.log_format)
        .with_session_id(uuid::Uuid::new_v4().to_string());
    if let Ok(filter) = std::env::var("RUST_LOG") {
        tracing_config = tracing_config.with_env_filter(filter);
    }
    tracing_config.init()?;

    let config = cli.service_config()?;

    match &cli.command {
        Command::Serve { .. } => {
            let model = Arc::new(ModelHandle::from_config(config.model.clone()));
            crate::server::serve(config, model)
                .await
                .context("Service failed")?;
        },
        Command::Process { input, .. } => {
            if !ImageIOService::is_supported_format(input) {
                tracing::warn!("{} has no recognised image extension, decoding by content", input.display());
            }
            let model = Arc::new(ModelHandle::from_config(config.model.clone()));
            let processor = MosaicRemovalProcessor::new(ProcessorConfig::from(&config), model);
            let output = processor
                .remove_mosaic_from_image(input)
                .await
                .with_context(|| format!("Failed to process {}", input.display()))?;
            println!("{}", output.display());
        },
        Command::DetectMask { input, output } => {
            let image = ImageIOService::load_image(input)
                .with_context(|| format!("Failed to load {}", input.display()))?;
            let detection = MosaicDetector::new(config.detector).detect(&image);
            tracing::info!(
                regions = detection.regions.len(),
                fallback = detection.used_fallback,
                "Mask computed"
            );
            ImageIOService::save_image(&DynamicImage::ImageLuma8(detection.mask), output)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("{}", output.display());
        },
        Command::Download => download_model(&config).await?,
        Command::Cache { clear } => manage_cache(&config, *clear)?,
    }

    Ok(())
}

fn manage_cache(config: &ServiceConfig, clear: bool) -> Result<()> {
    let cache = ModelCache::from_option(config.model.cache_dir.as_deref())?;

    if clear {
        match &config.model.spec.source {
            ModelSource::HuggingFace { repo } => {
                if cache.clear_specific_model(repo)? {
                    println!("Removed {repo} from {}", cache.cache_dir().display());
                } else {
                    println!("{repo} is not cached");
                }
            },
            ModelSource::Local(path) => {
                anyhow::bail!("{} is a local model, nothing to clear", path.display());
            },
        }
        return Ok(());
    }

    let models = cache.scan_cached_models()?;
    if models.is_empty() {
        println!("No cached models in {}", cache.cache_dir().display());
    }
    for model in models {
        println!(
            "{:<40} {:>10}  {}",
            model.model_id,
            format_size(model.size_bytes),
            model.files.join(", ")
        );
    }
    Ok(())
}

async fn download_model(config: &ServiceConfig) -> Result<()> {
    let spec = &config.model.spec;
    match &spec.source {
        ModelSource::Local(path) => {
            tracing::info!("Local model {}, nothing to download", path.display());
        },
        ModelSource::HuggingFace { repo } => {
            let device = DeviceConfig::resolve(config.model.execution_provider, config.model.backend);
            let file = spec.file_for(device.precision);
            let checksum = if file == spec.fp32_file {
                spec.fp32_sha256.as_deref()
            } else {
                None
            };

            let cache = ModelCache::from_option(config.model.cache_dir.as_deref())?;
            let path = ModelDownloader::new(cache)?
                .ensure_file(repo, file, checksum)
                .await
                .with_context(|| format!("Failed to download {file} from {repo}"))?;
            println!("{}", path.display());
        },
    }
    Ok(())
}
