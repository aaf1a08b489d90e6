//! Configuration types for mosaic removal
//!
//! All knobs live here: the detector thresholds, the model source and prompt,
//! the requested execution provider, and the HTTP service layout. Device and
//! precision are resolved once at startup into a [`DeviceConfig`] and handed to
//! the backend, so nothing downstream re-detects hardware per request.

use crate::error::{MosaicError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Fixed prompt describing the restoration style handed to the inpainting model
pub const DEFAULT_PROMPT: &str = "photorealistic, 4k, high-resolution, professional photo";

/// Default model hub repository
pub const DEFAULT_MODEL_REPO: &str = "Carve/LaMa-ONNX";

/// Default full-precision model file inside [`DEFAULT_MODEL_REPO`]
pub const DEFAULT_MODEL_FILE: &str = "lama_fp32.onnx";

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl std::str::FromStr for ExecutionProvider {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(MosaicError::invalid_config(format!(
                "Unknown execution provider '{other}' (expected auto, cpu, cuda or coreml)"
            ))),
        }
    }
}

/// Backend type enumeration for runtime selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    #[default]
    Onnx,
    /// Tract backend (pure Rust, CPU only)
    Tract,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

/// Compute device a model session is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputeDevice {
    Cpu,
    Cuda,
    CoreMl,
}

impl ComputeDevice {
    /// Whether this device is a hardware accelerator
    #[must_use]
    pub fn is_accelerator(self) -> bool {
        !matches!(self, Self::Cpu)
    }
}

impl std::fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Numeric precision of the model weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    Fp16,
    Fp32,
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fp16 => write!(f, "fp16"),
            Self::Fp32 => write!(f, "fp32"),
        }
    }
}

/// Device and precision decided once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device: ComputeDevice,
    pub precision: Precision,
}

impl DeviceConfig {
    /// Reduced precision on accelerators, full precision on the CPU
    #[must_use]
    pub fn for_device(device: ComputeDevice) -> Self {
        let precision = if device.is_accelerator() {
            Precision::Fp16
        } else {
            Precision::Fp32
        };
        Self { device, precision }
    }

    /// CPU with full precision
    #[must_use]
    pub fn cpu() -> Self {
        Self::for_device(ComputeDevice::Cpu)
    }

    /// Resolve the requested provider against the runtime's actual capabilities
    #[must_use]
    pub fn resolve(provider: ExecutionProvider, backend: BackendType) -> Self {
        Self::resolve_with(provider, backend, crate::backends::accelerator_available)
    }

    /// Resolve using a caller-supplied availability probe
    ///
    /// `Auto` prefers CUDA, then `CoreML`, then CPU. An explicitly requested
    /// accelerator that is not available falls back to CPU. Tract only runs on
    /// the CPU.
    pub fn resolve_with<F>(provider: ExecutionProvider, backend: BackendType, available: F) -> Self
    where
        F: Fn(ComputeDevice) -> bool,
    {
        if backend == BackendType::Tract {
            if provider != ExecutionProvider::Auto && provider != ExecutionProvider::Cpu {
                log::warn!("Tract backend only supports CPU, ignoring provider '{provider}'");
            }
            return Self::cpu();
        }

        let device = match provider {
            ExecutionProvider::Auto => [ComputeDevice::Cuda, ComputeDevice::CoreMl]
                .into_iter()
                .find(|device| available(*device))
                .unwrap_or(ComputeDevice::Cpu),
            ExecutionProvider::Cpu => ComputeDevice::Cpu,
            ExecutionProvider::Cuda => {
                if available(ComputeDevice::Cuda) {
                    ComputeDevice::Cuda
                } else {
                    log::warn!("CUDA requested but not available, falling back to CPU");
                    ComputeDevice::Cpu
                }
            },
            ExecutionProvider::CoreMl => {
                if available(ComputeDevice::CoreMl) {
                    ComputeDevice::CoreMl
                } else {
                    log::warn!("CoreML requested but not available, falling back to CPU");
                    ComputeDevice::Cpu
                }
            },
        };

        Self::for_device(device)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::cpu()
    }
}

/// Where the inpainting model comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSource {
    /// Repository on the Hugging Face hub, downloaded into the model cache
    HuggingFace { repo: String },
    /// ONNX file on local disk
    Local(PathBuf),
}

impl ModelSource {
    /// Parse a CLI model argument: an existing path or anything ending in
    /// `.onnx` is local, everything else is treated as a hub repository.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let path = PathBuf::from(value);
        if path.exists()
            || path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"))
        {
            Self::Local(path)
        } else {
            Self::HuggingFace {
                repo: value.trim_start_matches("https://huggingface.co/").to_string(),
            }
        }
    }

    /// Get display name for the model source
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            Self::HuggingFace { repo } => format!("hf:{repo}"),
            Self::Local(path) => format!("local:{}", path.display()),
        }
    }
}

/// Model source plus the files and geometry it provides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    /// Full precision ONNX file within the repository
    pub fp32_file: String,
    /// Reduced precision ONNX file, if the repository ships one
    pub fp16_file: Option<String>,
    /// Expected SHA-256 of the fp32 file, checked after download
    pub fp32_sha256: Option<String>,
    /// Square input resolution the graph expects
    pub input_size: u32,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            source: ModelSource::HuggingFace {
                repo: DEFAULT_MODEL_REPO.to_string(),
            },
            fp32_file: DEFAULT_MODEL_FILE.to_string(),
            fp16_file: None,
            fp32_sha256: None,
            input_size: 512,
        }
    }
}

impl ModelSpec {
    /// Pick the file for a precision, falling back to fp32 when no fp16 file exists
    #[must_use]
    pub fn file_for(&self, precision: Precision) -> &str {
        match (precision, &self.fp16_file) {
            (Precision::Fp16, Some(file)) => file,
            (Precision::Fp16, None) => {
                log::warn!(
                    "No fp16 variant for {}, using {}",
                    self.source.display_name(),
                    self.fp32_file
                );
                &self.fp32_file
            },
            (Precision::Fp32, _) => &self.fp32_file,
        }
    }
}

/// Configuration for the inpainting model adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub spec: ModelSpec,
    pub backend: BackendType,
    pub execution_provider: ExecutionProvider,
    /// Text prompt handed to the backend
    pub prompt: String,
    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,
    /// Custom model cache directory (None = per-user cache)
    pub cache_dir: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            spec: ModelSpec::default(),
            backend: BackendType::default(),
            execution_provider: ExecutionProvider::default(),
            prompt: DEFAULT_PROMPT.to_string(),
            intra_threads: 0,
            cache_dir: None,
        }
    }
}

impl ModelConfig {
    /// Validate model parameters
    ///
    /// # Errors
    /// - Empty prompt
    /// - Zero input size
    /// - Empty model file name
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(MosaicError::invalid_config("Prompt cannot be empty"));
        }
        if self.spec.input_size == 0 {
            return Err(MosaicError::config_value_error(
                "model input size",
                self.spec.input_size,
                "1-4096",
            ));
        }
        if self.spec.input_size > 4096 {
            return Err(MosaicError::config_value_error(
                "model input size",
                self.spec.input_size,
                "1-4096",
            ));
        }
        if let ModelSource::HuggingFace { repo } = &self.spec.source {
            if self.spec.fp32_file.is_empty() {
                return Err(MosaicError::invalid_config(format!(
                    "No model file configured for repository '{repo}'"
                )));
            }
        }
        Ok(())
    }
}

/// Thresholds for the heuristic mosaic detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Canny low hysteresis threshold, on the L1 3x3 Sobel magnitude
    pub canny_low: f32,
    /// Canny high hysteresis threshold, on the L1 3x3 Sobel magnitude
    pub canny_high: f32,
    /// Contours must enclose strictly more than this many square pixels
    pub min_contour_area: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            canny_low: 50.0,
            canny_high: 150.0,
            min_contour_area: 1000.0,
        }
    }
}

impl DetectorConfig {
    /// # Errors
    /// - Negative or inverted Canny thresholds
    pub fn validate(&self) -> Result<()> {
        if self.canny_low < 0.0 || self.canny_high < self.canny_low {
            return Err(MosaicError::invalid_config(format!(
                "Canny thresholds must satisfy 0 <= low <= high (got {} / {})",
                self.canny_low, self.canny_high
            )));
        }
        if self.min_contour_area < 0.0 {
            return Err(MosaicError::config_value_error(
                "minimum contour area",
                self.min_contour_area,
                ">= 0",
            ));
        }
        Ok(())
    }
}

/// Complete configuration for the mosaic removal service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// Root for per-request upload directories
    pub temp_dir: PathBuf,
    /// Destination of `processed_<name>` results
    pub output_dir: PathBuf,
    /// Maximum accepted request body in bytes
    pub max_upload_bytes: usize,
    /// Load the model before accepting requests
    pub preload_model: bool,
    pub model: ModelConfig,
    pub detector: DetectorConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            temp_dir: PathBuf::from("temp_files"),
            output_dir: PathBuf::from("processed_files"),
            max_upload_bytes: 20 * 1024 * 1024,
            preload_model: false,
            model: ModelConfig::default(),
            detector: DetectorConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use mosaic_remover::{ServiceConfig, ExecutionProvider};
    ///
    /// let config = ServiceConfig::builder()
    ///     .port(9000)
    ///     .execution_provider(ExecutionProvider::Cpu)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.port, 9000);
    /// ```
    #[must_use]
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Socket address string for binding
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Port 0, empty host, zero upload limit
    /// - Invalid model or detector configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(MosaicError::config_value_error("port", self.port, "1-65535"));
        }
        if self.host.trim().is_empty() {
            return Err(MosaicError::invalid_config("Host cannot be empty"));
        }
        if self.max_upload_bytes == 0 {
            return Err(MosaicError::config_value_error(
                "upload limit",
                self.max_upload_bytes,
                "> 0",
            ));
        }
        if self.temp_dir == self.output_dir {
            return Err(MosaicError::invalid_config(
                "Temp and output directories must differ",
            ));
        }
        self.model.validate()?;
        self.detector.validate()
    }
}

/// Builder for `ServiceConfig`
#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    #[must_use]
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.config.host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    #[must_use]
    pub fn temp_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.temp_dir = dir.into();
        self
    }

    #[must_use]
    pub fn output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    #[must_use]
    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    #[must_use]
    pub fn preload_model(mut self, preload: bool) -> Self {
        self.config.preload_model = preload;
        self
    }

    #[must_use]
    pub fn model_source(mut self, source: ModelSource) -> Self {
        self.config.model.spec.source = source;
        self
    }

    #[must_use]
    pub fn model_spec(mut self, spec: ModelSpec) -> Self {
        self.config.model.spec = spec;
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: BackendType) -> Self {
        self.config.model.backend = backend;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.model.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.config.model.prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.model.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.model.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn detector(mut self, detector: DetectorConfig) -> Self {
        self.config.detector = detector;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any validation failure from [`ServiceConfig::validate`]
    pub fn build(self) -> Result<ServiceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
