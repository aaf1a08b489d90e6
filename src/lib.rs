#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

//! # Mosaic Remover
//!
//! Detects pixelated (mosaic) regions in an image and reconstructs them with a
//! pretrained inpainting model run through ONNX Runtime or Tract.
//!
//! ## Features
//!
//! - **Heuristic detection**: Canny edges and outer contours, with a centred
//!   fallback region when nothing qualifies
//! - **Multiple Backends**: ONNX Runtime (CUDA, `CoreML`, CPU) and Tract (pure Rust)
//! - **Model Management**: models are fetched once from `HuggingFace` into a
//!   per-user cache
//! - **HTTP service**: mosaic removal, a blur-only upload flow and a health check
//!   (enable with the `server` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mosaic_remover::{ModelConfig, ModelHandle, MosaicRemovalProcessor, ProcessorConfig};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let model = Arc::new(ModelHandle::from_config(ModelConfig::default()));
//! let processor = MosaicRemovalProcessor::new(
//!     ProcessorConfig { output_dir: "processed_files".into(), detector: Default::default() },
//!     model,
//! );
//! let output = processor.remove_mosaic_from_image(Path::new("input.jpg")).await?;
//! println!("Saved {}", output.display());
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract` (default): Pure Rust backend
//! - `server` (default): HTTP service and command-line interface
//! - `tracing-json`: JSON log output

pub mod backends;
pub mod cache;
#[cfg(feature = "server")]
pub mod cli;
pub mod config;
pub mod detector;
pub mod download;
pub mod error;
pub mod inference;
pub mod model;
pub mod processor;
#[cfg(feature = "server")]
pub mod server;
pub mod services;
pub mod tracing_config;
pub mod utils;

pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use config::{
    BackendType, ComputeDevice, DetectorConfig, DeviceConfig, ExecutionProvider, ModelConfig,
    ModelSource, ModelSpec, Precision, ServiceConfig, ServiceConfigBuilder,
};
pub use detector::{DetectionResult, MaskRegion, MosaicDetector};
pub use download::{parse_repo, validate_repo, ModelDownloader};
pub use error::{MosaicError, Result};
pub use inference::{BackendFactory, DefaultBackendFactory, InpaintingBackend};
pub use model::ModelHandle;
pub use processor::{MosaicRemovalProcessor, ProcessorConfig};
pub use services::ImageIOService;
