//! Inference backend abstraction
//!
//! Backends see tensors only. Resizing, normalization and compositing back
//! onto the source image live in [`crate::utils::preprocessing`].

use crate::config::{BackendType, DeviceConfig, ModelConfig};
use crate::error::Result;
use ndarray::Array4;
use std::path::Path;
use std::time::Duration;

/// Trait for inpainting inference backends
pub trait InpaintingBackend: Send {
    /// Initialize the backend from an ONNX model file
    ///
    /// Returns the load time on first initialization and `None` when the
    /// backend was already initialized.
    ///
    /// # Errors
    /// - Model file missing or unreadable
    /// - Runtime session creation failures
    fn initialize(
        &mut self,
        model_path: &Path,
        device: DeviceConfig,
        config: &ModelConfig,
    ) -> Result<Option<Duration>>;

    /// Run inpainting on NCHW tensors
    ///
    /// `image` is `[1, 3, H, W]` in `[0, 1]`, `mask` is `[1, 1, H, W]` in `{0, 1}`.
    /// Graphs that are not text-conditioned ignore `prompt`.
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Runtime inference failures or unexpected output shapes
    fn infer(&mut self, image: &Array4<f32>, mask: &Array4<f32>, prompt: &str)
        -> Result<Array4<f32>>;

    /// Square input resolution the backend feeds the graph
    fn input_size(&self) -> u32;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;
}

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create an uninitialized backend of the given type
    ///
    /// # Errors
    /// - Backend type not compiled into this build
    fn create_backend(
        &self,
        backend_type: BackendType,
        config: &ModelConfig,
    ) -> Result<Box<dyn InpaintingBackend>>;

    /// List available backend types
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Factory for the backends enabled by crate features
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    #[allow(unused_variables)]
    fn create_backend(
        &self,
        backend_type: BackendType,
        config: &ModelConfig,
    ) -> Result<Box<dyn InpaintingBackend>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::new(
                config.spec.input_size,
            ))),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(crate::backends::TractBackend::new(
                config.spec.input_size,
            ))),
            #[allow(unreachable_patterns)]
            other => Err(crate::error::MosaicError::invalid_config(format!(
                "Backend '{other}' is not enabled in this build"
            ))),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        backends
    }
}
