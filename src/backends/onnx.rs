//! ONNX Runtime backend for inpainting models
//!
//! The session is bound to the device picked at startup. Inputs are fed
//! positionally (image first, mask second) so graphs with different tensor
//! names work unchanged.

use crate::config::{ComputeDevice, DeviceConfig, ModelConfig};
use crate::error::{MosaicError, Result};
use crate::inference::InpaintingBackend;
use ndarray::{Array4, Ix4};
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::path::Path;
use std::time::{Duration, Instant};

/// ONNX Runtime backend for running inpainting models
#[derive(Debug)]
pub struct OnnxBackend {
    session: Option<Session>,
    input_size: u32,
    initialized: bool,
}

impl OnnxBackend {
    /// Create an uninitialized backend feeding the graph at `input_size`
    #[must_use]
    pub fn new(input_size: u32) -> Self {
        Self {
            session: None,
            input_size,
            initialized: false,
        }
    }

    /// Check whether ONNX Runtime can use an execution provider for `device`
    #[must_use]
    pub fn provider_available(device: ComputeDevice) -> bool {
        let available = match device {
            ComputeDevice::Cpu => Ok(true),
            ComputeDevice::Cuda => {
                OrtExecutionProvider::is_available(&CUDAExecutionProvider::default())
            },
            ComputeDevice::CoreMl => {
                OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
            },
        };
        let available = available.unwrap_or(false);
        log::debug!("Execution provider {device} available: {available}");
        available
    }

    fn load_model(
        &mut self,
        model_path: &Path,
        device: DeviceConfig,
        config: &ModelConfig,
    ) -> Result<Duration> {
        let model_load_start = Instant::now();

        let mut session_builder = Session::builder()
            .map_err(|e| MosaicError::inference(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                MosaicError::inference(format!("Failed to set optimization level: {e}"))
            })?;

        session_builder = match device.device {
            ComputeDevice::Cpu => {
                log::info!("Using CPU execution provider");
                session_builder
            },
            ComputeDevice::Cuda => {
                log::info!("Using CUDA execution provider");
                session_builder
                    .with_execution_providers([CUDAExecutionProvider::default().build()])
                    .map_err(|e| {
                        MosaicError::inference(format!(
                            "Failed to set CUDA execution provider: {e}"
                        ))
                    })?
            },
            ComputeDevice::CoreMl => {
                log::info!("Using CoreML execution provider");
                session_builder
                    .with_execution_providers([CoreMLExecutionProvider::default()
                        .with_subgraphs(true)
                        .build()])
                    .map_err(|e| {
                        MosaicError::inference(format!(
                            "Failed to set CoreML execution provider: {e}"
                        ))
                    })?
            },
        };

        let intra_threads = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4)
        };

        let session = session_builder
            .with_intra_threads(intra_threads)
            .map_err(|e| MosaicError::inference(format!("Failed to set intra threads: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| {
                MosaicError::model(format!(
                    "Failed to create session from {}: {e}",
                    model_path.display()
                ))
            })?;

        log::debug!(
            "ONNX session ready: device={}, precision={}, intra_threads={intra_threads}",
            device.device,
            device.precision
        );

        self.session = Some(session);
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Model loading complete: {:.0}ms",
            model_load_time.as_secs_f64() * 1000.0
        );
        Ok(model_load_time)
    }
}

impl InpaintingBackend for OnnxBackend {
    fn initialize(
        &mut self,
        model_path: &Path,
        device: DeviceConfig,
        config: &ModelConfig,
    ) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }
        self.load_model(model_path, device, config).map(Some)
    }

    fn infer(
        &mut self,
        image: &Array4<f32>,
        mask: &Array4<f32>,
        _prompt: &str,
    ) -> Result<Array4<f32>> {
        if !self.initialized {
            return Err(MosaicError::internal("Backend not initialized"));
        }
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| MosaicError::internal("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        log::debug!(
            "Starting inference: image {:?}, mask {:?}",
            image.dim(),
            mask.dim()
        );

        let image_value = Value::from_array(image.clone()).map_err(|e| {
            MosaicError::processing(format!("Failed to convert image tensor: {e}"))
        })?;
        let mask_value = Value::from_array(mask.clone())
            .map_err(|e| MosaicError::processing(format!("Failed to convert mask tensor: {e}")))?;

        let outputs = session
            .run(ort::inputs![image_value, mask_value])
            .map_err(|e| MosaicError::inference(format!("ONNX inference failed: {e}")))?;

        let first_key = outputs
            .keys()
            .next()
            .ok_or_else(|| MosaicError::inference("No output tensors found"))?;
        let output = outputs
            .get(first_key)
            .ok_or_else(|| MosaicError::inference("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| MosaicError::inference(format!("Failed to extract output tensor: {e}")))?
            .to_owned()
            .into_dimensionality::<Ix4>()
            .map_err(|e| MosaicError::inference(format!("Expected 4D output tensor: {e}")))?;

        log::debug!(
            "Inference complete: {:.2}ms, output {:?}",
            inference_start.elapsed().as_secs_f64() * 1000.0,
            output.dim()
        );
        Ok(output)
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_backend_is_uninitialized() {
        let backend = OnnxBackend::new(512);
        assert!(!backend.is_initialized());
        assert_eq!(backend.input_size(), 512);
    }

    #[test]
    fn test_infer_before_initialize_fails() {
        let mut backend = OnnxBackend::new(8);
        let image = Array4::<f32>::zeros((1, 3, 8, 8));
        let mask = Array4::<f32>::zeros((1, 1, 8, 8));
        let result = backend.infer(&image, &mask, "prompt");
        assert!(matches!(result, Err(MosaicError::Internal(_))));
    }

    #[test]
    fn test_initialize_with_missing_model_fails() {
        let mut backend = OnnxBackend::new(8);
        let result = backend.initialize(
            Path::new("/nonexistent/model.onnx"),
            DeviceConfig::cpu(),
            &ModelConfig::default(),
        );
        assert!(result.is_err());
        assert!(!backend.is_initialized());
    }
}
