//! Tract backend for inpainting models
//!
//! Pure Rust inference on the CPU. Input facts are pinned to the configured
//! square resolution so the graph can be fully optimized at load time.

use crate::config::{DeviceConfig, ModelConfig};
use crate::error::{MosaicError, Result};
use crate::inference::InpaintingBackend;
use ndarray::Array4;
use std::path::Path;
use std::time::{Duration, Instant};
use tract_onnx::prelude::*;

type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract backend for running inpainting models using pure Rust inference
#[derive(Debug)]
pub struct TractBackend {
    model: Option<TractModel>,
    input_size: u32,
    initialized: bool,
}

impl TractBackend {
    /// Create an uninitialized backend feeding the graph at `input_size`
    #[must_use]
    pub fn new(input_size: u32) -> Self {
        Self {
            model: None,
            input_size,
            initialized: false,
        }
    }

    fn load_model(&mut self, model_path: &Path, device: DeviceConfig) -> Result<Duration> {
        let model_load_start = Instant::now();
        let side = self.input_size as usize;

        if device.device.is_accelerator() {
            log::warn!("Tract runs on the CPU only, ignoring device '{}'", device.device);
        }
        log::info!("Initializing Tract backend from {}", model_path.display());

        let model = onnx()
            .model_for_path(model_path)
            .map_err(|e| MosaicError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, f32::fact([1, 3, side, side]).into())
            .map_err(|e| MosaicError::model(format!("Failed to set image input fact: {e}")))?
            .with_input_fact(1, f32::fact([1, 1, side, side]).into())
            .map_err(|e| MosaicError::model(format!("Failed to set mask input fact: {e}")))?
            .into_optimized()
            .map_err(|e| MosaicError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| MosaicError::model(format!("Failed to create runnable model: {e}")))?;

        self.model = Some(model);
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Tract backend initialized in {}ms",
            model_load_time.as_millis()
        );
        Ok(model_load_time)
    }
}

impl InpaintingBackend for TractBackend {
    fn initialize(
        &mut self,
        model_path: &Path,
        device: DeviceConfig,
        _config: &ModelConfig,
    ) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }
        self.load_model(model_path, device).map(Some)
    }

    fn infer(
        &mut self,
        image: &Array4<f32>,
        mask: &Array4<f32>,
        _prompt: &str,
    ) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| MosaicError::internal("Tract model not initialized"))?;

        log::debug!(
            "Running Tract inference: image {:?}, mask {:?}",
            image.shape(),
            mask.shape()
        );
        let inference_start = Instant::now();

        let image_tensor = Tensor::from(image.clone());
        let mask_tensor = Tensor::from(mask.clone());
        let outputs = model
            .run(tvec![image_tensor.into(), mask_tensor.into()])
            .map_err(|e| MosaicError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| MosaicError::inference("No output tensor found"))?
            .into_arc_tensor();

        let view = output_tensor
            .to_array_view::<f32>()
            .map_err(|e| MosaicError::inference(format!("Failed to convert output tensor: {e}")))?;
        let &[batch, channels, height, width] = view.shape() else {
            return Err(MosaicError::inference(format!(
                "Expected 4D output tensor, got {}D",
                view.ndim()
            )));
        };
        let output = Array4::from_shape_vec(
            (batch, channels, height, width),
            view.iter().copied().collect(),
        )
        .map_err(|e| MosaicError::inference(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "Tract inference completed in {}ms, output {:?}",
            inference_start.elapsed().as_millis(),
            output.shape()
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
