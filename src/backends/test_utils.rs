//! Mock backends for testing the inference pipeline
//!
//! These stand in for ONNX Runtime and Tract so the adapter, processor and
//! routes can be exercised without model files.

use crate::{
    config::{BackendType, DeviceConfig, ModelConfig},
    error::{MosaicError, Result},
    inference::{BackendFactory, InpaintingBackend},
};
use ndarray::Array4;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock inpainting backend that paints every pixel with a fixed value
#[derive(Debug, Clone)]
pub struct MockInpaintingBackend {
    input_size: u32,
    initialized: bool,
    /// Value written to every output element, in `[0, 1]`
    fill: f32,
    /// Call history for verification in tests
    call_history: Arc<Mutex<Vec<String>>>,
    should_fail_init: bool,
    should_fail_inference: bool,
    panic_next_inference: bool,
}

impl MockInpaintingBackend {
    #[must_use]
    pub fn new(input_size: u32) -> Self {
        Self {
            input_size,
            initialized: false,
            fill: 1.0,
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_init: false,
            should_fail_inference: false,
            panic_next_inference: false,
        }
    }

    /// Create a mock backend that will fail during initialization
    #[must_use]
    pub fn new_failing_init(input_size: u32) -> Self {
        let mut backend = Self::new(input_size);
        backend.should_fail_init = true;
        backend
    }

    /// Create a mock backend that will fail during inference
    #[must_use]
    pub fn new_failing_inference(input_size: u32) -> Self {
        let mut backend = Self::new(input_size);
        backend.should_fail_inference = true;
        backend
    }

    /// Create a mock backend whose first inference panics
    #[must_use]
    pub fn new_panicking_once(input_size: u32) -> Self {
        let mut backend = Self::new(input_size);
        backend.panic_next_inference = true;
        backend
    }

    #[must_use]
    pub fn with_fill(mut self, fill: f32) -> Self {
        self.fill = fill;
        self
    }

    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }

    fn record_call(&self, call: &str) {
        self.call_history.lock().unwrap().push(call.to_string());
    }
}

impl InpaintingBackend for MockInpaintingBackend {
    fn initialize(
        &mut self,
        model_path: &Path,
        device: DeviceConfig,
        _config: &ModelConfig,
    ) -> Result<Option<Duration>> {
        self.record_call(&format!(
            "initialize({}, {})",
            model_path.display(),
            device.device
        ));

        if self.should_fail_init {
            return Err(MosaicError::model("Mock initialization failure"));
        }
        if self.initialized {
            return Ok(None);
        }
        self.initialized = true;
        Ok(Some(Duration::from_millis(1)))
    }

    fn infer(
        &mut self,
        image: &Array4<f32>,
        mask: &Array4<f32>,
        prompt: &str,
    ) -> Result<Array4<f32>> {
        self.record_call(&format!("infer({:?}, {:?}, {prompt})", image.dim(), mask.dim()));

        if !self.initialized {
            return Err(MosaicError::internal("Backend not initialized"));
        }
        if self.should_fail_inference {
            return Err(MosaicError::inference("Mock inference failure"));
        }
        if self.panic_next_inference {
            self.panic_next_inference = false;
            panic!("Mock inference panic");
        }
        Ok(Array4::from_elem(image.dim(), self.fill))
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// Factory producing mock backends and counting how many it created
#[derive(Debug, Clone)]
pub struct MockBackendFactory {
    template: MockInpaintingBackend,
    created: Arc<AtomicUsize>,
}

impl MockBackendFactory {
    #[must_use]
    pub fn new(template: MockInpaintingBackend) -> Self {
        Self {
            template,
            created: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of backends handed out so far
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl BackendFactory for MockBackendFactory {
    fn create_backend(
        &self,
        _backend_type: BackendType,
        _config: &ModelConfig,
    ) -> Result<Box<dyn InpaintingBackend>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.template.clone()))
    }

    fn available_backends(&self) -> Vec<BackendType> {
        vec![BackendType::Onnx, BackendType::Tract]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_backend_records_calls() {
        let mut backend = MockInpaintingBackend::new(8).with_fill(0.25);
        backend
            .initialize(Path::new("m.onnx"), DeviceConfig::cpu(), &ModelConfig::default())
            .unwrap();

        let image = Array4::<f32>::zeros((1, 3, 8, 8));
        let mask = Array4::<f32>::zeros((1, 1, 8, 8));
        let out = backend.infer(&image, &mask, "p").unwrap();
        assert_eq!(out.dim(), (1, 3, 8, 8));
        assert!(out.iter().all(|v| (*v - 0.25).abs() < f32::EPSILON));

        let history = backend.get_call_history();
        assert_eq!(history.len(), 2);
        assert!(history[0].starts_with("initialize(m.onnx"));
        assert!(history[1].ends_with(", p)"));
    }

    #[test]
    fn test_failure_modes() {
        let mut failing_init = MockInpaintingBackend::new_failing_init(8);
        assert!(failing_init
            .initialize(Path::new("m.onnx"), DeviceConfig::cpu(), &ModelConfig::default())
            .is_err());
        assert!(!failing_init.is_initialized());

        let mut failing_infer = MockInpaintingBackend::new_failing_inference(8);
        failing_infer
            .initialize(Path::new("m.onnx"), DeviceConfig::cpu(), &ModelConfig::default())
            .unwrap();
        let image = Array4::<f32>::zeros((1, 3, 8, 8));
        let mask = Array4::<f32>::zeros((1, 1, 8, 8));
        assert!(matches!(
            failing_infer.infer(&image, &mask, ""),
            Err(MosaicError::Inference(_))
        ));
    }

    #[test]
    fn test_factory_counts_creations() {
        let factory = MockBackendFactory::new(MockInpaintingBackend::new(8));
        let _ = factory
            .create_backend(BackendType::Onnx, &ModelConfig::default())
            .unwrap();
        let _ = factory
            .create_backend(BackendType::Tract, &ModelConfig::default())
            .unwrap();
        assert_eq!(factory.created(), 2);
    }
}
