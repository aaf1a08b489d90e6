//! Shared fixtures for integration tests: an in-process mock backend and
//! helpers for building images and multipart bodies.

#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use mosaic_remover::{
    BackendFactory, BackendType, DeviceConfig, InpaintingBackend, ModelConfig, ModelHandle,
    ModelSource, MosaicError, Result,
};
use ndarray::Array4;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const BOUNDARY: &str = "mosaic-test-boundary";

/// Backend that paints the whole tensor white
#[derive(Debug, Default)]
pub struct WhiteBackend {
    initialized: bool,
    fail_inference: bool,
}

impl InpaintingBackend for WhiteBackend {
    fn initialize(
        &mut self,
        _model_path: &Path,
        _device: DeviceConfig,
        _config: &ModelConfig,
    ) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }
        self.initialized = true;
        Ok(Some(Duration::ZERO))
    }

    fn infer(
        &mut self,
        image: &Array4<f32>,
        _mask: &Array4<f32>,
        _prompt: &str,
    ) -> Result<Array4<f32>> {
        if self.fail_inference {
            return Err(MosaicError::inference("backend unavailable"));
        }
        Ok(Array4::from_elem(image.dim(), 1.0))
    }

    fn input_size(&self) -> u32 {
        32
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// Factory counting how many backends were created
#[derive(Debug, Default, Clone)]
pub struct CountingFactory {
    pub created: Arc<AtomicUsize>,
    pub fail_inference: bool,
}

impl CountingFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl BackendFactory for CountingFactory {
    fn create_backend(
        &self,
        _backend_type: BackendType,
        _config: &ModelConfig,
    ) -> Result<Box<dyn InpaintingBackend>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(WhiteBackend {
            initialized: false,
            fail_inference: self.fail_inference,
        }))
    }

    fn available_backends(&self) -> Vec<BackendType> {
        vec![BackendType::Onnx]
    }
}

/// Model handle backed by `factory`, pointing at a placeholder model file in `dir`
pub fn mock_model(dir: &Path, factory: CountingFactory) -> Arc<ModelHandle> {
    let model_path = dir.join("mock.onnx");
    std::fs::write(&model_path, b"mock").unwrap();

    let mut config = ModelConfig::default();
    config.spec.source = ModelSource::Local(model_path);
    config.spec.input_size = 32;
    Arc::new(ModelHandle::new(config, DeviceConfig::cpu(), Arc::new(factory)))
}

/// Flat grey image encoded as PNG
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([80, 80, 80])));
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}

/// Single-part multipart body; `filename: None` omits the filename parameter
pub fn multipart_body(field: &str, filename: Option<&str>, bytes: &[u8]) -> Vec<u8> {
    let disposition = match filename {
        Some(name) => format!("form-data; name=\"{field}\"; filename=\"{name}\""),
        None => format!("form-data; name=\"{field}\""),
    };
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: {disposition}\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

/// Number of entries left in a directory (0 when it does not exist)
pub fn entry_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map_or(0, |entries| entries.count())
}
