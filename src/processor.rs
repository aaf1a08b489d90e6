//! Mosaic removal processor
//!
//! Sequences one removal end to end: decode, detect, inpaint, save. Any failing
//! step aborts the whole operation; nothing is retried and no partial output is
//! written.

use crate::{
    config::{DetectorConfig, ServiceConfig},
    detector::MosaicDetector,
    error::{MosaicError, Result},
    model::ModelHandle,
    services::ImageIOService,
    tracing_config::spans,
};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Prefix of every file the processor writes
pub const OUTPUT_PREFIX: &str = "processed_";

/// Settings the processor needs from the service configuration
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Directory processed images are written to
    pub output_dir: PathBuf,
    pub detector: DetectorConfig,
}

impl From<&ServiceConfig> for ProcessorConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            detector: config.detector,
        }
    }
}

/// Detect-then-inpaint pipeline shared by the HTTP routes and the CLI
#[derive(Debug, Clone)]
pub struct MosaicRemovalProcessor {
    config: ProcessorConfig,
    detector: MosaicDetector,
    model: Arc<ModelHandle>,
}

impl MosaicRemovalProcessor {
    #[must_use]
    pub fn new(config: ProcessorConfig, model: Arc<ModelHandle>) -> Self {
        let detector = MosaicDetector::new(config.detector);
        Self {
            config,
            detector,
            model,
        }
    }

    #[must_use]
    pub fn model(&self) -> &Arc<ModelHandle> {
        &self.model
    }

    /// Where the result for `input` is written: `<output_dir>/processed_<name>`
    ///
    /// # Examples
    /// ```rust
    /// use mosaic_remover::processor::{MosaicRemovalProcessor, ProcessorConfig};
    /// use mosaic_remover::{DefaultBackendFactory, DeviceConfig, ModelConfig, ModelHandle};
    /// use std::path::Path;
    /// use std::sync::Arc;
    ///
    /// let config = ProcessorConfig { output_dir: "out".into(), detector: Default::default() };
    /// let model = ModelHandle::new(ModelConfig::default(), DeviceConfig::cpu(), Arc::new(DefaultBackendFactory));
    /// let model = Arc::new(model);
    /// let processor = MosaicRemovalProcessor::new(config, model);
    /// assert_eq!(
    ///     processor.output_path_for(Path::new("uploads/cat.jpg")),
    ///     Path::new("out").join("processed_cat.jpg")
    /// );
    /// ```
    #[must_use]
    pub fn output_path_for(&self, input: &Path) -> PathBuf {
        let name = input
            .file_name()
            .map_or_else(|| "image.png".into(), |n| n.to_string_lossy());
        self.config.output_dir.join(format!("{OUTPUT_PREFIX}{name}"))
    }

    /// Remove the mosaic from the image at `input` and return the output path
    ///
    /// # Errors
    /// - Input cannot be read or decoded
    /// - Model initialization or inference failure
    /// - Result dimensions differ from the input
    /// - Output cannot be written
    pub async fn remove_mosaic_from_image(&self, input: &Path) -> Result<PathBuf> {
        let span = spans::file_processing(input);
        self.process(input).instrument(span).await
    }

    async fn process(&self, input: &Path) -> Result<PathBuf> {
        let start = Instant::now();

        let input_owned = input.to_path_buf();
        let detector = self.detector.clone();
        let (source, detection) = tokio::task::spawn_blocking(move || -> Result<_> {
            let source = ImageIOService::load_image(&input_owned)?.to_rgb8();
            let detection = detector.detect(&DynamicImage::ImageRgb8(source.clone()));
            Ok((source, detection))
        })
        .await??;

        tracing::debug!(
            width = source.width(),
            height = source.height(),
            regions = detection.regions.len(),
            fallback = detection.used_fallback,
            "Mask computed"
        );

        let source_dims = source.dimensions();
        let result = self.model.run_inference(source, detection.mask).await?;
        if result.dimensions() != source_dims {
            return Err(MosaicError::processing_stage_error(
                "inpainting",
                &format!(
                    "result is {:?}, expected {source_dims:?}",
                    result.dimensions()
                ),
                Some(&input.display().to_string()),
            ));
        }

        let output_path = self.output_path_for(input);
        let save_path = output_path.clone();
        tokio::task::spawn_blocking(move || {
            ImageIOService::save_image(&DynamicImage::ImageRgb8(result), &save_path)
        })
        .await??;

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Saved {}",
            output_path.display()
        );
        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{MockBackendFactory, MockInpaintingBackend};
    use crate::config::{DeviceConfig, ModelConfig, ModelSource};
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn processor(temp: &TempDir, backend: MockInpaintingBackend) -> MosaicRemovalProcessor {
        let model_path = temp.path().join("mock.onnx");
        std::fs::write(&model_path, b"mock").unwrap();
        let mut model_config = ModelConfig::default();
        model_config.spec.source = ModelSource::Local(model_path);
        model_config.spec.input_size = 32;

        let model = ModelHandle::new(
            model_config,
            DeviceConfig::cpu(),
            Arc::new(MockBackendFactory::new(backend)),
        );
        let config = ProcessorConfig {
            output_dir: temp.path().join("processed_files"),
            detector: DetectorConfig::default(),
        };
        MosaicRemovalProcessor::new(config, Arc::new(model))
    }

    fn write_input(temp: &TempDir, name: &str, width: u32, height: u32) -> PathBuf {
        let path = temp.path().join(name);
        let img = RgbImage::from_pixel(width, height, Rgb([90, 90, 90]));
        img.save(&path).unwrap();
        path
    }

    #[tokio::test]
    async fn test_output_matches_input_dimensions() {
        let temp = TempDir::new().unwrap();
        let processor = processor(&temp, MockInpaintingBackend::new(32));
        let input = write_input(&temp, "photo.png", 77, 41);

        let output = processor.remove_mosaic_from_image(&input).await.unwrap();
        assert_eq!(output, temp.path().join("processed_files").join("processed_photo.png"));

        let result = image::open(&output).unwrap();
        assert_eq!((result.width(), result.height()), (77, 41));
        // Fallback region was painted white, corners kept
        let rgb = result.to_rgb8();
        assert_eq!(rgb.get_pixel(38, 20).0, [255, 255, 255]);
        assert_eq!(rgb.get_pixel(0, 0).0, [90, 90, 90]);
    }

    #[tokio::test]
    async fn test_undecodable_input_fails_without_output() {
        let temp = TempDir::new().unwrap();
        let processor = processor(&temp, MockInpaintingBackend::new(32));
        let input = temp.path().join("broken.png");
        std::fs::write(&input, b"not an image").unwrap();

        let result = processor.remove_mosaic_from_image(&input).await;
        assert!(matches!(result, Err(MosaicError::Image(_))));
        assert!(!processor.output_path_for(&input).exists());
    }

    #[tokio::test]
    async fn test_inference_failure_propagates() {
        let temp = TempDir::new().unwrap();
        let processor = processor(&temp, MockInpaintingBackend::new_failing_inference(32));
        let input = write_input(&temp, "a.png", 20, 20);

        let result = processor.remove_mosaic_from_image(&input).await;
        assert!(matches!(result, Err(MosaicError::Inference(_))));
        assert!(!processor.output_path_for(&input).exists());
    }

    #[test]
    fn test_output_path_keeps_extension() {
        let temp = TempDir::new().unwrap();
        let processor = processor(&temp, MockInpaintingBackend::new(32));
        let path = processor.output_path_for(Path::new("/tmp/x/holiday.JPG"));
        assert_eq!(path.file_name().unwrap(), "processed_holiday.JPG");
    }
}
