//! Shared handle to the inpainting model
//!
//! A [`ModelHandle`] is built once at startup and shared through the router
//! state. The backend is created and initialized on first use (or eagerly via
//! [`ModelHandle::ensure_loaded`]); concurrent first calls wait for the same
//! initialization. A failed initialization is not remembered, so a later
//! request retries it. Inference calls are serialized by a mutex.

use crate::cache::ModelCache;
use crate::config::{DeviceConfig, ModelConfig, ModelSource};
use crate::download::ModelDownloader;
use crate::error::{MosaicError, Result};
use crate::inference::{BackendFactory, DefaultBackendFactory, InpaintingBackend};
use crate::tracing_config::spans;
use crate::utils::InpaintPreprocessor;
use image::{GrayImage, RgbImage};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::Instrument;

type SharedBackend = Arc<Mutex<Box<dyn InpaintingBackend>>>;

/// Lazily initialized, shareable inpainting model
pub struct ModelHandle {
    config: ModelConfig,
    device: DeviceConfig,
    factory: Arc<dyn BackendFactory>,
    backend: OnceCell<SharedBackend>,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model", &self.config.spec.source.display_name())
            .field("backend", &self.config.backend)
            .field("device", &self.device)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl ModelHandle {
    /// Create a handle with an explicit device and backend factory
    #[must_use]
    pub fn new(config: ModelConfig, device: DeviceConfig, factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            config,
            device,
            factory,
            backend: OnceCell::new(),
        }
    }

    /// Create a handle for the compiled-in backends, probing the device once
    #[must_use]
    pub fn from_config(config: ModelConfig) -> Self {
        let device = DeviceConfig::resolve(config.execution_provider, config.backend);
        log::info!(
            "Compute device: {} ({})",
            device.device,
            device.precision
        );
        Self::new(config, device, Arc::new(DefaultBackendFactory))
    }

    #[must_use]
    pub fn device(&self) -> DeviceConfig {
        self.device
    }

    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Whether the backend has been initialized
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.backend.initialized()
    }

    /// Initialize the backend now instead of on the first request
    ///
    /// # Errors
    /// - Model file missing, download failure, or backend initialization failure
    pub async fn ensure_loaded(&self) -> Result<()> {
        self.backend().await.map(|_| ())
    }

    /// Inpaint the masked pixels of `image`
    ///
    /// The result has the dimensions of `image`; pixels where the mask is not
    /// set are copied from the source.
    ///
    /// # Errors
    /// - Model initialization failure
    /// - Mask dimensions differ from the image
    /// - Backend inference failure
    pub async fn run_inference(&self, image: RgbImage, mask: GrayImage) -> Result<RgbImage> {
        if image.dimensions() != mask.dimensions() {
            return Err(MosaicError::processing(format!(
                "Mask {:?} does not match image {:?}",
                mask.dimensions(),
                image.dimensions()
            )));
        }

        let backend = self.backend().await?;
        let prompt = self.config.prompt.clone();
        let span = spans::inference(image.dimensions());

        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            // Backends keep no per-call state, so a panicked inference leaves the model usable
            let mut guard = backend.lock().unwrap_or_else(|poisoned| {
                tracing::warn!("A previous inference panicked, reusing the model");
                poisoned.into_inner()
            });
            run_inpainting(guard.as_mut(), &image, &mask, &prompt)
        })
        .await?
    }

    async fn backend(&self) -> Result<SharedBackend> {
        self.backend
            .get_or_try_init(|| self.load())
            .await
            .map(Arc::clone)
    }

    async fn load(&self) -> Result<SharedBackend> {
        let span = spans::model_loading(
            &self.config.spec.source.display_name(),
            &self.device.device.to_string(),
        );

        async {
            let model_path = self.resolve_model_path().await?;

            let factory = Arc::clone(&self.factory);
            let config = self.config.clone();
            let device = self.device;
            let backend = tokio::task::spawn_blocking(move || -> Result<Box<dyn InpaintingBackend>> {
                let mut backend = factory.create_backend(config.backend, &config)?;
                if let Some(load_time) = backend.initialize(&model_path, device, &config)? {
                    tracing::info!(
                        load_ms = load_time.as_millis() as u64,
                        "Model initialized from {}",
                        model_path.display()
                    );
                }
                Ok(backend)
            })
            .await??;

            Ok(Arc::new(Mutex::new(backend)))
        }
        .instrument(span)
        .await
        .map_err(|e| {
            tracing::error!("Model initialization failed: {e}");
            e
        })
    }

    /// Local path as-is, hub repositories via the cache
    async fn resolve_model_path(&self) -> Result<PathBuf> {
        match &self.config.spec.source {
            ModelSource::Local(path) => {
                if path.is_file() {
                    Ok(path.clone())
                } else {
                    Err(MosaicError::model(format!(
                        "Model file not found: {}",
                        path.display()
                    )))
                }
            },
            ModelSource::HuggingFace { repo } => {
                let spec = &self.config.spec;
                let file = spec.file_for(self.device.precision);
                let checksum = if file == spec.fp32_file {
                    spec.fp32_sha256.as_deref()
                } else {
                    None
                };

                let cache = ModelCache::from_option(self.config.cache_dir.as_deref())?;
                ModelDownloader::new(cache)?
                    .ensure_file(repo, file, checksum)
                    .await
            },
        }
    }
}

fn run_inpainting(
    backend: &mut dyn InpaintingBackend,
    image: &RgbImage,
    mask: &GrayImage,
    prompt: &str,
) -> Result<RgbImage> {
    let size = backend.input_size();
    let image_tensor = InpaintPreprocessor::image_to_tensor(image, size);
    let mask_tensor = InpaintPreprocessor::mask_to_tensor(mask, size);

    let output = backend.infer(&image_tensor, &mask_tensor, prompt)?;
    let generated = InpaintPreprocessor::tensor_to_image(&output, image.width(), image.height())?;
    InpaintPreprocessor::composite(image, &generated, mask)
}
