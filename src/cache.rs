//! Model cache management for downloaded models
//!
//! Models live in an XDG-compliant directory, one sub-directory per hub
//! repository:
//!
//! ```text
//! <cache>/mosaic-remover/models/Carve--LaMa-ONNX/lama_fp32.onnx
//! ```

use crate::error::{MosaicError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "MOSAIC_REMOVER_CACHE_DIR";

/// Information about a cached model repository
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Model identifier (repository with `/` replaced by `--`)
    pub model_id: String,
    /// Path to the cached model directory
    pub path: PathBuf,
    /// ONNX files present in the directory, sorted
    pub files: Vec<String>,
    /// Total size of the directory in bytes
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Create a cache in the per-user location
    ///
    /// - Linux: `~/.cache/mosaic-remover/models/`
    /// - macOS: `~/Library/Caches/mosaic-remover/models/`
    /// - Windows: `%LOCALAPPDATA%/mosaic-remover/models/`
    ///
    /// # Errors
    /// - Failed to determine or create the cache directory
    pub fn new() -> Result<Self> {
        let cache_dir = Self::default_cache_dir()?;
        Self::ensure_dir(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    /// Create a cache rooted at a custom directory
    ///
    /// # Errors
    /// - Failed to create the cache directory
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        let models_dir = cache_dir.join("models");
        Self::ensure_dir(&models_dir)?;
        Ok(Self {
            cache_dir: models_dir,
        })
    }

    /// Custom directory when given, per-user cache otherwise
    ///
    /// # Errors
    /// - Failed to determine or create the cache directory
    pub fn from_option(cache_dir: Option<&Path>) -> Result<Self> {
        match cache_dir {
            Some(dir) => Self::with_custom_cache_dir(dir),
            None => Self::new(),
        }
    }

    fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .map_err(|e| MosaicError::file_io_error("create cache directory", dir, &e))?;
        }
        Ok(())
    }

    fn default_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                MosaicError::invalid_config(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV} environment variable."
                ))
            })?
            .join("mosaic-remover")
            .join("models"))
    }

    /// Convert a hub repository or URL into a filesystem-safe identifier
    ///
    /// # Examples
    /// ```
    /// use mosaic_remover::cache::ModelCache;
    ///
    /// assert_eq!(ModelCache::repo_to_model_id("Carve/LaMa-ONNX"), "Carve--LaMa-ONNX");
    /// assert_eq!(
    ///     ModelCache::repo_to_model_id("https://huggingface.co/Carve/LaMa-ONNX"),
    ///     "Carve--LaMa-ONNX"
    /// );
    /// ```
    #[must_use]
    pub fn repo_to_model_id(repo: &str) -> String {
        repo.trim_start_matches("https://huggingface.co/")
            .trim_matches('/')
            .replace('/', "--")
    }

    /// Directory holding a repository's files (may not exist)
    #[must_use]
    pub fn model_dir(&self, repo: &str) -> PathBuf {
        self.cache_dir.join(Self::repo_to_model_id(repo))
    }

    /// Path a repository file is cached at (may not exist)
    #[must_use]
    pub fn model_file_path(&self, repo: &str, file: &str) -> PathBuf {
        self.model_dir(repo).join(file)
    }

    /// Check whether a non-empty copy of `file` from `repo` is cached
    #[must_use]
    pub fn is_file_cached(&self, repo: &str, file: &str) -> bool {
        fs::metadata(self.model_file_path(repo, file)).is_ok_and(|meta| meta.is_file() && meta.len() > 0)
    }

    /// Scan the cache directory and describe every repository with ONNX files
    ///
    /// # Errors
    /// - Failed to read the cache directory
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        let mut models = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(models);
        }

        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            MosaicError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                MosaicError::file_io_error("read cache directory entry", &self.cache_dir, &e)
            })?;
            let path = entry.path();
            if path.is_dir() {
                if let Some(info) = Self::analyze_model_directory(&path) {
                    models.push(info);
                }
            }
        }

        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    fn analyze_model_directory(model_path: &Path) -> Option<CachedModelInfo> {
        let model_id = model_path.file_name()?.to_str()?.to_string();

        let mut files: Vec<String> = fs::read_dir(model_path)
            .ok()?
            .flatten()
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| {
                Path::new(name)
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"))
            })
            .collect();

        if files.is_empty() {
            log::debug!("Skipping model directory without ONNX files: {}", model_path.display());
            return None;
        }
        files.sort();

        let size_bytes = Self::directory_size(model_path).unwrap_or(0);
        Some(CachedModelInfo {
            model_id,
            path: model_path.to_path_buf(),
            files,
            size_bytes,
        })
    }

    fn directory_size(dir: &Path) -> std::io::Result<u64> {
        let mut total = 0;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                total += Self::directory_size(&path)?;
            } else {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    /// Remove one repository from the cache
    ///
    /// Returns `false` when it was not cached.
    ///
    /// # Errors
    /// - Failed to remove the model directory
    pub fn clear_specific_model(&self, repo: &str) -> Result<bool> {
        let model_path = self.model_dir(repo);
        if !model_path.exists() {
            return Ok(false);
        }

        log::info!("Removing cached model: {}", Self::repo_to_model_id(repo));
        fs::remove_dir_all(&model_path).map_err(|e| {
            MosaicError::file_io_error("remove cached model directory", &model_path, &e)
        })?;
        Ok(true)
    }

    /// Get the current cache directory
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// Format bytes for human-readable display
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit_index])
    }
}
