//! Model downloading from `HuggingFace` repositories
//!
//! Files are streamed into a temporary directory inside the cache, optionally
//! checked against a SHA-256 digest, and only then renamed into place. A
//! partially downloaded file is never visible at its final path.

use crate::cache::ModelCache;
use crate::error::{MosaicError, Result};
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

const HF_BASE_URL: &str = "https://huggingface.co";

/// Model downloader backed by the model cache
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
    base_url: String,
}

impl ModelDownloader {
    /// Create a downloader writing into `cache`
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .map_err(|e| MosaicError::network_error("Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            cache,
            base_url: HF_BASE_URL.to_string(),
        })
    }

    /// Point the downloader at a hub mirror
    #[must_use]
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Download URL of a file in a repository's main branch
    #[must_use]
    pub fn file_url(&self, repo: &str, file: &str) -> String {
        format!("{}/{repo}/resolve/main/{file}", self.base_url)
    }

    /// Return the cached path of `file`, downloading it first if needed
    ///
    /// # Errors
    /// - Invalid repository name
    /// - Network errors or non-success HTTP status
    /// - SHA-256 mismatch
    /// - File system errors while caching
    pub async fn ensure_file(
        &self,
        repo: &str,
        file: &str,
        expected_sha256: Option<&str>,
    ) -> Result<PathBuf> {
        validate_repo(repo)?;
        let final_path = self.cache.model_file_path(repo, file);

        if self.cache.is_file_cached(repo, file) {
            log::debug!("Model file already cached: {}", final_path.display());
            return Ok(final_path);
        }

        let model_dir = self.cache.model_dir(repo);
        fs::create_dir_all(&model_dir)
            .map_err(|e| MosaicError::file_io_error("create model directory", &model_dir, &e))?;

        // Same filesystem as the destination so the final rename is atomic
        let staging = tempfile::Builder::new()
            .prefix(".download-")
            .tempdir_in(self.cache.cache_dir())
            .map_err(|e| {
                MosaicError::file_io_error("create staging directory", self.cache.cache_dir(), &e)
            })?;
        let staged_file = staging.path().join(file);

        let url = self.file_url(repo, file);
        log::info!("Downloading model from: {url}");
        let bytes = self.download_file(&url, &staged_file).await?;

        if !Self::verify_file_integrity(&staged_file, expected_sha256)? {
            return Err(MosaicError::model(format!(
                "Checksum mismatch for {file} from {repo}"
            )));
        }

        fs::rename(&staged_file, &final_path).map_err(|e| {
            MosaicError::file_io_error("move downloaded model to cache", &final_path, &e)
        })?;

        log::info!(
            "Cached {file} ({}) at {}",
            crate::cache::format_size(bytes),
            final_path.display()
        );
        Ok(final_path)
    }

    async fn download_file(&self, url: &str, local_path: &Path) -> Result<u64> {
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| MosaicError::file_io_error("create directory", parent, &e))?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MosaicError::network_error(format!("Failed to download {url}"), e))?;

        if !response.status().is_success() {
            return Err(MosaicError::network_error(
                format!("HTTP error for {url}"),
                response.status(),
            ));
        }
        let total_size = response.content_length();

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| MosaicError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut next_report = 0u64;
        let mut buffer = vec![0; 64 * 1024];
        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| MosaicError::network_error("Failed to read download stream", e))?;
            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| MosaicError::file_io_error("write to file", local_path, &e))?;
            downloaded += bytes_read as u64;

            if downloaded >= next_report {
                match total_size {
                    Some(total) => log::debug!("Downloaded {downloaded}/{total} bytes"),
                    None => log::debug!("Downloaded {downloaded} bytes"),
                }
                next_report = downloaded + 16 * 1024 * 1024;
            }
        }

        file.flush()
            .await
            .map_err(|e| MosaicError::file_io_error("flush file", local_path, &e))?;

        if let Some(total) = total_size {
            if total != downloaded {
                return Err(MosaicError::network_error(
                    format!("Incomplete download from {url}"),
                    format!("expected {total} bytes, got {downloaded}"),
                ));
            }
        }
        Ok(downloaded)
    }

    /// Verify a file against an expected SHA-256 hex digest
    ///
    /// Returns `true` when no digest is given.
    ///
    /// # Errors
    /// - File cannot be read
    pub fn verify_file_integrity(file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
        let Some(expected) = expected_hash else {
            return Ok(true);
        };

        let contents = fs::read(file_path).map_err(|e| {
            MosaicError::file_io_error("read file for verification", file_path, &e)
        })?;
        let actual_hash = format!("{:x}", Sha256::digest(&contents));

        if actual_hash.eq_ignore_ascii_case(expected) {
            Ok(true)
        } else {
            log::warn!(
                "File integrity check failed for {}: expected {expected}, got {actual_hash}",
                file_path.display()
            );
            Ok(false)
        }
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

/// Validate a `owner/name` hub repository identifier
///
/// # Errors
/// - Empty repository, missing owner or name, or extra path segments
pub fn validate_repo(repo: &str) -> Result<()> {
    parse_repo(repo).map(|_| ())
}

/// Split a hub repository identifier into `(owner, name)`
///
/// # Examples
/// ```
/// use mosaic_remover::download::parse_repo;
///
/// let (owner, name) = parse_repo("Carve/LaMa-ONNX")?;
/// assert_eq!((owner.as_str(), name.as_str()), ("Carve", "LaMa-ONNX"));
/// # Ok::<(), mosaic_remover::MosaicError>(())
/// ```
///
/// # Errors
/// - Not of the form `owner/name`
pub fn parse_repo(repo: &str) -> Result<(String, String)> {
    let trimmed = repo.trim_start_matches("https://huggingface.co/").trim_matches('/');
    let mut parts = trimmed.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => {
            Ok((owner.to_string(), name.to_string()))
        },
        _ => Err(MosaicError::invalid_config(format!(
            "Invalid HuggingFace repository '{repo}'. Expected format: owner/repo-name"
        ))),
    }
}
