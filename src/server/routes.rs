//! Route handlers
//!
//! Each handler runs inside a `request` span tagged with a fresh request id.

use super::error::ApiError;
use super::upload::{attachment_disposition, read_file_field, sanitize_filename, UploadedFile};
use super::AppState;
use crate::services::{ImageIOService, DEFAULT_BLUR_KERNEL};
use crate::tracing_config::spans;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    /// Base64-encoded PNG
    pub image: String,
}

/// `GET /`
pub async fn root() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Welcome to the Mosaic Remover AI Service".to_string(),
    })
}

/// `POST /process-image/`
pub async fn process_image(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = spans::request("/process-image/", &request_id);

    async move {
        let mut multipart =
            multipart.map_err(|e| ApiError::detail(StatusCode::BAD_REQUEST, e.body_text()))?;
        let upload = read_file_field(&mut multipart)
            .await
            .map_err(|e| ApiError::detail(e.status(), e.body_text()))?
            .ok_or_else(|| ApiError::detail(StatusCode::BAD_REQUEST, "No file part"))?;
        let file_name = sanitize_filename(&upload.file_name)
            .ok_or_else(|| ApiError::detail(StatusCode::BAD_REQUEST, "No selected file"))?;

        tracing::info!(file_name = %file_name, bytes = upload.bytes.len(), "Received upload");
        remove_mosaic(&state, &file_name, upload).await
    }
    .instrument(span)
    .await
}

/// Stage the upload in a scoped directory, run the processor, and stream back
/// the result. The staging directory is removed on every path out.
///
/// `file_name` is the sanitized name used on disk; the response names the
/// result after the name the client sent.
async fn remove_mosaic(
    state: &AppState,
    file_name: &str,
    upload: UploadedFile,
) -> Result<Response, ApiError> {
    tokio::fs::create_dir_all(&state.temp_dir)
        .await
        .map_err(ApiError::processing_failure)?;
    let staging = tempfile::Builder::new()
        .prefix("upload-")
        .tempdir_in(&state.temp_dir)
        .map_err(ApiError::processing_failure)?;
    let input_path = staging.path().join(file_name);
    let upload_name = upload.file_name;

    let result = match tokio::fs::write(&input_path, &upload.bytes).await {
        Ok(()) => state
            .processor
            .remove_mosaic_from_image(&input_path)
            .await
            .map_err(ApiError::processing_failure),
        Err(e) => Err(ApiError::processing_failure(e)),
    };

    if let Err(e) = staging.close() {
        tracing::warn!("Failed to remove temporary upload: {e}");
    }
    let output_path = result?;

    let body = tokio::fs::read(&output_path)
        .await
        .map_err(ApiError::processing_failure)?;
    let disposition = HeaderValue::from_str(&attachment_disposition(&upload_name))
        .map_err(ApiError::processing_failure)?;

    Ok((
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static(ImageIOService::mime_type_for(&output_path)),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// `POST /upload`: blur-only flow returning the image inline
pub async fn upload(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = spans::request("/upload", &request_id);

    async move {
        let no_file = || ApiError::error(StatusCode::BAD_REQUEST, "No file part");
        let mut multipart = multipart.map_err(|_| no_file())?;
        let upload = read_file_field(&mut multipart)
            .await
            .map_err(|e| ApiError::error(e.status(), e.body_text()))?
            .ok_or_else(no_file)?;
        if upload.file_name.is_empty() {
            return Err(ApiError::error(StatusCode::BAD_REQUEST, "No selected file"));
        }

        let encoded = tokio::task::spawn_blocking(move || -> crate::Result<String> {
            let image = ImageIOService::load_from_bytes(&upload.bytes)?;
            let blurred = ImageIOService::gaussian_blur(&image, DEFAULT_BLUR_KERNEL);
            let png = ImageIOService::encode_png(&blurred)?;
            Ok(base64::engine::general_purpose::STANDARD.encode(png))
        })
        .await
        .map_err(crate::MosaicError::from)
        .and_then(|r| r)
        .map_err(|e| {
            ApiError::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("File upload failed: {e}"),
            )
        })?;

        Ok(Json(UploadResponse {
            message: "Image processed successfully".to_string(),
            image: encoded,
        }))
    }
    .instrument(span)
    .await
}
