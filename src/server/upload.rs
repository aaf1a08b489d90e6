//! Multipart upload extraction

use crate::processor::OUTPUT_PREFIX;
use axum::body::Bytes;
use axum::extract::multipart::{Multipart, MultipartError};

/// Form field carrying the uploaded image
pub const FILE_FIELD: &str = "file";

/// File part of a multipart request
#[derive(Debug)]
pub struct UploadedFile {
    /// Client-supplied file name, empty when none was sent
    pub file_name: String,
    pub bytes: Bytes,
}

/// Read the first `file` part, skipping any other fields
///
/// Returns `None` when the form has no `file` part.
pub async fn read_file_field(multipart: &mut Multipart) -> Result<Option<UploadedFile>, MultipartError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await?;
        return Ok(Some(UploadedFile { file_name, bytes }));
    }
    Ok(None)
}

/// Reduce a client file name to a safe basename
///
/// Directory components are dropped, leading dots stripped, and characters
/// outside `[A-Za-z0-9._-]` replaced with `_`. Returns `None` when nothing is
/// left.
///
/// # Examples
/// ```rust
/// use mosaic_remover::server::upload::sanitize_filename;
///
/// assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
/// assert_eq!(sanitize_filename("my photo.jpg").as_deref(), Some("my_photo.jpg"));
/// assert_eq!(sanitize_filename(""), None);
/// ```
#[must_use]
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .trim_start_matches('.')
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// `Content-Disposition` value naming the result after the client's file
///
/// The name keeps its directory-free form as sent (`processed_my photo.jpg`).
/// The quoted `filename` is an ASCII fallback with quotes and backslashes
/// escaped; `filename*` carries the exact UTF-8 name (RFC 6266 / RFC 5987).
///
/// # Examples
/// ```rust
/// use mosaic_remover::server::upload::attachment_disposition;
///
/// assert_eq!(
///     attachment_disposition("uploads/my photo.jpg"),
///     "attachment; filename=\"processed_my photo.jpg\"; filename*=UTF-8''processed_my%20photo.jpg"
/// );
/// ```
#[must_use]
pub fn attachment_disposition(client_name: &str) -> String {
    let base = client_name.rsplit(['/', '\\']).next().unwrap_or_default();
    let name = format!("{OUTPUT_PREFIX}{base}");

    let mut fallback = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '"' | '\\' => {
                fallback.push('\\');
                fallback.push(c);
            },
            ' ' => fallback.push(c),
            c if c.is_ascii_graphic() => fallback.push(c),
            _ => fallback.push('_'),
        }
    }

    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(&name)
    )
}
