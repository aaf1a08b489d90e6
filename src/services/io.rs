//! Image I/O operations service
//!
//! This module separates file I/O and small pixel filters from the
//! detection and inpainting pipeline, making both easier to test.

use crate::error::{MosaicError, Result};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;

/// Weights of the 3x3 smoothing kernel (centre-weighted box filter)
const SMOOTH_KERNEL: [f32; 9] = [
    1.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
    5.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
];

/// Kernel size of the blur used by the blur-only upload flow
pub const DEFAULT_BLUR_KERNEL: u32 = 15;

/// Service for handling image file input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Load an image from a file path
    ///
    /// Tries extension-based format detection first and falls back to
    /// content sniffing, so uploads with a misleading extension still decode.
    ///
    /// # Examples
    /// ```rust,no_run
    /// use mosaic_remover::services::ImageIOService;
    ///
    /// let image = ImageIOService::load_image("input.jpg")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    ///
    /// # Errors
    /// - File does not exist or cannot be read
    /// - Content is not a decodable image
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(MosaicError::file_io_error(
                "read image file",
                path_ref,
                &std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
            ));
        }

        match image::open(path_ref) {
            Ok(img) => Ok(img),
            Err(e) => {
                log::debug!(
                    "Extension-based loading failed for {}: {}. Attempting content-based detection.",
                    path_ref.display(),
                    e
                );

                let data = std::fs::read(path_ref).map_err(|io_err| {
                    MosaicError::file_io_error("read image data", path_ref, &io_err)
                })?;

                image::load_from_memory(&data).map_err(MosaicError::Image)
            },
        }
    }

    /// Decode an image held in memory
    ///
    /// # Errors
    /// - Bytes are not a decodable image
    pub fn load_from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        image::load_from_memory(bytes).map_err(MosaicError::Image)
    }

    /// Save an image, choosing the encoder from the path's extension
    ///
    /// Paths without a recognised image extension are written as PNG.
    /// Parent directories are created as needed.
    ///
    /// # Errors
    /// - Output directory cannot be created
    /// - Encoding or writing fails
    pub fn save_image<P: AsRef<Path>>(image: &DynamicImage, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    MosaicError::file_io_error("create output directory", parent, &e)
                })?;
            }
        }

        let format = Self::output_format_for(path_ref);
        // JPEG has no alpha channel
        let encodable = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
            _ => image.clone(),
        };

        encodable.save_with_format(path_ref, format).map_err(|e| {
            MosaicError::processing_stage_error(
                "image save",
                &format!("Failed to save as {format:?}: {e}"),
                Some(&format!("path: {}", path_ref.display())),
            )
        })
    }

    /// Encode an image as PNG bytes
    ///
    /// # Errors
    /// - PNG encoding fails
    pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }

    /// Encoder used for a given output path
    #[must_use]
    pub fn output_format_for<P: AsRef<Path>>(path: P) -> ImageFormat {
        match ImageFormat::from_path(path.as_ref()) {
            Ok(format @ (ImageFormat::Png
            | ImageFormat::Jpeg
            | ImageFormat::WebP
            | ImageFormat::Tiff
            | ImageFormat::Bmp
            | ImageFormat::Gif)) => format,
            _ => ImageFormat::Png,
        }
    }

    /// MIME type of the bytes [`save_image`](Self::save_image) writes for a path
    #[must_use]
    pub fn mime_type_for<P: AsRef<Path>>(path: P) -> &'static str {
        Self::output_format_for(path).to_mime_type()
    }

    /// Check if a file path has a supported image extension
    pub fn is_supported_format<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                matches!(
                    ext.to_lowercase().as_str(),
                    "jpg" | "jpeg" | "png" | "webp" | "tiff" | "tif" | "bmp" | "gif"
                )
            })
    }

    /// Apply a light centre-weighted 3x3 smoothing filter
    #[must_use]
    pub fn smooth(image: &DynamicImage) -> DynamicImage {
        image.filter3x3(&SMOOTH_KERNEL)
    }

    /// Gaussian blur sized by an odd kernel width
    ///
    /// Sigma is derived from the kernel size the way `OpenCV` does when it is
    /// given as zero: `0.3 * ((k - 1) * 0.5 - 1) + 0.8`.
    #[must_use]
    pub fn gaussian_blur(image: &DynamicImage, kernel_size: u32) -> DynamicImage {
        let sigma = Self::sigma_for_kernel(kernel_size);
        let rgb = image.to_rgb8();
        DynamicImage::ImageRgb8(image::imageops::blur(&rgb, sigma))
    }

    /// Sigma implied by a Gaussian kernel width
    #[must_use]
    pub fn sigma_for_kernel(kernel_size: u32) -> f32 {
        let k = kernel_size.max(1) as f32;
        0.3 * ((k - 1.0) * 0.5 - 1.0) + 0.8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn checkerboard(width: u32, height: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_save_and_load_roundtrip_creates_parent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("out.png");
        let image = checkerboard(32, 16);

        ImageIOService::save_image(&image, &path).unwrap();
        let loaded = ImageIOService::load_image(&path).unwrap();
        assert_eq!(loaded.width(), 32);
        assert_eq!(loaded.height(), 16);
    }

    #[test]
    fn test_unknown_extension_saved_as_png() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("upload.bin");
        ImageIOService::save_image(&checkerboard(8, 8), &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
        assert_eq!(ImageIOService::mime_type_for(&path), "image/png");
        assert_eq!(ImageIOService::mime_type_for("a.jpg"), "image/jpeg");
    }

    #[test]
    fn test_bmp_and_gif_decode_and_save() {
        let temp = TempDir::new().unwrap();
        for (format, ext, mime) in [
            (ImageFormat::Bmp, "bmp", "image/bmp"),
            (ImageFormat::Gif, "gif", "image/gif"),
        ] {
            let mut encoded = Cursor::new(Vec::new());
            checkerboard(12, 9).write_to(&mut encoded, format).unwrap();
            let decoded = ImageIOService::load_from_bytes(encoded.get_ref()).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (12, 9), "{ext}");

            let path = temp.path().join(format!("out.{ext}"));
            ImageIOService::save_image(&decoded, &path).unwrap();
            let written = std::fs::read(&path).unwrap();
            assert_eq!(image::guess_format(&written).unwrap(), format);
            assert_eq!(ImageIOService::mime_type_for(&path), mime);
            assert!(ImageIOService::is_supported_format(&path));
        }
    }

    #[test]
    fn test_load_by_content_when_extension_lies() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("photo.jpg");
        let png = ImageIOService::encode_png(&checkerboard(10, 6)).unwrap();
        std::fs::write(&path, png).unwrap();

        let loaded = ImageIOService::load_image(&path).unwrap();
        assert_eq!((loaded.width(), loaded.height()), (10, 6));
    }

    #[test]
    fn test_load_errors() {
        let missing = ImageIOService::load_image("/definitely/not/here.png");
        assert!(matches!(missing, Err(MosaicError::Io(_))));

        let garbage = ImageIOService::load_from_bytes(b"not an image");
        assert!(matches!(garbage, Err(MosaicError::Image(_))));
    }

    #[test]
    fn test_sigma_matches_opencv_rule() {
        assert!((ImageIOService::sigma_for_kernel(15) - 2.6).abs() < 1e-5);
        assert!((ImageIOService::sigma_for_kernel(3) - 0.8).abs() < 1e-5);
    }

    #[test]
    fn test_filters_preserve_dimensions_and_soften_edges() {
        let image = checkerboard(24, 12);
        let blurred = ImageIOService::gaussian_blur(&image, DEFAULT_BLUR_KERNEL);
        let smoothed = ImageIOService::smooth(&image);
        assert_eq!((blurred.width(), blurred.height()), (24, 12));
        assert_eq!((smoothed.width(), smoothed.height()), (24, 12));

        // Pixel on a tile boundary is no longer pure black or white
        let px = blurred.to_rgb8().get_pixel(4, 4).0[0];
        assert!(px > 0 && px < 255);
    }

    #[test]
    fn test_supported_format() {
        assert!(ImageIOService::is_supported_format("a.PNG"));
        assert!(ImageIOService::is_supported_format("a.jpeg"));
        assert!(ImageIOService::is_supported_format("a.GIF"));
        assert!(!ImageIOService::is_supported_format("a.ico"));
        assert!(!ImageIOService::is_supported_format("noext"));
    }
}
