//! Tensor conversion around inpainting inference
//!
//! The graph works at a fixed square resolution. Inputs are resized to it and
//! outputs resized back, then composited so that pixels outside the mask keep
//! their original values. The result always has the source dimensions.

use crate::detector::MASK_ON;
use crate::error::{MosaicError, Result};
use image::imageops::FilterType;
use image::{GrayImage, Rgb, RgbImage};
use ndarray::Array4;

/// Output values above this are assumed to be on a 0-255 scale
const BYTE_SCALE_THRESHOLD: f32 = 1.5;

/// Shared conversion helpers for inpainting backends
pub struct InpaintPreprocessor;

impl InpaintPreprocessor {
    /// Resize an RGB image to `size`x`size` and convert to `[1, 3, size, size]` in `[0, 1]`
    #[must_use]
    pub fn image_to_tensor(image: &RgbImage, size: u32) -> Array4<f32> {
        let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
        let side = size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for (channel, value) in pixel.0.iter().enumerate() {
                tensor[[0, channel, y as usize, x as usize]] = f32::from(*value) / 255.0;
            }
        }
        tensor
    }

    /// Resize a mask with nearest-neighbour and binarize to `[1, 1, size, size]` in `{0, 1}`
    #[must_use]
    pub fn mask_to_tensor(mask: &GrayImage, size: u32) -> Array4<f32> {
        let resized = image::imageops::resize(mask, size, size, FilterType::Nearest);
        let side = size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 1, side, side));
        for (x, y, pixel) in resized.enumerate_pixels() {
            if pixel.0[0] > 0 {
                tensor[[0, 0, y as usize, x as usize]] = 1.0;
            }
        }
        tensor
    }

    /// Convert a `[1, 3, H, W]` output tensor to an RGB image of `width`x`height`
    ///
    /// # Errors
    /// - Output is not a single 3-channel image
    pub fn tensor_to_image(output: &Array4<f32>, width: u32, height: u32) -> Result<RgbImage> {
        let (batch, channels, out_h, out_w) = output.dim();
        if batch < 1 || channels != 3 || out_h == 0 || out_w == 0 {
            return Err(MosaicError::inference(format!(
                "Expected output tensor [1, 3, H, W], got {:?}",
                output.shape()
            )));
        }

        let max_value = output.iter().copied().fold(f32::MIN, f32::max);
        let scale = if max_value > BYTE_SCALE_THRESHOLD {
            1.0
        } else {
            255.0
        };

        let generated = RgbImage::from_fn(out_w as u32, out_h as u32, |x, y| {
            let (x, y) = (x as usize, y as usize);
            let channel = |c: usize| (output[[0, c, y, x]] * scale).round().clamp(0.0, 255.0) as u8;
            Rgb([channel(0), channel(1), channel(2)])
        });

        if (out_w as u32, out_h as u32) == (width, height) {
            Ok(generated)
        } else {
            Ok(image::imageops::resize(
                &generated,
                width,
                height,
                FilterType::Lanczos3,
            ))
        }
    }

    /// Take generated pixels where the mask is set and source pixels elsewhere
    ///
    /// # Errors
    /// - Source, generated image and mask differ in size
    pub fn composite(source: &RgbImage, generated: &RgbImage, mask: &GrayImage) -> Result<RgbImage> {
        if source.dimensions() != generated.dimensions() || source.dimensions() != mask.dimensions()
        {
            return Err(MosaicError::processing(format!(
                "Cannot composite: source {:?}, generated {:?}, mask {:?}",
                source.dimensions(),
                generated.dimensions(),
                mask.dimensions()
            )));
        }

        Ok(RgbImage::from_fn(source.width(), source.height(), |x, y| {
            if mask.get_pixel(x, y).0[0] == MASK_ON {
                *generated.get_pixel(x, y)
            } else {
                *source.get_pixel(x, y)
            }
        }))
    }
}
