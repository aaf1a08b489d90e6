//! Heuristic mosaic region detection
//!
//! Pixelated blocks have hard, axis-aligned edges. The detector runs Canny on
//! the unsmoothed grayscale image (3x3 Sobel, L1 gradient magnitude, so the
//! 50/150 thresholds mean what they do in `OpenCV`), keeps the outermost contours whose enclosed area is
//! large enough to be more than noise, and stamps each contour's bounding box
//! onto a binary mask. When nothing qualifies, a centred rectangle covering the
//! middle half of each dimension is used instead.
//!
//! This is a best-effort placeholder: it misses soft mosaics and flags any
//! strong geometric edge.

use crate::config::DetectorConfig;
use image::{DynamicImage, GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use serde::{Deserialize, Serialize};

/// Mask value for pixels the model should regenerate
pub const MASK_ON: u8 = 255;

/// Inclusive pixel rectangle stamped onto a mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskRegion {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl MaskRegion {
    /// Number of pixels covered
    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.right - self.left + 1) * u64::from(self.bottom - self.top + 1)
    }

    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        (self.left..=self.right).contains(&x) && (self.top..=self.bottom).contains(&y)
    }
}

/// Mask plus the regions that produced it
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub mask: GrayImage,
    pub regions: Vec<MaskRegion>,
    /// True when no contour qualified and the centre rectangle was used
    pub used_fallback: bool,
}

/// Edge/contour based mosaic detector
#[derive(Debug, Clone, Default)]
pub struct MosaicDetector {
    config: DetectorConfig,
}

impl MosaicDetector {
    #[must_use]
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Produce a mask with the same dimensions as `image`
    #[must_use]
    pub fn detect_mask(&self, image: &DynamicImage) -> GrayImage {
        self.detect(image).mask
    }

    /// Run detection and report which regions were marked
    #[must_use]
    pub fn detect(&self, image: &DynamicImage) -> DetectionResult {
        let gray = image.to_luma8();
        let (width, height) = gray.dimensions();
        let mut mask = GrayImage::new(width, height);

        if width == 0 || height == 0 {
            return DetectionResult {
                mask,
                regions: Vec::new(),
                used_fallback: false,
            };
        }

        let edges = sobel_canny(&gray, self.config.canny_low, self.config.canny_high);
        let contours = find_contours::<i32>(&edges);

        let mut regions = Vec::new();
        for contour in contours.iter().filter(|c| Self::is_external(c)) {
            let area = polygon_area(contour);
            if area <= self.config.min_contour_area {
                continue;
            }
            if let Some(region) = bounding_region(contour, width, height) {
                log::trace!("Contour area {area:.0} -> region {region:?}");
                stamp(&mut mask, region);
                regions.push(region);
            }
        }

        // Regions are only recorded when stamped, so this is the "mask is empty" check
        let used_fallback = regions.is_empty();
        if used_fallback {
            let region = Self::fallback_region(width, height);
            log::debug!("No qualifying contour in {width}x{height} image, using centre region {region:?}");
            stamp(&mut mask, region);
            regions.push(region);
        } else {
            log::debug!("Detected {} mosaic region(s)", regions.len());
        }

        DetectionResult {
            mask,
            regions,
            used_fallback,
        }
    }

    /// Centred rectangle spanning `[w/4, w - w/4]` x `[h/4, h - h/4]`, clipped
    /// to the image.
    ///
    /// # Examples
    /// ```rust
    /// use mosaic_remover::detector::{MaskRegion, MosaicDetector};
    ///
    /// let region = MosaicDetector::fallback_region(400, 200);
    /// assert_eq!(region, MaskRegion { left: 100, top: 50, right: 300, bottom: 150 });
    /// ```
    #[must_use]
    pub fn fallback_region(width: u32, height: u32) -> MaskRegion {
        let max_x = width.saturating_sub(1);
        let max_y = height.saturating_sub(1);
        MaskRegion {
            left: (width / 4).min(max_x),
            top: (height / 4).min(max_y),
            right: (width - width / 4).min(max_x),
            bottom: (height - height / 4).min(max_y),
        }
    }

    fn is_external(contour: &Contour<i32>) -> bool {
        contour.parent.is_none() && matches!(contour.border_type, BorderType::Outer)
    }
}

const TAN_22_5: f32 = 0.414_213_57;
const TAN_67_5: f32 = 2.414_213_6;

/// Canny edge map without pre-smoothing
///
/// Gradient is the 3x3 Sobel pair with magnitude `|gx| + |gy|`. Pixels above
/// `low` that are a local maximum along the gradient direction are candidates;
/// those above `high` seed edges, which grow through 8-connected candidates.
fn sobel_canny(gray: &GrayImage, low: f32, high: f32) -> GrayImage {
    let (width, height) = gray.dimensions();
    let gx = horizontal_sobel(gray);
    let gy = vertical_sobel(gray);

    let magnitude: Vec<f32> = gx
        .pixels()
        .zip(gy.pixels())
        .map(|(x, y)| f32::from(x.0[0].unsigned_abs()) + f32::from(y.0[0].unsigned_abs()))
        .collect();
    let (w, h) = (i64::from(width), i64::from(height));
    let index = |x: i64, y: i64| -> Option<usize> {
        ((0..w).contains(&x) && (0..h).contains(&y)).then(|| (y * w + x) as usize)
    };
    let mag = |x: i64, y: i64| -> f32 {
        index(x, y)
            .and_then(|i| magnitude.get(i).copied())
            .unwrap_or(0.0)
    };

    // 0 = suppressed, 1 = weak candidate, 2 = strong
    let mut state = vec![0u8; magnitude.len()];
    let mut seeds = Vec::new();
    for (x, y, dx) in gx.enumerate_pixels() {
        let (xi, yi) = (i64::from(x), i64::from(y));
        let m = mag(xi, yi);
        if m <= low {
            continue;
        }

        let dx = f32::from(dx.0[0]);
        let dy = f32::from(gy.get_pixel(x, y).0[0]);
        let (ax, ay) = (dx.abs(), dy.abs());
        let is_max = if ay < ax * TAN_22_5 {
            m > mag(xi - 1, yi) && m >= mag(xi + 1, yi)
        } else if ay > ax * TAN_67_5 {
            m > mag(xi, yi - 1) && m >= mag(xi, yi + 1)
        } else {
            let s = if (dx < 0.0) == (dy < 0.0) { 1 } else { -1 };
            m > mag(xi - s, yi - 1) && m > mag(xi + s, yi + 1)
        };
        if !is_max {
            continue;
        }

        if let Some(cell) = index(xi, yi).and_then(|i| state.get_mut(i)) {
            if m > high {
                *cell = 2;
                seeds.push((xi, yi));
            } else {
                *cell = 1;
            }
        }
    }

    while let Some((x, y)) = seeds.pop() {
        for (nx, ny) in (-1..=1).flat_map(|dy| (-1..=1).map(move |dx| (x + dx, y + dy))) {
            if let Some(cell) = index(nx, ny).and_then(|i| state.get_mut(i)) {
                if *cell == 1 {
                    *cell = 2;
                    seeds.push((nx, ny));
                }
            }
        }
    }

    let mut edges = GrayImage::new(width, height);
    for (pixel, cell) in edges.pixels_mut().zip(&state) {
        if *cell == 2 {
            pixel.0[0] = 255;
        }
    }
    edges
}

/// Enclosed area of a contour polygon (shoelace formula)
fn polygon_area(contour: &Contour<i32>) -> f64 {
    let points = &contour.points;
    if points.len() < 3 {
        return 0.0;
    }
    let doubled: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| i64::from(a.x) * i64::from(b.y) - i64::from(b.x) * i64::from(a.y))
        .sum();
    (doubled as f64 / 2.0).abs()
}

/// Filled bounding rectangle of a contour, extended one pixel right and down
/// to cover the closing edge, clipped to the image
fn bounding_region(contour: &Contour<i32>, width: u32, height: u32) -> Option<MaskRegion> {
    let min_x = contour.points.iter().map(|p| p.x).min()?;
    let max_x = contour.points.iter().map(|p| p.x).max()?;
    let min_y = contour.points.iter().map(|p| p.y).min()?;
    let max_y = contour.points.iter().map(|p| p.y).max()?;

    let clip = |v: i32, limit: u32| -> u32 { (v.max(0) as u32).min(limit.saturating_sub(1)) };
    Some(MaskRegion {
        left: clip(min_x, width),
        top: clip(min_y, height),
        right: clip(max_x + 1, width),
        bottom: clip(max_y + 1, height),
    })
}

fn stamp(mask: &mut GrayImage, region: MaskRegion) {
    for y in region.top..=region.bottom {
        for x in region.left..=region.right {
            mask.put_pixel(x, y, Luma([MASK_ON]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use imageproc::point::Point;

    fn uniform(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([120, 120, 120])))
    }

    fn count_on(mask: &GrayImage) -> usize {
        mask.pixels().filter(|p| p.0[0] == MASK_ON).count()
    }

    #[test]
    fn test_mask_dimensions_match_input() {
        let detector = MosaicDetector::default();
        for (w, h) in [(1, 1), (3, 7), (64, 32), (400, 200)] {
            let mask = detector.detect_mask(&uniform(w, h));
            assert_eq!(mask.dimensions(), (w, h), "mask size for {w}x{h}");
        }
    }

    #[test]
    fn test_fallback_covers_middle_half() {
        let result = MosaicDetector::default().detect(&uniform(400, 200));
        assert!(result.used_fallback);
        assert_eq!(
            result.regions,
            vec![MaskRegion {
                left: 100,
                top: 50,
                right: 300,
                bottom: 150
            }]
        );

        let mask = &result.mask;
        assert_eq!(mask.get_pixel(100, 50).0[0], MASK_ON);
        assert_eq!(mask.get_pixel(300, 150).0[0], MASK_ON);
        assert_eq!(mask.get_pixel(99, 50).0[0], 0);
        assert_eq!(mask.get_pixel(301, 150).0[0], 0);
        assert_eq!(mask.get_pixel(100, 49).0[0], 0);
        assert_eq!(mask.get_pixel(100, 151).0[0], 0);
        assert_eq!(count_on(mask), 201 * 101);
    }

    #[test]
    fn test_fallback_region_small_images() {
        let region = MosaicDetector::fallback_region(1, 1);
        assert_eq!(region, MaskRegion { left: 0, top: 0, right: 0, bottom: 0 });

        let region = MosaicDetector::fallback_region(5, 3);
        assert_eq!(region, MaskRegion { left: 1, top: 0, right: 4, bottom: 2 });
    }

    #[test]
    fn test_bright_block_is_detected() {
        let mut img = RgbImage::from_pixel(200, 200, Rgb([0, 0, 0]));
        for y in 20..100 {
            for x in 20..100 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let result = MosaicDetector::default().detect(&DynamicImage::ImageRgb8(img));

        assert!(!result.used_fallback);
        assert_eq!(result.mask.get_pixel(60, 60).0[0], MASK_ON);
        assert_eq!(result.mask.get_pixel(160, 160).0[0], 0);
        assert!(result.regions.iter().any(|r| r.contains(60, 60)));
    }

    /// Grey frame with a checkerboard of 16px blocks at 128 +/- `delta`
    fn block_grid(delta: u8) -> DynamicImage {
        let img = RgbImage::from_fn(400, 300, |x, y| {
            let inside = (120..280).contains(&x) && (90..210).contains(&y);
            let value = if !inside {
                128
            } else if ((x - 120) / 16 + (y - 90) / 16) % 2 == 0 {
                128 + delta
            } else {
                128 - delta
            };
            Rgb([value, value, value])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_moderate_contrast_grid_is_detected() {
        // 60-level steps between blocks: Sobel L1 response 240 at the seams
        let result = MosaicDetector::default().detect(&block_grid(30));

        assert!(!result.used_fallback, "regions: {:?}", result.regions);
        assert_eq!(result.mask.get_pixel(200, 150).0[0], MASK_ON);
        assert_eq!(result.mask.get_pixel(140, 110).0[0], MASK_ON);
        assert_eq!(result.mask.get_pixel(20, 20).0[0], 0);
        assert_eq!(result.mask.get_pixel(380, 280).0[0], 0);
    }

    #[test]
    fn test_sobel_canny_thresholds() {
        // Vertical step of 30: L1 response 120, between the thresholds
        let weak = GrayImage::from_fn(40, 20, |x, _| Luma([if x < 20 { 100 } else { 130 }]));
        assert!(sobel_canny(&weak, 50.0, 150.0).pixels().all(|p| p.0[0] == 0));
        let edges = sobel_canny(&weak, 50.0, 100.0);
        // One pixel wide after non-maximum suppression
        assert_eq!(edges.get_pixel(19, 10).0[0], 255);
        assert_eq!(edges.get_pixel(20, 10).0[0], 0);
        assert_eq!(edges.get_pixel(5, 10).0[0], 0);

        // Weak pixels survive only when connected to a strong one
        let mut mixed = weak.clone();
        for y in 0..10 {
            for x in 20..40 {
                mixed.put_pixel(x, y, Luma([200]));
            }
        }
        let edges = sobel_canny(&mixed, 50.0, 150.0);
        assert_eq!(edges.get_pixel(19, 3).0[0], 255);
        assert_eq!(edges.get_pixel(19, 15).0[0], 255);
    }

    #[test]
    fn test_small_blocks_fall_back() {
        // 10x10 block encloses well under the area threshold
        let mut img = RgbImage::from_pixel(120, 80, Rgb([0, 0, 0]));
        for y in 5..15 {
            for x in 5..15 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let result = MosaicDetector::default().detect(&DynamicImage::ImageRgb8(img));
        assert!(result.used_fallback);
        assert_eq!(result.mask.get_pixel(10, 10).0[0], 0);
    }

    #[test]
    fn test_polygon_area_square() {
        let contour = Contour {
            points: vec![
                Point::new(0, 0),
                Point::new(10, 0),
                Point::new(10, 10),
                Point::new(0, 10),
            ],
            border_type: BorderType::Outer,
            parent: None,
        };
        assert!((polygon_area(&contour) - 100.0).abs() < f64::EPSILON);

        let region = bounding_region(&contour, 8, 20).unwrap();
        assert_eq!(region, MaskRegion { left: 0, top: 0, right: 7, bottom: 11 });
        assert_eq!(region.area(), 8 * 12);
    }
}
