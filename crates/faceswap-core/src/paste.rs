//! Paste a swapped face crop back into the full frame.
//!
//! The crop is warped back through the inverse of the alignment transform.
//! A coverage mask of the warped crop is eroded and Gaussian-blurred so the
//! seam fades into the original frame instead of showing a hard square edge.

use crate::alignment::{apply_affine, invert_affine, sample_bilinear};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::erode;

/// Coverage above this (out of 255) counts as inside the warped crop.
const MASK_COVERAGE_THRESHOLD: f32 = 20.0;

/// Axis-aligned pixel rectangle `[x0, x1) × [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl Region {
    fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    fn height(&self) -> u32 {
        self.y1 - self.y0
    }
}

/// Composite `crop` (aligned with `matrix`, frame → crop) into a copy of `frame`.
pub fn paste_back(frame: &RgbImage, crop: &RgbImage, matrix: &[f32; 6]) -> RgbImage {
    let mut out = frame.clone();
    let Some(inverse) = invert_affine(matrix) else {
        tracing::warn!("singular alignment matrix; frame left unchanged");
        return out;
    };

    let Some(region) = crop_footprint(frame, crop, &inverse) else {
        return out;
    };

    // Warp the crop and its coverage into the region.
    let mut fake = RgbImage::new(region.width(), region.height());
    let mut mask = GrayImage::new(region.width(), region.height());
    for ry in 0..region.height() {
        for rx in 0..region.width() {
            let (fx, fy) = ((region.x0 + rx) as f32, (region.y0 + ry) as f32);
            let (cx, cy) = apply_affine(matrix, fx, fy);
            let (rgb, coverage) = sample_bilinear(crop, cx, cy);
            fake.put_pixel(rx, ry, Rgb(rgb.map(|v| v.round().clamp(0.0, 255.0) as u8)));
            if coverage * 255.0 > MASK_COVERAGE_THRESHOLD {
                mask.put_pixel(rx, ry, Luma([255]));
            }
        }
    }

    let Some(mask_size) = mask_size(&mask) else {
        return out;
    };

    let erode_kernel = (mask_size / 10).max(10);
    let mask = erode(&mask, Norm::LInf, (erode_kernel / 2).min(u8::MAX as u32) as u8);

    let blur_kernel = 2 * (mask_size / 20).max(5) + 1;
    let mask = gaussian_blur_f32(&mask, gaussian_sigma(blur_kernel));

    for ry in 0..region.height() {
        for rx in 0..region.width() {
            let alpha = mask.get_pixel(rx, ry)[0] as f32 / 255.0;
            if alpha <= 0.0 {
                continue;
            }
            let swapped = fake.get_pixel(rx, ry);
            let target = out.get_pixel_mut(region.x0 + rx, region.y0 + ry);
            for c in 0..3 {
                target[c] = blend(alpha, swapped[c], target[c]);
            }
        }
    }

    out
}

/// Frame-space bounding rectangle of the crop once warped back, clipped to the frame.
fn crop_footprint(frame: &RgbImage, crop: &RgbImage, inverse: &[f32; 6]) -> Option<Region> {
    let (cw, ch) = (crop.width() as f32, crop.height() as f32);
    let corners = [(0.0, 0.0), (cw, 0.0), (0.0, ch), (cw, ch)].map(|(x, y)| apply_affine(inverse, x, y));

    let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min).floor() - 1.0;
    let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min).floor() - 1.0;
    let max_x = corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max).ceil() + 1.0;
    let max_y = corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max).ceil() + 1.0;

    let region = Region {
        x0: min_x.clamp(0.0, frame.width() as f32) as u32,
        y0: min_y.clamp(0.0, frame.height() as f32) as u32,
        x1: max_x.clamp(0.0, frame.width() as f32) as u32,
        y1: max_y.clamp(0.0, frame.height() as f32) as u32,
    };

    (region.width() > 0 && region.height() > 0).then_some(region)
}

/// `sqrt(h * w)` of the extent of fully-covered mask pixels; `None` if empty.
fn mask_size(mask: &GrayImage) -> Option<u32> {
    let mut extent: Option<(u32, u32, u32, u32)> = None;
    for (x, y, p) in mask.enumerate_pixels() {
        if p[0] != 255 {
            continue;
        }
        extent = Some(match extent {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    let (x0, y0, x1, y1) = extent?;
    Some((((y1 - y0) as f32 * (x1 - x0) as f32).sqrt()) as u32)
}

/// `alpha · swapped + (1 − alpha) · original`, rounded to the nearest level.
fn blend(alpha: f32, swapped: u8, original: u8) -> u8 {
    let value = alpha * swapped as f32 + (1.0 - alpha) * original as f32;
    value.round().clamp(0.0, 255.0) as u8
}

/// Sigma OpenCV derives for a Gaussian kernel of odd size `ksize` when none is given.
fn gaussian_sigma(ksize: u32) -> f32 {
    0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_at(offset_x: f32, offset_y: f32) -> [f32; 6] {
        // frame → crop: subtract the crop's top-left position in the frame
        [1.0, 0.0, -offset_x, 0.0, 1.0, -offset_y]
    }

    #[test]
    fn test_gaussian_sigma_matches_opencv() {
        assert!((gaussian_sigma(11) - 2.0).abs() < 1e-6);
        assert!((gaussian_sigma(3) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_blend_rounds_to_nearest() {
        assert_eq!(blend(0.5, 255, 0), 128);
        assert_eq!(blend(0.25, 10, 11), 11);
        assert_eq!(blend(1.0, 200, 0), 200);
        assert_eq!(blend(0.0, 200, 37), 37);
        // 0.999 · 200 = 199.8 must not drop a level.
        assert_eq!(blend(0.999, 200, 200), 200);
        assert_eq!(blend(0.999, 200, 0), 200);
    }

    #[test]
    fn test_mask_size() {
        let mut mask = GrayImage::new(50, 50);
        assert_eq!(mask_size(&mask), None);
        for y in 10..=19 {
            for x in 5..=44 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        // extent 9 x 39 → sqrt(351) ≈ 18.7
        assert_eq!(mask_size(&mask), Some(18));
    }

    #[test]
    fn test_center_replaced_edges_preserved() {
        let frame = RgbImage::from_pixel(300, 300, Rgb([0, 0, 255]));
        let crop = RgbImage::from_pixel(128, 128, Rgb([255, 0, 0]));
        let out = paste_back(&frame, &crop, &identity_at(86.0, 86.0));

        assert_eq!(out.dimensions(), frame.dimensions());
        // Center of the crop is fully swapped.
        let center = out.get_pixel(150, 150);
        assert!(center[0] >= 250 && center[2] <= 5, "center should be swapped, got {center:?}");
        // Far from the crop the frame is untouched.
        assert_eq!(out.get_pixel(5, 5), &Rgb([0, 0, 255]));
        assert_eq!(out.get_pixel(295, 150), &Rgb([0, 0, 255]));
        // The crop border itself is feathered away by erosion.
        let edge = out.get_pixel(87, 150);
        assert!(edge[2] > 200, "edge should stay mostly original, got {edge:?}");
    }

    #[test]
    fn test_blend_is_gradual() {
        let frame = RgbImage::from_pixel(300, 300, Rgb([0, 0, 0]));
        let crop = RgbImage::from_pixel(128, 128, Rgb([200, 200, 200]));
        let out = paste_back(&frame, &crop, &identity_at(86.0, 86.0));

        // Walk from outside the crop to its center; intensity never decreases.
        let mut last = 0u8;
        for x in 80..150 {
            let v = out.get_pixel(x, 150)[0];
            assert!(v >= last, "non-monotonic seam at x={x}: {v} < {last}");
            last = v;
        }
        assert!(last >= 199);
    }

    #[test]
    fn test_crop_outside_frame_is_noop() {
        let frame = RgbImage::from_pixel(64, 64, Rgb([10, 20, 30]));
        let crop = RgbImage::from_pixel(128, 128, Rgb([255, 255, 255]));
        let out = paste_back(&frame, &crop, &identity_at(1000.0, 1000.0));
        assert_eq!(out, frame);
    }

    #[test]
    fn test_singular_matrix_is_noop() {
        let frame = RgbImage::from_pixel(16, 16, Rgb([1, 2, 3]));
        let crop = RgbImage::new(8, 8);
        assert_eq!(paste_back(&frame, &crop, &[0.0; 6]), frame);
    }
}
