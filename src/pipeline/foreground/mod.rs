//! Optional background suppression applied before alignment.
//!
//! Two strategies share one contract: given an RGB image, return a copy with
//! background pixels zeroed and the binary foreground mask. Region growing
//! is tried first; if it fails on either image of a pair, both images go
//! through the color range strategy so they stay comparable.

mod color_range;
mod grabcut;

use image::{GrayImage, RgbImage};
use thiserror::Error;

/// Why a segmentation strategy gave up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmentationError {
    /// The image is too small to hold both a seed rectangle and a border.
    #[error("image {width}x{height} leaves no room for a seed rectangle")]
    EmptySeed { width: u32, height: u32 },

    /// A color model had no samples to fit.
    #[error("{0} color model has no samples")]
    DegenerateModel(&'static str),

    /// A covariance could not be inverted or a cost was not finite.
    #[error("numerical failure: {0}")]
    Numerical(&'static str),
}

/// Foreground extraction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segmenter {
    /// Iterative color-model refinement from a central seed rectangle.
    RegionGrowing,
    /// Fixed saturation and brightness bounds in HSV space.
    ColorRange,
}

impl std::fmt::Display for Segmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RegionGrowing => f.write_str("region growing"),
            Self::ColorRange => f.write_str("color range"),
        }
    }
}

/// A foreground-only image and the mask that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segmentation {
    /// Input with background pixels set to black.
    pub image: RgbImage,
    /// 255 where foreground, 0 elsewhere.
    pub mask: GrayImage,
}

impl Segmenter {
    /// Run this strategy on one image. The input is never modified.
    ///
    /// # Errors
    ///
    /// Region growing fails on images too small for a seed rectangle and on
    /// numerically degenerate color models. Color range never fails.
    pub fn segment(self, image: &RgbImage) -> Result<Segmentation, SegmentationError> {
        match self {
            Self::RegionGrowing => grabcut::segment(image),
            Self::ColorRange => Ok(color_range::segment(image)),
        }
    }
}

/// Segment both images of a pair with the same strategy.
///
/// Returns the two segmentations and the strategy that produced them.
#[must_use]
pub fn extract_pair(before: &RgbImage, after: &RgbImage) -> (Segmentation, Segmentation, Segmenter) {
    let primary = Segmenter::RegionGrowing
        .segment(before)
        .and_then(|b| Segmenter::RegionGrowing.segment(after).map(|a| (b, a)));

    match primary {
        Ok((b, a)) => (b, a, Segmenter::RegionGrowing),
        Err(err) => {
            tracing::warn!("Region growing failed ({err}), falling back to color range");
            (
                color_range::segment(before),
                color_range::segment(after),
                Segmenter::ColorRange,
            )
        }
    }
}

/// Zero every pixel whose mask value is 0.
fn apply_mask(image: &RgbImage, mask: &GrayImage) -> RgbImage {
    let mut out = image.clone();
    for (pixel, m) in out.pixels_mut().zip(mask.pixels()) {
        if m[0] == 0 {
            pixel.0 = [0, 0, 0];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn red_on_blue() -> RgbImage {
        RgbImage::from_fn(100, 100, |x, y| {
            if (30..70).contains(&x) && (30..70).contains(&y) {
                Rgb([220, 30, 30])
            } else {
                Rgb([30, 30, 200])
            }
        })
    }

    #[test]
    fn test_pair_uses_primary() {
        let img = red_on_blue();
        let (b, a, strategy) = extract_pair(&img, &img);

        assert_eq!(strategy, Segmenter::RegionGrowing);
        assert_eq!(b, a);
        assert_eq!(b.mask.get_pixel(50, 50)[0], 255);
        assert_eq!(b.mask.get_pixel(5, 5)[0], 0);
    }

    #[test]
    fn test_pair_falls_back_together() {
        let good = red_on_blue();
        let tiny = RgbImage::from_pixel(1, 1, Rgb([200, 10, 10]));

        let (b, a, strategy) = extract_pair(&good, &tiny);

        assert_eq!(strategy, Segmenter::ColorRange);
        assert_eq!(b, Segmenter::ColorRange.segment(&good).unwrap());
        assert_eq!(a.mask.get_pixel(0, 0)[0], 255);
    }

    #[test]
    fn test_region_growing_rejects_tiny_image() {
        let tiny = RgbImage::from_pixel(1, 1, Rgb([1, 2, 3]));
        let err = Segmenter::RegionGrowing.segment(&tiny).unwrap_err();

        assert!(matches!(err, SegmentationError::EmptySeed { .. }));
    }

    #[test]
    fn test_input_not_mutated() {
        let img = red_on_blue();
        let copy = img.clone();

        let _ = extract_pair(&img, &img);
        let _ = Segmenter::ColorRange.segment(&img);

        assert_eq!(img, copy);
    }

    #[test]
    fn test_apply_mask() {
        let img = RgbImage::from_pixel(2, 1, Rgb([9, 9, 9]));
        let mask = GrayImage::from_raw(2, 1, vec![255, 0]).unwrap();

        let out = apply_mask(&img, &mask);

        assert_eq!(*out.get_pixel(0, 0), Rgb([9, 9, 9]));
        assert_eq!(*out.get_pixel(1, 0), Rgb([0, 0, 0]));
    }
}
