//! HSV threshold segmentation.
//!
//! Hue spans 0-180 and saturation/value 0-255, the 8-bit convention. Only
//! saturation and value are constrained; any hue passes.

use image::{GrayImage, Luma, Rgb, RgbImage};

use super::{apply_mask, Segmentation};

pub(super) const MIN_SATURATION: u8 = 30;
pub(super) const MIN_VALUE: u8 = 50;

/// 8-bit saturation and value of an RGB pixel.
#[allow(clippy::cast_possible_truncation)]
fn saturation_value(Rgb([r, g, b]): Rgb<u8>) -> (u8, u8) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    if max == 0 {
        return (0, 0);
    }
    let (spread, v) = (u32::from(max - min), u32::from(max));
    // Safe: spread <= v, so the rounded quotient is at most 255
    let s = ((spread * 255 + v / 2) / v) as u8;
    (s, max)
}

pub(super) fn segment(image: &RgbImage) -> Segmentation {
    let mask = GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let (s, v) = saturation_value(*image.get_pixel(x, y));
        Luma([if s >= MIN_SATURATION && v >= MIN_VALUE { 255 } else { 0 }])
    });

    Segmentation {
        image: apply_mask(image, &mask),
        mask,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturation_value() {
        assert_eq!(saturation_value(Rgb([0, 0, 0])), (0, 0));
        assert_eq!(saturation_value(Rgb([255, 0, 0])), (255, 255));
        assert_eq!(saturation_value(Rgb([128, 128, 128])), (0, 128));
        assert_eq!(saturation_value(Rgb([100, 50, 50])), (128, 100));
    }

    #[test]
    fn test_grays_are_background() {
        let img = RgbImage::from_fn(3, 1, |x, _| match x {
            0 => Rgb([255, 255, 255]),
            1 => Rgb([120, 120, 120]),
            _ => Rgb([10, 10, 10]),
        });

        let seg = segment(&img);

        assert!(seg.mask.pixels().all(|p| p[0] == 0));
        assert!(seg.image.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn test_saturated_colors_are_foreground() {
        let img = RgbImage::from_fn(4, 1, |x, _| match x {
            0 => Rgb([200, 20, 20]),
            1 => Rgb([20, 200, 20]),
            2 => Rgb([20, 20, 200]),
            _ => Rgb([40, 10, 10]),
        });

        let seg = segment(&img);

        assert_eq!(seg.mask.as_raw(), &vec![255, 255, 255, 0]);
        assert_eq!(*seg.image.get_pixel(1, 0), Rgb([20, 200, 20]));
        assert_eq!(*seg.image.get_pixel(3, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_saturation_threshold_is_inclusive() {
        // spread 12 over value 100 rounds to exactly 31; 11 rounds to 28.
        let above = segment(&RgbImage::from_pixel(1, 1, Rgb([100, 88, 88])));
        let below = segment(&RgbImage::from_pixel(1, 1, Rgb([100, 89, 89])));

        assert_eq!(above.mask.get_pixel(0, 0)[0], 255);
        assert_eq!(below.mask.get_pixel(0, 0)[0], 0);
    }
}
