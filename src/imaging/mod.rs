//! Image decoding, normalization, and encoding utilities.

mod load;
mod save;

pub use load::{decode_image, fit_scale, load_image, resize_pair};
pub use save::{encode_png, save_png};

use image::{GrayImage, Luma, RgbImage};

/// Longest side either input may have once the pair is rescaled.
pub const MAX_DIMENSION: u32 = 1024;

/// Derive the grayscale field of an RGB image.
///
/// Uses the 0.299 R + 0.587 G + 0.114 B luma weights rather than the
/// Rec. 709 weights of `image::DynamicImage::to_luma8`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn to_gray(image: &RgbImage) -> GrayImage {
    let mut gray = GrayImage::new(image.width(), image.height());

    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        // Safe: a convex combination of u8 values stays within [0, 255]
        let luma = 0.299_f32
            .mul_add(f32::from(r), 0.587_f32.mul_add(f32::from(g), 0.114 * f32::from(b)))
            .round()
            .clamp(0.0, 255.0) as u8;
        gray.put_pixel(x, y, Luma([luma]));
    }

    gray
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_gray_weights() {
        let mut img = RgbImage::new(3, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));
        img.put_pixel(2, 0, Rgb([0, 0, 255]));

        let gray = to_gray(&img);

        assert_eq!(gray.get_pixel(0, 0)[0], 76);
        assert_eq!(gray.get_pixel(1, 0)[0], 150);
        assert_eq!(gray.get_pixel(2, 0)[0], 29);
    }

    #[test]
    fn test_gray_preserves_neutral() {
        let img = RgbImage::from_pixel(4, 4, Rgb([128, 128, 128]));
        let gray = to_gray(&img);

        assert_eq!(gray.dimensions(), (4, 4));
        assert!(gray.pixels().all(|p| p[0] == 128));
    }
}
