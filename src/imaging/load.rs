//! Image loading utilities.

use std::path::Path;

use image::{imageops::FilterType, DynamicImage, RgbImage};

use crate::error::{Error, ImageRole, Result};

use super::MAX_DIMENSION;

/// Decode an encoded image buffer into a 3-channel RGB image.
///
/// Grayscale inputs are expanded to three channels and alpha is dropped,
/// so every later stage sees the same pixel layout.
///
/// # Errors
///
/// Returns [`Error::ImageDecode`] if the bytes are not a supported image.
pub fn decode_image(bytes: &[u8], role: ImageRole) -> Result<RgbImage> {
    let img = image::load_from_memory(bytes).map_err(|source| Error::ImageDecode { role, source })?;

    Ok(normalize(&img))
}

/// Load an image from disk as a 3-channel RGB image.
///
/// # Errors
///
/// Returns an error if the image cannot be loaded.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<RgbImage> {
    let path = path.as_ref();

    let img = image::open(path).map_err(|source| Error::ImageLoad {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(normalize(&img))
}

fn normalize(img: &DynamicImage) -> RgbImage {
    match img {
        DynamicImage::ImageRgb8(rgb) => rgb.clone(),
        other => other.to_rgb8(),
    }
}

/// Scale factor that brings the larger of two images within `max_dim`.
///
/// Returns `None` when both images already fit.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn fit_scale(first: (u32, u32), second: (u32, u32), max_dim: u32) -> Option<f64> {
    let longest = first.0.max(first.1).max(second.0).max(second.1);
    if longest <= max_dim {
        return None;
    }

    Some(f64::from(max_dim) / f64::from(longest))
}

/// Rescale both images by one common factor so neither exceeds
/// [`MAX_DIMENSION`] on its longest side.
#[must_use]
pub fn resize_pair(before: RgbImage, after: RgbImage) -> (RgbImage, RgbImage) {
    let Some(scale) = fit_scale(before.dimensions(), after.dimensions(), MAX_DIMENSION) else {
        return (before, after);
    };

    tracing::debug!(
        "Rescaling pair by {scale:.4} ({:?}, {:?})",
        before.dimensions(),
        after.dimensions()
    );

    (scale_image(&before, scale), scale_image(&after, scale))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scale_image(img: &RgbImage, scale: f64) -> RgbImage {
    // Safe: scale <= 1, so the rounded sides never exceed the originals
    let width = ((f64::from(img.width()) * scale).round() as u32).max(1);
    let height = ((f64::from(img.height()) * scale).round() as u32).max(1);

    image::imageops::resize(img, width, height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma, Rgb, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(img: &DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_decode_gray_to_rgb() {
        let gray = GrayImage::from_pixel(8, 6, Luma([90]));
        let bytes = png_bytes(&DynamicImage::ImageLuma8(gray));

        let rgb = decode_image(&bytes, ImageRole::Before).unwrap();

        assert_eq!(rgb.dimensions(), (8, 6));
        assert_eq!(*rgb.get_pixel(3, 3), Rgb([90, 90, 90]));
    }

    #[test]
    fn test_decode_drops_alpha() {
        let rgba = RgbaImage::from_pixel(5, 5, Rgba([10, 20, 30, 40]));
        let bytes = png_bytes(&DynamicImage::ImageRgba8(rgba));

        let rgb = decode_image(&bytes, ImageRole::After).unwrap();

        assert_eq!(*rgb.get_pixel(0, 0), Rgb([10, 20, 30]));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = decode_image(b"definitely not an image", ImageRole::After).unwrap_err();
        assert!(matches!(
            err,
            Error::ImageDecode {
                role: ImageRole::After,
                ..
            }
        ));
    }

    #[test]
    fn test_fit_scale_within_bound() {
        assert_eq!(fit_scale((800, 600), (1024, 10), 1024), None);
    }

    #[test]
    fn test_fit_scale_uses_largest_side() {
        let scale = fit_scale((2048, 1000), (500, 4096), 1024).unwrap();
        assert!((scale - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_resize_caps_and_keeps_aspect() {
        let before = RgbImage::new(3000, 1200);
        let after = RgbImage::new(1500, 2000);

        let (b, a) = resize_pair(before, after);

        assert_eq!(b.width(), 1024);
        assert!(b.width().max(b.height()) <= MAX_DIMENSION);
        assert!(a.width().max(a.height()) <= MAX_DIMENSION);

        let ratio_in = 3000.0 / 1200.0;
        let ratio_out = f64::from(b.width()) / f64::from(b.height());
        assert!((ratio_in - ratio_out).abs() < 0.01);

        let ratio_in = 1500.0 / 2000.0;
        let ratio_out = f64::from(a.width()) / f64::from(a.height());
        assert!((ratio_in - ratio_out).abs() < 0.01);
    }

    #[test]
    fn test_resize_small_pair_untouched() {
        let before = RgbImage::new(200, 100);
        let after = RgbImage::new(100, 200);

        let (b, a) = resize_pair(before, after);

        assert_eq!(b.dimensions(), (200, 100));
        assert_eq!(a.dimensions(), (100, 200));
    }
}
