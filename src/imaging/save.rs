//! Image saving utilities.

use std::io::Cursor;
use std::path::Path;

use image::{ImageFormat, RgbImage};

use crate::error::{Error, Result};

/// Encode an RGB image as a PNG byte buffer.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|source| Error::ImageEncode { source })?;

    Ok(bytes)
}

/// Save an RGB image as a PNG file.
///
/// # Errors
///
/// Returns an error if the image cannot be saved.
pub fn save_png<P: AsRef<Path>>(img: &RgbImage, path: P) -> Result<()> {
    let path = path.as_ref();

    img.save_with_format(path, ImageFormat::Png)
        .map_err(|source| Error::ImageSave {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_encode_png_signature() {
        let img = RgbImage::from_pixel(4, 3, Rgb([1, 2, 3]));
        let bytes = encode_png(&img).unwrap();

        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn test_encode_png_decodes_back() {
        let img = RgbImage::from_pixel(7, 2, Rgb([200, 100, 50]));
        let bytes = encode_png(&img).unwrap();

        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded, img);
    }
}
