//! Heat map and annotated overlays for a finished comparison.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use super::difference::DifferenceField;
use super::regions::ChangeRegion;

/// Regions drawn on the annotated image.
pub const TOP_REGIONS: usize = 10;

/// Box color of the largest region.
pub const PRIMARY_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Box color of every other annotated region.
pub const SECONDARY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Gap between a box's top edge and the bottom of its label.
const LABEL_OFFSET: i64 = 10;

/// Each font pixel is drawn as a `LABEL_SCALE` square.
const LABEL_SCALE: i64 = 2;

const GLYPH_WIDTH: i64 = 5;
const GLYPH_HEIGHT: i64 = 7;

/// Render both output images.
#[must_use]
pub fn render(
    after: &RgbImage,
    field: &DifferenceField,
    regions: &[ChangeRegion],
) -> (RgbImage, RgbImage) {
    (heat_map(field), annotate(after, regions))
}

/// Map a field onto a blue-to-red jet palette.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn heat_map(field: &DifferenceField) -> RgbImage {
    let (rows, cols) = field.dim();
    let mut out = RgbImage::new(cols as u32, rows as u32);
    for ((y, x), &v) in field.indexed_iter() {
        // Truncate like an 8-bit cast; `as` saturates out-of-range values
        let level = (v * 255.0) as u8;
        out.put_pixel(x as u32, y as u32, jet(level));
    }
    out
}

/// Jet color for an 8-bit level: dark blue at 0, dark red at 255.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn jet(level: u8) -> Rgb<u8> {
    let t = f32::from(level) / 255.0;
    let channel = |center: f32| {
        let v = (1.5 - 4.0f32.mul_add(t, -center).abs()).clamp(0.0, 1.0);
        (v * 255.0).round() as u8
    };
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// Copy `after` and outline the largest regions with ranked labels.
#[must_use]
pub fn annotate(after: &RgbImage, regions: &[ChangeRegion]) -> RgbImage {
    let mut out = after.clone();

    for (rank, region) in regions.iter().take(TOP_REGIONS).enumerate() {
        let color = if rank == 0 {
            PRIMARY_COLOR
        } else {
            SECONDARY_COLOR
        };
        let b = region.bbox;
        let (x, y) = (i64::from(b.x), i64::from(b.y));

        draw_box(&mut out, x, y, b.width, b.height, color);
        draw_label(&mut out, &format!("#{}", rank + 1), x, y - LABEL_OFFSET, color);
    }

    out
}

/// Two pixel thick outline spanning `(x, y)` to `(x + w, y + h)` inclusive.
#[allow(clippy::cast_possible_truncation)]
fn draw_box(img: &mut RgbImage, x: i64, y: i64, w: u32, h: u32, color: Rgb<u8>) {
    // Safe: region boxes come from image coordinates well inside i32
    let (x, y) = (x as i32, y as i32);
    draw_hollow_rect_mut(img, Rect::at(x, y).of_size(w + 1, h + 1), color);
    draw_hollow_rect_mut(img, Rect::at(x - 1, y - 1).of_size(w + 3, h + 3), color);
}

/// 5x7 bitmap rows for the label alphabet; unknown characters draw a box.
const fn glyph(c: char) -> [u8; 7] {
    match c {
        '#' => [0b01010, 0b01010, 0b11111, 0b01010, 0b11111, 0b01010, 0b01010],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00110, 0b01000, 0b10000, 0b11111],
        '3' => [0b01110, 0b10001, 0b00001, 0b00110, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b01110, 0b10000, 0b11110, 0b10001, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00001, 0b01110],
        _ => [0b11111, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11111],
    }
}

/// Draw `text` with its bottom-left corner at `(x, bottom)`, clipped to the image.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn draw_label(img: &mut RgbImage, text: &str, x: i64, bottom: i64, color: Rgb<u8>) {
    let (w, h) = (i64::from(img.width()), i64::from(img.height()));
    let top = bottom - GLYPH_HEIGHT * LABEL_SCALE;
    let mut cursor = x;

    for c in text.chars() {
        for (row, bits) in (0_i64..).zip(glyph(c)) {
            for col in 0..GLYPH_WIDTH {
                if (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                    continue;
                }
                for dy in 0..LABEL_SCALE {
                    for dx in 0..LABEL_SCALE {
                        let px = cursor + col * LABEL_SCALE + dx;
                        let py = top + row * LABEL_SCALE + dy;
                        if (0..w).contains(&px) && (0..h).contains(&py) {
                            img.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
        cursor += (GLYPH_WIDTH + 1) * LABEL_SCALE;
    }
}
