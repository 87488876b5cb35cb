//! Connected change regions extracted from a thresholded difference field.

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::morphology::{grayscale_close, grayscale_open, Mask};
use serde::Serialize;

use super::difference::DifferenceField;

/// Regions must enclose strictly more than this polygon area.
pub const MIN_REGION_AREA: f64 = 100.0;

/// Aspect ratios outside `[TEXT_MIN_ASPECT, TEXT_MAX_ASPECT]` count as elongated.
pub const TEXT_MAX_ASPECT: f64 = 2.5;
pub const TEXT_MIN_ASPECT: f64 = 0.4;

/// Elongated regions with area strictly inside this band look like text.
pub const TEXT_MAX_AREA: f64 = 5000.0;

/// Axis-aligned box in pixel coordinates, serialized as `[x, y, w, h]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "[u32; 4]")]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl From<BoundingBox> for [u32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}

/// A ranked connected component of the change mask.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeRegion {
    pub bbox: BoundingBox,
    pub area: f64,
    pub aspect_ratio: f64,
}

/// Elongated, small-to-medium regions are most likely lines of text.
#[must_use]
pub fn is_text_region(region: &ChangeRegion) -> bool {
    let elongated =
        region.aspect_ratio > TEXT_MAX_ASPECT || region.aspect_ratio < TEXT_MIN_ASPECT;
    let sized = region.area > MIN_REGION_AREA && region.area < TEXT_MAX_AREA;
    elongated && sized
}

/// Threshold the field, clean the mask, and rank its outer contours.
///
/// Returns every surviving region, largest first, together with the cleaned
/// binary mask (0 or 255 per pixel).
#[must_use]
pub fn find_changes(
    field: &DifferenceField,
    sensitivity: f32,
    filter_text: bool,
) -> (Vec<ChangeRegion>, GrayImage) {
    let mask = clean(&binarize(field, sensitivity));

    let mut regions: Vec<ChangeRegion> = find_contours::<i32>(&mask)
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter_map(region_of)
        .filter(|r| !(filter_text && is_text_region(r)))
        .collect();

    // Stable: equal areas keep discovery order.
    regions.sort_by(|a, b| b.area.total_cmp(&a.area));

    tracing::debug!("Found {} change regions", regions.len());

    (regions, mask)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn binarize(field: &DifferenceField, sensitivity: f32) -> GrayImage {
    let (rows, cols) = field.dim();
    let mut binary = GrayImage::new(cols as u32, rows as u32);
    for ((y, x), &v) in field.indexed_iter() {
        if v > sensitivity {
            binary.put_pixel(x as u32, y as u32, Luma([255]));
        }
    }
    binary
}

/// 5x5 elliptical structuring element.
fn ellipse() -> Mask {
    const ROWS: [[u8; 5]; 5] = [
        [0, 0, 1, 0, 0],
        [1, 1, 1, 1, 1],
        [1, 1, 1, 1, 1],
        [1, 1, 1, 1, 1],
        [0, 0, 1, 0, 0],
    ];
    #[allow(clippy::cast_possible_truncation)]
    let kernel = GrayImage::from_fn(5, 5, |x, y| Luma([ROWS[y as usize][x as usize] * 255]));
    Mask::from_image(&kernel, 2, 2)
}

/// Closing fills pinholes, opening then drops specks.
fn clean(binary: &GrayImage) -> GrayImage {
    let kernel = ellipse();
    grayscale_open(&grayscale_close(binary, &kernel), &kernel)
}

#[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
fn region_of(contour: &Contour<i32>) -> Option<ChangeRegion> {
    let area = polygon_area(contour);
    if area <= MIN_REGION_AREA {
        return None;
    }

    let first = contour.points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in &contour.points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }

    // Safe: contour points lie inside the image
    let bbox = BoundingBox {
        x: min_x as u32,
        y: min_y as u32,
        width: (max_x - min_x + 1) as u32,
        height: (max_y - min_y + 1) as u32,
    };
    let aspect_ratio = if bbox.height > 0 {
        f64::from(bbox.width) / f64::from(bbox.height)
    } else {
        0.0
    };

    Some(ChangeRegion {
        bbox,
        area,
        aspect_ratio,
    })
}

/// Shoelace area of the closed polygon through the contour points.
fn polygon_area(contour: &Contour<i32>) -> f64 {
    let points = &contour.points;
    if points.len() < 3 {
        return 0.0;
    }

    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| i64::from(a.x) * i64::from(b.y) - i64::from(b.x) * i64::from(a.y))
        .sum();

    #[allow(clippy::cast_precision_loss)]
    let area = twice.unsigned_abs() as f64 / 2.0;
    area
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array2};

    fn field_with(rects: &[(usize, usize, usize, usize)]) -> DifferenceField {
        let mut field = Array2::<f32>::zeros((200, 300));
        for &(x, y, w, h) in rects {
            field.slice_mut(s![y..y + h, x..x + w]).fill(0.8);
        }
        field
    }

    #[test]
    fn test_empty_field_has_no_regions() {
        let field = Array2::<f32>::zeros((80, 120));
        let (regions, mask) = find_changes(&field, 0.15, false);

        assert!(regions.is_empty());
        assert_eq!(mask.dimensions(), (120, 80));
        assert!(mask.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn test_square_patch() {
        let field = field_with(&[(40, 30, 50, 50)]);
        let (regions, mask) = find_changes(&field, 0.15, false);

        assert_eq!(regions.len(), 1);
        let r = &regions[0];
        assert!(r.bbox.x.abs_diff(40) <= 2);
        assert!(r.bbox.y.abs_diff(30) <= 2);
        assert!(r.bbox.width.abs_diff(50) <= 2);
        assert!(r.bbox.height.abs_diff(50) <= 2);
        assert!((r.area - 2500.0).abs() < 250.0, "area {}", r.area);
        assert!((r.aspect_ratio - 1.0).abs() < 0.1);
        assert_eq!(mask.get_pixel(65, 55)[0], 255);
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut field = Array2::<f32>::zeros((60, 60));
        field.slice_mut(s![10..40, 10..40]).fill(0.15);

        let (regions, _) = find_changes(&field, 0.15, false);
        assert!(regions.is_empty());
    }

    #[test]
    fn test_specks_are_removed() {
        let mut field = Array2::<f32>::zeros((60, 60));
        field[[20, 20]] = 1.0;
        field[[40, 10]] = 1.0;
        field.slice_mut(s![5..7, 30..32]).fill(1.0);

        let (regions, mask) = find_changes(&field, 0.15, false);

        assert!(regions.is_empty());
        assert!(mask.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn test_small_region_below_area_threshold() {
        // 10x10 encloses 81 square pixels of polygon area.
        let field = field_with(&[(100, 100, 10, 10)]);
        let (regions, _) = find_changes(&field, 0.15, false);
        assert!(regions.is_empty());
    }

    #[test]
    fn test_text_filter() {
        let field = field_with(&[(20, 20, 10, 150), (150, 40, 60, 60)]);

        let (kept, _) = find_changes(&field, 0.15, false);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().any(is_text_region));

        let (filtered, _) = find_changes(&field, 0.15, true);
        assert_eq!(filtered.len(), 1);
        assert!(filtered[0].bbox.width > 50);
    }

    #[test]
    fn test_is_text_region() {
        let tall = ChangeRegion {
            bbox: BoundingBox {
                x: 0,
                y: 0,
                width: 10,
                height: 200,
            },
            area: 2000.0,
            aspect_ratio: 0.05,
        };
        assert!(is_text_region(&tall));

        let square = ChangeRegion {
            aspect_ratio: 1.0,
            ..tall.clone()
        };
        assert!(!is_text_region(&square));

        let huge = ChangeRegion {
            area: 5000.0,
            ..tall.clone()
        };
        assert!(!is_text_region(&huge));

        let tiny = ChangeRegion { area: 100.0, ..tall };
        assert!(!is_text_region(&tiny));
    }

    #[test]
    fn test_regions_sorted_by_area() {
        let field = field_with(&[(10, 10, 20, 20), (60, 10, 80, 80), (160, 110, 40, 40)]);
        let (regions, _) = find_changes(&field, 0.15, false);

        assert_eq!(regions.len(), 3);
        assert!(regions.windows(2).all(|w| w[0].area >= w[1].area));
        assert!(regions[0].bbox.width.abs_diff(80) <= 2);
    }

    #[test]
    fn test_nested_hole_is_not_a_region() {
        let mut field = field_with(&[(50, 50, 100, 100)]);
        field.slice_mut(s![70..130, 70..130]).fill(0.0);
        field.slice_mut(s![90..110, 90..110]).fill(0.9);

        let (regions, _) = find_changes(&field, 0.15, false);

        assert_eq!(regions.len(), 1);
        assert!(regions[0].bbox.width.abs_diff(100) <= 2);
    }

    #[test]
    fn test_bbox_serializes_as_array() {
        let region = ChangeRegion {
            bbox: BoundingBox {
                x: 1,
                y: 2,
                width: 3,
                height: 4,
            },
            area: 150.0,
            aspect_ratio: 0.75,
        };

        let json = serde_json::to_value(&region).unwrap();
        assert_eq!(json["bbox"], serde_json::json!([1, 2, 3, 4]));
        assert_eq!(json["area"], serde_json::json!(150.0));
    }
}
