//! Fusion of intensity, structural, and edge dissimilarity into one field.

use image::GrayImage;
use imageproc::edges::canny;
use ndarray::{s, Array2, Zip};

use crate::error::{Error, Result};

/// Per-pixel dissimilarity in [0, 1], indexed `[[y, x]]`.
pub type DifferenceField = Array2<f32>;

/// Canny hysteresis thresholds.
pub const CANNY_LOW: f32 = 50.0;
pub const CANNY_HIGH: f32 = 150.0;

/// Gaussian window of the structural similarity index.
const SSIM_SIGMA: f64 = 1.5;
const SSIM_RADIUS: usize = 5;
const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;
const DATA_RANGE: f64 = 255.0;

/// Smallest side the SSIM window fits into.
#[allow(clippy::cast_possible_truncation)]
pub const MIN_SIDE: u32 = (2 * SSIM_RADIUS + 1) as u32;

/// Half-width of the 15x15 edge density box filter.
const DENSITY_RADIUS: usize = 7;

// Fusion weights, plain and edge-aware modes.
const PLAIN_PIXEL_WEIGHT: f64 = 0.5;
const PLAIN_STRUCTURE_WEIGHT: f64 = 0.5;
const EDGE_PIXEL_WEIGHT: f64 = 0.2;
const EDGE_STRUCTURE_WEIGHT: f64 = 0.2;
const EDGE_DELTA_WEIGHT: f64 = 0.3;
const EDGE_DENSITY_WEIGHT: f64 = 0.3;

/// Output of the difference engine.
#[derive(Debug, Clone)]
pub struct Difference {
    /// Fused dissimilarity field.
    pub field: DifferenceField,
    /// Mean structural similarity over window-complete pixels, in [-1, 1].
    pub ssim_score: f64,
}

/// Compare two aligned grayscale images.
///
/// Without edge detection the field is the mean of the pixel delta and the
/// structural dissimilarity. With it, Canny edge deltas and local edge
/// density deltas are mixed in and weighted more heavily.
///
/// # Errors
///
/// Returns an error if the images differ in size or are smaller than the
/// structural similarity window.
pub fn compute_difference(
    before: &GrayImage,
    after: &GrayImage,
    use_edge_detection: bool,
) -> Result<Difference> {
    if before.dimensions() != after.dimensions() {
        return Err(Error::DimensionMismatch {
            before: before.dimensions(),
            after: after.dimensions(),
        });
    }
    let (width, height) = after.dimensions();
    if width < MIN_SIDE || height < MIN_SIDE {
        return Err(Error::ImageTooSmall {
            width,
            height,
            min: MIN_SIDE,
        });
    }

    let a = to_array(before);
    let b = to_array(after);

    let pixel = Zip::from(&a).and(&b).map_collect(|&x, &y| (x - y).abs() / 255.0);
    let (ssim_map, ssim_score) = structural_similarity(&a, &b);
    let structural = ssim_map.mapv(|v| (1.0 - v).clamp(0.0, 1.0));

    let field = if use_edge_detection {
        let e1 = to_array(&canny(before, CANNY_LOW, CANNY_HIGH)).mapv(|v| v / 255.0);
        let e2 = to_array(&canny(after, CANNY_LOW, CANNY_HIGH)).mapv(|v| v / 255.0);

        let edge = Zip::from(&e1).and(&e2).map_collect(|&x, &y| (x - y).abs());
        let d1 = box_mean(&e1, DENSITY_RADIUS);
        let d2 = box_mean(&e2, DENSITY_RADIUS);
        let density = Zip::from(&d1).and(&d2).map_collect(|&x, &y| (x - y).abs());

        Zip::from(&pixel)
            .and(&structural)
            .and(&edge)
            .and(&density)
            .map_collect(|&p, &s, &e, &d| {
                fuse(
                    EDGE_PIXEL_WEIGHT * p
                        + EDGE_STRUCTURE_WEIGHT * s
                        + EDGE_DELTA_WEIGHT * e
                        + EDGE_DENSITY_WEIGHT * d,
                )
            })
    } else {
        Zip::from(&pixel)
            .and(&structural)
            .map_collect(|&p, &s| fuse(PLAIN_PIXEL_WEIGHT * p + PLAIN_STRUCTURE_WEIGHT * s))
    };

    tracing::debug!(
        "Difference field {width}x{height}, ssim {ssim_score:.4}, edges {use_edge_detection}"
    );

    Ok(Difference { field, ssim_score })
}

#[allow(clippy::cast_possible_truncation)]
fn fuse(value: f64) -> f32 {
    value.clamp(0.0, 1.0) as f32
}

fn to_array(img: &GrayImage) -> Array2<f64> {
    let (width, height) = img.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        // Safe: indices come from the image's own shape
        #[allow(clippy::cast_possible_truncation)]
        let p = img.get_pixel(x as u32, y as u32);
        f64::from(p[0])
    })
}

/// Full SSIM map and its mean over pixels whose window lies inside the image.
fn structural_similarity(a: &Array2<f64>, b: &Array2<f64>) -> (Array2<f64>, f64) {
    let kernel = gaussian_kernel(SSIM_SIGMA, SSIM_RADIUS);
    let blur = |m: &Array2<f64>| convolve_separable(m, &kernel, reflect);

    let ux = blur(a);
    let uy = blur(b);
    let uxx = blur(&(a * a));
    let uyy = blur(&(b * b));
    let uxy = blur(&(a * b));

    let c1 = (SSIM_K1 * DATA_RANGE).powi(2);
    let c2 = (SSIM_K2 * DATA_RANGE).powi(2);

    let map = Zip::from(&ux)
        .and(&uy)
        .and(&uxx)
        .and(&uyy)
        .and(&uxy)
        .map_collect(|&mx, &my, &mxx, &myy, &mxy| {
            let vx = mxx - mx * mx;
            let vy = myy - my * my;
            let vxy = mxy - mx * my;
            ((2.0 * mx * my + c1) * (2.0 * vxy + c2))
                / ((mx * mx + my * my + c1) * (vx + vy + c2))
        });

    let (rows, cols) = map.dim();
    let pad = SSIM_RADIUS;
    let score = map
        .slice(s![pad..rows - pad, pad..cols - pad])
        .mean()
        .unwrap_or(1.0);

    (map, score)
}

#[allow(clippy::cast_precision_loss)]
fn gaussian_kernel(sigma: f64, radius: usize) -> Vec<f64> {
    let weights: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let d = i as f64 - radius as f64;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Mean over a `(2r+1)^2` window, borders mirrored without repeating the edge.
#[allow(clippy::cast_precision_loss)]
fn box_mean(m: &Array2<f64>, radius: usize) -> Array2<f64> {
    let taps = 2 * radius + 1;
    let kernel = vec![1.0 / taps as f64; taps];
    convolve_separable(m, &kernel, reflect_101)
}

/// Mirror index: `d c b a | a b c d`.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn reflect(i: isize, n: usize) -> usize {
    let n = n as isize;
    let m = i.rem_euclid(2 * n);
    (if m >= n { 2 * n - 1 - m } else { m }) as usize
}

/// Mirror index: `d c b | a b c d`.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn reflect_101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let period = 2 * n - 2;
    let m = i.rem_euclid(period);
    (if m >= n { period - m } else { m }) as usize
}

#[allow(clippy::cast_possible_wrap)]
fn convolve_separable(
    m: &Array2<f64>,
    kernel: &[f64],
    border: fn(isize, usize) -> usize,
) -> Array2<f64> {
    let (rows, cols) = m.dim();
    let radius = (kernel.len() / 2) as isize;

    let mut horizontal = Array2::<f64>::zeros((rows, cols));
    for y in 0..rows {
        for x in 0..cols {
            horizontal[[y, x]] = kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * m[[y, border(x as isize + k as isize - radius, cols)]])
                .sum();
        }
    }

    let mut out = Array2::<f64>::zeros((rows, cols));
    for y in 0..rows {
        for x in 0..cols {
            out[[y, x]] = kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * horizontal[[border(y as isize + k as isize - radius, rows), x]])
                .sum();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise(width: u32, height: u32, seed: u64) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        GrayImage::from_fn(width, height, |_, _| Luma([rng.random()]))
    }

    fn square_at(x0: u32, y0: u32) -> GrayImage {
        GrayImage::from_fn(96, 96, |x, y| {
            let inside = (x0..x0 + 24).contains(&x) && (y0..y0 + 24).contains(&y);
            Luma([if inside { 230 } else { 40 }])
        })
    }

    #[test]
    fn test_identical_images() {
        let img = noise(64, 48, 3);

        for edges in [false, true] {
            let diff = compute_difference(&img, &img, edges).unwrap();
            assert!((diff.ssim_score - 1.0).abs() < 1e-9);
            assert!(diff.field.iter().all(|&v| v.abs() < 1e-6));
            assert_eq!(diff.field.dim(), (48, 64));
        }
    }

    #[test]
    fn test_field_in_unit_range() {
        let a = noise(50, 40, 1);
        let b = noise(50, 40, 2);

        for edges in [false, true] {
            let diff = compute_difference(&a, &b, edges).unwrap();
            assert!(diff.field.iter().all(|&v| (0.0..=1.0).contains(&v)));
            assert!((-1.0..=1.0).contains(&diff.ssim_score));
            assert!(diff.ssim_score < 0.5);
        }
    }

    #[test]
    fn test_inverted_image_saturates() {
        let a = noise(32, 32, 9);
        let b = GrayImage::from_fn(32, 32, |x, y| Luma([255 - a.get_pixel(x, y)[0]]));

        let diff = compute_difference(&a, &b, false).unwrap();

        assert!(diff.field.iter().all(|&v| v <= 1.0));
        assert!(diff.ssim_score < 0.0);
    }

    #[test]
    fn test_moved_square_lights_up() {
        let before = square_at(16, 16);
        let after = square_at(52, 52);

        for edges in [false, true] {
            let diff = compute_difference(&before, &after, edges).unwrap();
            assert!(diff.field[[64, 64]] > 0.25, "edges={edges}");
            assert!(diff.field[[2, 90]] < 0.05, "edges={edges}");
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = GrayImage::new(40, 30);
        let b = GrayImage::new(30, 40);

        let err = compute_difference(&a, &b, false).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn test_too_small() {
        let a = GrayImage::new(10, 40);

        let err = compute_difference(&a, &a, false).unwrap_err();
        assert!(matches!(err, Error::ImageTooSmall { min: 11, .. }));
    }

    #[test]
    fn test_reflect_borders() {
        assert_eq!(reflect(-1, 5), 0);
        assert_eq!(reflect(-2, 5), 1);
        assert_eq!(reflect(5, 5), 4);
        assert_eq!(reflect_101(-1, 5), 1);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(3, 1), 0);
    }

    #[test]
    fn test_box_mean_of_constant() {
        let m = Array2::from_elem((9, 12), 0.25);
        let out = box_mean(&m, DENSITY_RADIUS);
        assert!(out.iter().all(|&v| (v - 0.25).abs() < 1e-12));
    }
}
