//! Homography estimation between matched keypoints.
//!
//! Direct linear transform with Hartley normalization, wrapped in a seeded
//! RANSAC loop so repeated runs on the same matches give the same model.

use nalgebra::{DMatrix, Matrix3, SymmetricEigen, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

/// 2D point correspondence source.
pub type Point2 = [f64; 2];

/// Minimal sample size for a projective fit.
const MIN_SAMPLE: usize = 4;

/// Errors from homography fitting.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HomographyError {
    /// Fewer correspondences than the model needs.
    #[error("too few points: need {needed}, got {got}")]
    TooFewPoints { needed: usize, got: usize },

    /// The linear system was degenerate.
    #[error("numerical failure: {0}")]
    NumericalFailure(String),

    /// No hypothesis gathered enough support.
    #[error("insufficient inliers: need {needed}, found {found}")]
    InsufficientInliers { needed: usize, found: usize },
}

/// RANSAC parameters for homography fitting.
#[derive(Debug, Clone)]
pub struct RansacConfig {
    /// Upper bound on hypotheses drawn.
    pub max_iters: usize,
    /// Reprojection error (px) below which a match counts as an inlier.
    pub inlier_threshold: f64,
    /// Minimum support for the final model.
    pub min_inliers: usize,
    /// Desired probability of drawing at least one all-inlier sample.
    pub confidence: f64,
    /// Seed for hypothesis sampling.
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iters: 2000,
            inlier_threshold: 3.0,
            min_inliers: MIN_SAMPLE,
            confidence: 0.995,
            seed: 0x5EED,
        }
    }
}

/// A fitted homography and its support.
#[derive(Debug, Clone)]
pub struct RansacFit {
    /// Maps source points onto destination points.
    pub h: Matrix3<f64>,
    /// True for correspondences within the inlier threshold.
    pub inlier_mask: Vec<bool>,
    /// Number of inliers under `h`.
    pub n_inliers: usize,
}

/// Project a point through `h`. Returns `None` for points mapped to infinity.
#[must_use]
pub fn project(h: &Matrix3<f64>, p: Point2) -> Option<Point2> {
    let q = h * Vector3::new(p[0], p[1], 1.0);
    if q[2].abs() < 1e-15 {
        return None;
    }
    Some([q[0] / q[2], q[1] / q[2]])
}

fn reprojection_error(h: &Matrix3<f64>, src: Point2, dst: Point2) -> f64 {
    project(h, src).map_or(f64::INFINITY, |p| {
        (p[0] - dst[0]).hypot(p[1] - dst[1])
    })
}

/// Translate the centroid to the origin and scale the mean radius to sqrt(2).
#[allow(clippy::cast_precision_loss)]
fn normalize(points: &[Point2]) -> (Matrix3<f64>, Vec<Point2>) {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = points.iter().map(|p| p[1]).sum::<f64>() / n;

    let mean_dist = points
        .iter()
        .map(|p| (p[0] - cx).hypot(p[1] - cy))
        .sum::<f64>()
        / n;

    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = points
        .iter()
        .map(|p| [s * (p[0] - cx), s * (p[1] - cy)])
        .collect();

    (t, normalized)
}

/// Estimate a homography from at least four correspondences.
///
/// # Errors
///
/// Returns an error for too few points or a degenerate configuration.
pub fn estimate_dlt(src: &[Point2], dst: &[Point2]) -> Result<Matrix3<f64>, HomographyError> {
    let n = src.len().min(dst.len());
    if n < MIN_SAMPLE {
        return Err(HomographyError::TooFewPoints {
            needed: MIN_SAMPLE,
            got: n,
        });
    }

    let (t_src, src_n) = normalize(&src[..n]);
    let (t_dst, dst_n) = normalize(&dst[..n]);

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for (i, (s, d)) in src_n.iter().zip(&dst_n).enumerate() {
        let (sx, sy) = (s[0], s[1]);
        let (dx, dy) = (d[0], d[1]);

        let r = 2 * i;
        a[(r, 3)] = -sx;
        a[(r, 4)] = -sy;
        a[(r, 5)] = -1.0;
        a[(r, 6)] = dy * sx;
        a[(r, 7)] = dy * sy;
        a[(r, 8)] = dy;

        a[(r + 1, 0)] = sx;
        a[(r + 1, 1)] = sy;
        a[(r + 1, 2)] = 1.0;
        a[(r + 1, 6)] = -dx * sx;
        a[(r + 1, 7)] = -dx * sy;
        a[(r + 1, 8)] = -dx;
    }

    // Null vector of A is the eigenvector of A^T A with the smallest eigenvalue.
    let eig = SymmetricEigen::new(a.transpose() * &a);
    let min_idx = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.abs().total_cmp(&y.1.abs()))
        .map(|(i, _)| i)
        .ok_or_else(|| HomographyError::NumericalFailure("empty eigen decomposition".into()))?;

    let v = eig.eigenvectors.column(min_idx);
    let h_norm = Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8]);

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| HomographyError::NumericalFailure("normalization not invertible".into()))?;
    let h = t_dst_inv * h_norm * t_src;

    let scale = h[(2, 2)];
    if !scale.is_finite() || scale.abs() < 1e-12 {
        return Err(HomographyError::NumericalFailure(
            "homography has vanishing scale".into(),
        ));
    }

    let h = h / scale;
    if h.determinant().abs() < 1e-12 || h.iter().any(|v| !v.is_finite()) {
        return Err(HomographyError::NumericalFailure("singular homography".into()));
    }

    Ok(h)
}

fn score(h: &Matrix3<f64>, src: &[Point2], dst: &[Point2], threshold: f64) -> (usize, Vec<bool>) {
    let mask: Vec<bool> = src
        .iter()
        .zip(dst)
        .map(|(s, d)| reprojection_error(h, *s, *d) < threshold)
        .collect();
    let count = mask.iter().filter(|&&m| m).count();
    (count, mask)
}

/// Number of hypotheses needed to hit an all-inlier sample with `confidence`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn required_iterations(inliers: usize, total: usize, confidence: f64, max_iters: usize) -> usize {
    let ratio = inliers as f64 / total as f64;
    let p_good = ratio.powi(MIN_SAMPLE as i32);
    if p_good >= 1.0 - f64::EPSILON {
        return 1;
    }
    if p_good <= f64::EPSILON {
        return max_iters;
    }

    let needed = (1.0 - confidence).ln() / (1.0 - p_good).ln();
    if needed.is_finite() {
        (needed.ceil() as usize).clamp(1, max_iters)
    } else {
        max_iters
    }
}

/// Fit a homography robustly, discarding outlier correspondences.
///
/// The best hypothesis is refit on all of its inliers before returning.
///
/// # Errors
///
/// Returns an error when fewer than four points are given or no hypothesis
/// reaches `config.min_inliers`.
pub fn fit_ransac(
    src: &[Point2],
    dst: &[Point2],
    config: &RansacConfig,
) -> Result<RansacFit, HomographyError> {
    let n = src.len().min(dst.len());
    if n < MIN_SAMPLE {
        return Err(HomographyError::TooFewPoints {
            needed: MIN_SAMPLE,
            got: n,
        });
    }
    let (src, dst) = (&src[..n], &dst[..n]);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Option<(Matrix3<f64>, usize, Vec<bool>)> = None;
    let mut budget = config.max_iters;
    let mut iter = 0;

    while iter < budget {
        iter += 1;

        let sample = rand::seq::index::sample(&mut rng, n, MIN_SAMPLE);
        let s: Vec<Point2> = sample.iter().map(|i| src[i]).collect();
        let d: Vec<Point2> = sample.iter().map(|i| dst[i]).collect();

        let Ok(h) = estimate_dlt(&s, &d) else {
            continue;
        };

        let (count, mask) = score(&h, src, dst, config.inlier_threshold);
        if best.as_ref().map_or(true, |(_, c, _)| count > *c) {
            budget = required_iterations(count, n, config.confidence, config.max_iters).max(iter);
            best = Some((h, count, mask));
        }
    }

    let Some((best_h, best_count, best_mask)) = best else {
        return Err(HomographyError::NumericalFailure(
            "every sample was degenerate".into(),
        ));
    };

    if best_count < config.min_inliers {
        return Err(HomographyError::InsufficientInliers {
            needed: config.min_inliers,
            found: best_count,
        });
    }

    let inlier_src: Vec<Point2> = src
        .iter()
        .zip(&best_mask)
        .filter_map(|(p, &m)| m.then_some(*p))
        .collect();
    let inlier_dst: Vec<Point2> = dst
        .iter()
        .zip(&best_mask)
        .filter_map(|(p, &m)| m.then_some(*p))
        .collect();

    let h = estimate_dlt(&inlier_src, &inlier_dst).unwrap_or(best_h);
    let (n_inliers, inlier_mask) = score(&h, src, dst, config.inlier_threshold);

    // Keep the hypothesis if refitting lost support.
    if n_inliers < best_count {
        return Ok(RansacFit {
            h: best_h,
            inlier_mask: best_mask,
            n_inliers: best_count,
        });
    }

    Ok(RansacFit {
        h,
        inlier_mask,
        n_inliers,
    })
}
