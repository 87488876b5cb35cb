//! Feature-based registration of the "before" image onto the "after" frame.

mod features;
mod homography;

pub use features::{detect_and_describe, match_cross_checked, Descriptor, Features, Keypoint, Match};
pub use homography::{estimate_dlt, fit_ransac, project, HomographyError, RansacConfig, RansacFit};

use image::{GrayImage, Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use nalgebra::Matrix3;

use crate::imaging::to_gray;

/// Keypoints detected per image.
pub const MAX_FEATURES: usize = 5000;

/// Alignment needs strictly more matches than this.
pub const MIN_MATCHES: usize = 10;

/// Best matches handed to the homography fit.
pub const FIT_MATCHES: usize = 50;

/// Why the "before" image was passed through unaligned.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// One of the images produced no descriptors.
    NoDescriptors,
    /// Cross-checked matching left too few correspondences.
    TooFewMatches { found: usize },
    /// The homography fit failed.
    Homography(HomographyError),
    /// The fitted homography could not be used for resampling.
    NotInvertible,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoDescriptors => f.write_str("no descriptors"),
            Self::TooFewMatches { found } => {
                write!(f, "{found} matches, need more than {MIN_MATCHES}")
            }
            Self::Homography(err) => write!(f, "{err}"),
            Self::NotInvertible => f.write_str("homography not invertible"),
        }
    }
}

/// What the aligner did.
#[derive(Debug, Clone, PartialEq)]
pub enum AlignOutcome {
    /// The image was warped through a fitted homography.
    Warped {
        matches: usize,
        inliers: usize,
        homography: Matrix3<f64>,
    },
    /// The image was returned unchanged.
    Skipped(SkipReason),
}

impl AlignOutcome {
    #[must_use]
    pub const fn is_warped(&self) -> bool {
        matches!(self, Self::Warped { .. })
    }
}

/// The "before" image in the "after" frame, plus its grayscale field.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub image: RgbImage,
    pub gray: GrayImage,
    pub outcome: AlignOutcome,
}

/// Align `before` onto the pixel grid of `after`.
///
/// When too little shared structure exists the "before" image is returned
/// unchanged with its own grayscale; this is a normal outcome, not an
/// error.
#[must_use]
pub fn align(before: &RgbImage, after: &RgbImage) -> Alignment {
    let before_gray = to_gray(before);
    let after_gray = to_gray(after);

    let fit = match estimate(&before_gray, &after_gray) {
        Ok(fit) => fit,
        Err(reason) => return skipped(before, before_gray, reason),
    };

    let Some(projection) = to_projection(&fit.h) else {
        return skipped(before, before_gray, SkipReason::NotInvertible);
    };

    let (width, height) = after.dimensions();
    let mut image = RgbImage::new(width, height);
    warp_into(
        before,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut image,
    );
    let gray = to_gray(&image);

    tracing::debug!(
        "Aligned with {} matches, {} inliers",
        fit.matches,
        fit.inliers
    );

    Alignment {
        image,
        gray,
        outcome: AlignOutcome::Warped {
            matches: fit.matches,
            inliers: fit.inliers,
            homography: fit.h,
        },
    }
}

struct Fit {
    h: Matrix3<f64>,
    matches: usize,
    inliers: usize,
}

fn estimate(before: &GrayImage, after: &GrayImage) -> Result<Fit, SkipReason> {
    let query = detect_and_describe(before, MAX_FEATURES);
    let train = detect_and_describe(after, MAX_FEATURES);
    if query.is_empty() || train.is_empty() {
        return Err(SkipReason::NoDescriptors);
    }

    let matches = match_cross_checked(&query.descriptors, &train.descriptors);
    if matches.len() <= MIN_MATCHES {
        return Err(SkipReason::TooFewMatches {
            found: matches.len(),
        });
    }

    let best = &matches[..matches.len().min(FIT_MATCHES)];
    let src: Vec<[f64; 2]> = best
        .iter()
        .map(|m| {
            let kp = query.keypoints[m.query];
            [f64::from(kp.x), f64::from(kp.y)]
        })
        .collect();
    let dst: Vec<[f64; 2]> = best
        .iter()
        .map(|m| {
            let kp = train.keypoints[m.train];
            [f64::from(kp.x), f64::from(kp.y)]
        })
        .collect();

    let fit = fit_ransac(&src, &dst, &RansacConfig::default()).map_err(SkipReason::Homography)?;

    Ok(Fit {
        h: fit.h,
        matches: matches.len(),
        inliers: fit.n_inliers,
    })
}

#[allow(clippy::cast_possible_truncation)]
fn to_projection(h: &Matrix3<f64>) -> Option<Projection> {
    let m = [
        h[(0, 0)] as f32,
        h[(0, 1)] as f32,
        h[(0, 2)] as f32,
        h[(1, 0)] as f32,
        h[(1, 1)] as f32,
        h[(1, 2)] as f32,
        h[(2, 0)] as f32,
        h[(2, 1)] as f32,
        h[(2, 2)] as f32,
    ];
    Projection::from_matrix(m)
}

fn skipped(before: &RgbImage, gray: GrayImage, reason: SkipReason) -> Alignment {
    tracing::warn!("Skipping alignment: {reason}");

    Alignment {
        image: before.clone(),
        gray,
        outcome: AlignOutcome::Skipped(reason),
    }
}
