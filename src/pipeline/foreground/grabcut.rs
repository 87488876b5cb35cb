//! Seeded foreground/background segmentation by iterated color models.
//!
//! Pixels outside a central seed rectangle are fixed as background. Inside
//! it, every pass refits a Gaussian mixture per side and relabels pixels by
//! minimizing data cost plus a contrast-sensitive smoothness term with
//! iterated conditional modes.

use image::{GrayImage, Luma, RgbImage};
use nalgebra::{Matrix3, Vector3};

use super::{apply_mask, Segmentation, SegmentationError};

/// Fraction of each side excluded from the seed rectangle.
const SEED_MARGIN: f64 = 0.1;
/// Fraction of each side covered by the seed rectangle.
const SEED_EXTENT: f64 = 0.8;

const COMPONENTS: usize = 5;
const ITERATIONS: usize = 5;
const ICM_SWEEPS: usize = 5;

/// Smoothness weight between equal-colored neighbours.
const GAMMA: f64 = 50.0;

/// Added to each covariance diagonal.
const REGULARIZATION: f64 = 0.01;

type Color = Vector3<f64>;

/// Neighbour offsets scanned forward; each pair is visited once.
const FORWARD: [(i64, i64); 4] = [(1, 0), (0, 1), (1, 1), (-1, 1)];

struct Component {
    mean: Color,
    inverse: Matrix3<f64>,
    /// ln(weight) minus the log normalizer of the density.
    log_scale: f64,
}

struct Mixture {
    components: Vec<Component>,
}

impl Mixture {
    /// Fit one component per non-empty group.
    #[allow(clippy::cast_precision_loss)]
    fn from_groups(
        groups: &[Vec<Color>],
        side: &'static str,
    ) -> Result<Self, SegmentationError> {
        let total: usize = groups.iter().map(Vec::len).sum();
        if total == 0 {
            return Err(SegmentationError::DegenerateModel(side));
        }

        let mut components = Vec::with_capacity(groups.len());
        for group in groups.iter().filter(|g| !g.is_empty()) {
            let n = group.len() as f64;
            let mean = group.iter().sum::<Color>() / n;
            let mut cov = group
                .iter()
                .map(|c| (c - mean) * (c - mean).transpose())
                .sum::<Matrix3<f64>>()
                / n;
            cov += Matrix3::identity() * REGULARIZATION;

            let det = cov.determinant();
            if !det.is_finite() || det <= 0.0 {
                return Err(SegmentationError::Numerical("singular covariance"));
            }
            let inverse = cov
                .try_inverse()
                .ok_or(SegmentationError::Numerical("singular covariance"))?;

            let log_norm = 0.5 * (3.0 * (2.0 * std::f64::consts::PI).ln() + det.ln());
            components.push(Component {
                mean,
                inverse,
                log_scale: (n / total as f64).ln() - log_norm,
            });
        }

        Ok(Self { components })
    }

    /// Initial fit: split samples into luma quantiles.
    fn initial(samples: &[Color], side: &'static str) -> Result<Self, SegmentationError> {
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| luma(a).total_cmp(&luma(b)));

        let chunk = sorted.len().div_ceil(COMPONENTS).max(1);
        let groups: Vec<Vec<Color>> = sorted.chunks(chunk).map(<[Color]>::to_vec).collect();
        Self::from_groups(&groups, side)
    }

    /// Refit: assign each sample to its most likely component.
    fn refine(&self, samples: &[Color], side: &'static str) -> Result<Self, SegmentationError> {
        let mut groups = vec![Vec::new(); self.components.len()];
        for c in samples {
            groups[self.best_component(c)].push(*c);
        }
        Self::from_groups(&groups, side)
    }

    fn component_log(k: &Component, c: &Color) -> f64 {
        let d = c - k.mean;
        k.log_scale - 0.5 * d.dot(&(k.inverse * d))
    }

    fn best_component(&self, c: &Color) -> usize {
        self.components
            .iter()
            .map(|k| Self::component_log(k, c))
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best })
            .0
    }

    /// Log density of the mixture at `c`.
    fn log_likelihood(&self, c: &Color) -> f64 {
        let logs: Vec<f64> = self
            .components
            .iter()
            .map(|k| Self::component_log(k, c))
            .collect();
        let max = logs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return max;
        }
        max + logs.iter().map(|l| (l - max).exp()).sum::<f64>().ln()
    }
}

fn luma(c: &Color) -> f64 {
    0.299 * c[0] + 0.587 * c[1] + 0.114 * c[2]
}

/// Seed rectangle as `(x0, y0, x1, y1)`, half-open.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn seed_rect(width: u32, height: u32) -> Option<(usize, usize, usize, usize)> {
    let (w, h) = (f64::from(width), f64::from(height));
    let x0 = (w * SEED_MARGIN) as usize;
    let y0 = (h * SEED_MARGIN) as usize;
    let rw = (w * SEED_EXTENT) as usize;
    let rh = (h * SEED_EXTENT) as usize;
    if rw == 0 || rh == 0 {
        return None;
    }

    let (x1, y1) = (x0 + rw, y0 + rh);
    let covers_all = x0 == 0 && y0 == 0 && x1 >= width as usize && y1 >= height as usize;
    (!covers_all).then_some((x0, y0, x1, y1))
}

struct Grid {
    width: usize,
    height: usize,
    colors: Vec<Color>,
    beta: f64,
}

impl Grid {
    fn new(image: &RgbImage) -> Self {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let colors: Vec<Color> = image
            .pixels()
            .map(|p| Color::new(f64::from(p[0]), f64::from(p[1]), f64::from(p[2])))
            .collect();

        let mut grid = Self {
            width,
            height,
            colors,
            beta: 0.0,
        };
        grid.beta = grid.contrast_beta();
        grid
    }

    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    fn neighbour(&self, i: usize, (dx, dy): (i64, i64)) -> Option<usize> {
        let x = (i % self.width) as i64 + dx;
        let y = (i / self.width) as i64 + dy;
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        Some(y as usize * self.width + x as usize)
    }

    /// 1 / (2 <|I_p - I_q|^2>) over all neighbour pairs; 0 for flat images.
    #[allow(clippy::cast_precision_loss)]
    fn contrast_beta(&self) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for i in 0..self.colors.len() {
            for &offset in &FORWARD {
                if let Some(j) = self.neighbour(i, offset) {
                    sum += (self.colors[i] - self.colors[j]).norm_squared();
                    count += 1;
                }
            }
        }
        if count == 0 || sum <= f64::EPSILON {
            return 0.0;
        }
        1.0 / (2.0 * sum / count as f64)
    }

    fn smoothness(&self, i: usize, j: usize, diagonal: bool) -> f64 {
        let dist = if diagonal { std::f64::consts::SQRT_2 } else { 1.0 };
        GAMMA / dist * (-self.beta * (self.colors[i] - self.colors[j]).norm_squared()).exp()
    }
}

/// Segment `image` starting from the central seed rectangle.
pub(super) fn segment(image: &RgbImage) -> Result<Segmentation, SegmentationError> {
    let (width, height) = image.dimensions();
    let (x0, y0, x1, y1) =
        seed_rect(width, height).ok_or(SegmentationError::EmptySeed { width, height })?;

    let grid = Grid::new(image);
    let inside: Vec<bool> = (0..grid.colors.len())
        .map(|i| {
            let (x, y) = (i % grid.width, i / grid.width);
            (x0..x1).contains(&x) && (y0..y1).contains(&y)
        })
        .collect();
    let mut foreground = inside.clone();

    let mut models: Option<(Mixture, Mixture)> = None;
    for _ in 0..ITERATIONS {
        let fg: Vec<Color> = select(&grid.colors, &foreground, true);
        if fg.is_empty() {
            break;
        }
        let bg: Vec<Color> = select(&grid.colors, &foreground, false);

        let (fg_model, bg_model) = match &models {
            None => (
                Mixture::initial(&fg, "foreground")?,
                Mixture::initial(&bg, "background")?,
            ),
            Some((f, b)) => (f.refine(&fg, "foreground")?, b.refine(&bg, "background")?),
        };

        let costs = data_costs(&grid, &inside, &fg_model, &bg_model)?;
        relabel(&grid, &inside, &costs, &mut foreground);
        models = Some((fg_model, bg_model));
    }

    #[allow(clippy::cast_possible_truncation)]
    let mask = GrayImage::from_fn(width, height, |x, y| {
        let i = y as usize * grid.width + x as usize;
        Luma([if foreground[i] { 255 } else { 0 }])
    });

    tracing::debug!(
        "Region growing kept {} of {} pixels",
        foreground.iter().filter(|&&f| f).count(),
        foreground.len()
    );

    Ok(Segmentation {
        image: apply_mask(image, &mask),
        mask,
    })
}

fn select(colors: &[Color], labels: &[bool], want: bool) -> Vec<Color> {
    colors
        .iter()
        .zip(labels)
        .filter(|&(_, &l)| l == want)
        .map(|(c, _)| *c)
        .collect()
}

/// `(foreground, background)` negative log likelihoods; zero outside the seed.
fn data_costs(
    grid: &Grid,
    inside: &[bool],
    fg: &Mixture,
    bg: &Mixture,
) -> Result<Vec<(f64, f64)>, SegmentationError> {
    grid.colors
        .iter()
        .zip(inside)
        .map(|(c, &inside)| {
            if !inside {
                return Ok((0.0, 0.0));
            }
            let cost = (-fg.log_likelihood(c), -bg.log_likelihood(c));
            if cost.0.is_nan() || cost.1.is_nan() || (cost.0.is_infinite() && cost.1.is_infinite()) {
                return Err(SegmentationError::Numerical("non-finite data cost"));
            }
            Ok(cost)
        })
        .collect()
}

/// Data-only labelling followed by a few ICM sweeps over the seed rectangle.
fn relabel(grid: &Grid, inside: &[bool], costs: &[(f64, f64)], labels: &mut [bool]) {
    for (i, &(fg, bg)) in costs.iter().enumerate() {
        if inside[i] {
            labels[i] = fg < bg;
        }
    }

    for _ in 0..ICM_SWEEPS {
        let mut changed = false;
        for i in 0..labels.len() {
            if !inside[i] {
                continue;
            }
            let (mut e_fg, mut e_bg) = costs[i];
            for (dx, dy) in FORWARD.iter().flat_map(|&(dx, dy)| [(dx, dy), (-dx, -dy)]) {
                let Some(j) = grid.neighbour(i, (dx, dy)) else {
                    continue;
                };
                let penalty = grid.smoothness(i, j, dx != 0 && dy != 0);
                if labels[j] {
                    e_bg += penalty;
                } else {
                    e_fg += penalty;
                }
            }
            let label = e_fg < e_bg;
            if label != labels[i] {
                labels[i] = label;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}
