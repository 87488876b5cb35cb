//! Oriented FAST keypoints with rotated BRIEF descriptors.

use image::GrayImage;
use imageproc::corners::{corners_fast9, Corner};
use imageproc::filter::gaussian_blur_f32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Intensity difference a FAST arc must exceed.
const FAST_THRESHOLD: u8 = 20;

/// Radius of the disk used for the intensity-centroid orientation.
const ORIENTATION_RADIUS: i32 = 15;

/// Radius of the disk the binary tests are sampled from.
const PATTERN_RADIUS: i32 = 12;

/// Keypoints closer than this to the border are dropped.
const BORDER: u32 = ORIENTATION_RADIUS as u32 + 1;

/// Smoothing applied before sampling the binary tests.
const DESCRIPTOR_SIGMA: f32 = 2.0;

const DESCRIPTOR_WORDS: usize = 4;
const DESCRIPTOR_BITS: usize = DESCRIPTOR_WORDS * 64;
const PATTERN_SEED: u64 = 0x0B5E_55ED;

/// A detected corner with its dominant orientation (radians).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub score: f32,
}

/// 256-bit binary descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Descriptor(pub [u64; DESCRIPTOR_WORDS]);

impl Descriptor {
    /// Number of differing bits.
    #[must_use]
    pub fn hamming(&self, other: &Self) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    fn set(&mut self, bit: usize) {
        self.0[bit / 64] |= 1 << (bit % 64);
    }
}

/// Keypoints and their descriptors, index-aligned.
#[derive(Debug, Clone, Default)]
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl Features {
    #[must_use]
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// A cross-checked descriptor correspondence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    /// Index into the query feature set.
    pub query: usize,
    /// Index into the train feature set.
    pub train: usize,
    /// Hamming distance between the two descriptors.
    pub distance: u32,
}

type TestPair = ([i32; 2], [i32; 2]);

fn sampling_pattern() -> Vec<TestPair> {
    let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
    let r2 = PATTERN_RADIUS * PATTERN_RADIUS;

    let mut point = || loop {
        let x = rng.random_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
        let y = rng.random_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
        if x * x + y * y <= r2 {
            return [x, y];
        }
    };

    (0..DESCRIPTOR_BITS).map(|_| (point(), point())).collect()
}

/// Keep corners whose score is not beaten by any 8-neighbour.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn suppress_non_maxima(corners: Vec<Corner>, width: u32, height: u32) -> Vec<Corner> {
    let w = width as usize;
    let mut scores = vec![0.0_f32; w * height as usize];
    for c in &corners {
        scores[c.y as usize * w + c.x as usize] = c.score;
    }

    corners
        .into_iter()
        .filter(|c| {
            let (cx, cy) = (c.x as i64, c.y as i64);
            (-1..=1_i64).all(|dy| {
                (-1..=1_i64).all(|dx| {
                    let (nx, ny) = (cx + dx, cy + dy);
                    if (dx == 0 && dy == 0)
                        || nx < 0
                        || ny < 0
                        || nx >= i64::from(width)
                        || ny >= i64::from(height)
                    {
                        return true;
                    }
                    scores[ny as usize * w + nx as usize] <= c.score
                })
            })
        })
        .collect()
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn orientation(gray: &GrayImage, x: u32, y: u32) -> f32 {
    let r = ORIENTATION_RADIUS;
    let (cx, cy) = (x as i32, y as i32);
    let mut m01 = 0.0_f32;
    let mut m10 = 0.0_f32;

    for dy in -r..=r {
        let half = f64::from(r * r - dy * dy).sqrt() as i32;
        for dx in -half..=half {
            let v = f32::from(gray.get_pixel((cx + dx) as u32, (cy + dy) as u32)[0]);
            m10 += dx as f32 * v;
            m01 += dy as f32 * v;
        }
    }

    m01.atan2(m10)
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
fn describe(smooth: &GrayImage, kp: &Keypoint, pattern: &[TestPair]) -> Descriptor {
    let (sin, cos) = kp.angle.sin_cos();
    let (cx, cy) = (kp.x as i32, kp.y as i32);

    let sample = |p: [i32; 2]| {
        let (px, py) = (p[0] as f32, p[1] as f32);
        // Safe: rotated offsets stay within the pattern disk, inside BORDER
        let rx = px.mul_add(cos, -py * sin).round() as i32;
        let ry = px.mul_add(sin, py * cos).round() as i32;
        smooth.get_pixel((cx + rx) as u32, (cy + ry) as u32)[0]
    };

    let mut desc = Descriptor::default();
    for (bit, &(a, b)) in pattern.iter().enumerate() {
        if sample(a) < sample(b) {
            desc.set(bit);
        }
    }
    desc
}

/// Detect up to `max_features` oriented keypoints and describe them.
///
/// Keypoints are ranked by FAST score; corners too close to the border to
/// hold the orientation patch are discarded.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn detect_and_describe(gray: &GrayImage, max_features: usize) -> Features {
    let (width, height) = gray.dimensions();
    if width <= 2 * BORDER || height <= 2 * BORDER || max_features == 0 {
        return Features::default();
    }

    let corners = corners_fast9(gray, FAST_THRESHOLD);
    let mut corners: Vec<Corner> = suppress_non_maxima(corners, width, height)
        .into_iter()
        .filter(|c| c.x >= BORDER && c.y >= BORDER && c.x + BORDER < width && c.y + BORDER < height)
        .collect();
    corners.sort_by(|a, b| b.score.total_cmp(&a.score));
    corners.truncate(max_features);

    if corners.is_empty() {
        return Features::default();
    }

    let smooth = gaussian_blur_f32(gray, DESCRIPTOR_SIGMA);
    let pattern = sampling_pattern();

    let keypoints: Vec<Keypoint> = corners
        .iter()
        .map(|c| Keypoint {
            x: c.x as f32,
            y: c.y as f32,
            angle: orientation(gray, c.x, c.y),
            score: c.score,
        })
        .collect();
    let descriptors = keypoints
        .iter()
        .map(|kp| describe(&smooth, kp, &pattern))
        .collect();

    tracing::debug!("Detected {} keypoints", keypoints.len());

    Features {
        keypoints,
        descriptors,
    }
}

/// Brute-force Hamming matching keeping only mutual nearest neighbours.
///
/// The result is sorted by ascending distance; equal distances keep query
/// order.
#[must_use]
pub fn match_cross_checked(query: &[Descriptor], train: &[Descriptor]) -> Vec<Match> {
    if query.is_empty() || train.is_empty() {
        return Vec::new();
    }

    let mut forward = vec![(u32::MAX, 0_usize); query.len()];
    let mut backward = vec![(u32::MAX, 0_usize); train.len()];

    for (i, q) in query.iter().enumerate() {
        for (j, t) in train.iter().enumerate() {
            let d = q.hamming(t);
            if d < forward[i].0 {
                forward[i] = (d, j);
            }
            if d < backward[j].0 {
                backward[j] = (d, i);
            }
        }
    }

    let mut matches: Vec<Match> = forward
        .iter()
        .enumerate()
        .filter(|&(i, &(_, j))| backward[j].1 == i)
        .map(|(i, &(distance, train))| Match {
            query: i,
            train,
            distance,
        })
        .collect();
    matches.sort_by_key(|m| m.distance);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Bright squares on a dark background, one per `pitch` cell.
    fn squares(size: u32, pitch: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            let inside = x % pitch >= pitch / 2 && y % pitch >= pitch / 2;
            Luma([if inside { 220 } else { 30 }])
        })
    }

    #[test]
    fn test_hamming() {
        let a = Descriptor([0, 0, 0, 0]);
        let b = Descriptor([0b1011, 0, 1 << 63, 0]);
        assert_eq!(a.hamming(&b), 4);
        assert_eq!(b.hamming(&b), 0);
    }

    #[test]
    fn test_flat_image_has_no_features() {
        let gray = GrayImage::from_pixel(100, 100, Luma([128]));
        assert!(detect_and_describe(&gray, 5000).is_empty());
    }

    #[test]
    fn test_tiny_image_has_no_features() {
        let gray = squares(20, 8);
        assert!(detect_and_describe(&gray, 5000).is_empty());
    }

    #[test]
    fn test_features_respect_cap_and_border() {
        let gray = squares(128, 20);
        let features = detect_and_describe(&gray, 25);

        assert!(!features.is_empty());
        assert!(features.len() <= 25);
        assert_eq!(features.keypoints.len(), features.descriptors.len());
        for kp in &features.keypoints {
            assert!(kp.x >= BORDER as f32 && kp.x < (128 - BORDER) as f32);
            assert!(kp.y >= BORDER as f32 && kp.y < (128 - BORDER) as f32);
        }
    }

    #[test]
    fn test_pattern_is_stable() {
        assert_eq!(sampling_pattern(), sampling_pattern());
        assert_eq!(sampling_pattern().len(), DESCRIPTOR_BITS);
    }

    #[test]
    fn test_cross_check_keeps_mutual_pairs() {
        let q = [Descriptor([0, 0, 0, 0]), Descriptor([u64::MAX, 0, 0, 0])];
        let t = [
            Descriptor([u64::MAX, 1, 0, 0]),
            Descriptor([1, 0, 0, 0]),
            Descriptor([3, 0, 0, 0]),
        ];

        let matches = match_cross_checked(&q, &t);

        assert_eq!(
            matches,
            vec![
                Match {
                    query: 0,
                    train: 1,
                    distance: 1
                },
                Match {
                    query: 1,
                    train: 0,
                    distance: 1
                },
            ]
        );
    }

    #[test]
    fn test_cross_check_drops_one_sided() {
        // Both queries prefer the single train descriptor; only the closer survives.
        let q = [Descriptor([0b111, 0, 0, 0]), Descriptor([0b1, 0, 0, 0])];
        let t = [Descriptor([0, 0, 0, 0])];

        let matches = match_cross_checked(&q, &t);

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].query, 1);
    }
}
