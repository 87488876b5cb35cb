//! End-to-end comparison of a before/after image pair.

use std::path::Path;

use image::{GrayImage, RgbImage};
use serde::Deserialize;

use crate::error::{Error, ImageRole, Result};
use crate::imaging;

use super::align::{align, AlignOutcome};
use super::difference::{compute_difference, DifferenceField};
use super::foreground::{extract_pair, Segmenter};
use super::regions::{find_changes, ChangeRegion};
use super::visualize::{render, TOP_REGIONS};

/// Configuration for one comparison.
///
/// Deserializes from JSON; missing keys take their defaults and unknown keys
/// are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Suppress the background of both images before aligning them.
    pub remove_background: bool,

    /// Mix Canny edge and edge density deltas into the difference field.
    pub use_edge_detection: bool,

    /// Field values strictly above this mark a pixel as changed (0.0-1.0, exclusive).
    pub sensitivity: f32,

    /// Drop elongated small-to-medium regions that look like text.
    pub filter_text_regions: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remove_background: false,
            use_edge_detection: false,
            sensitivity: 0.15,
            filter_text_regions: false,
        }
    }
}

impl Config {
    /// Parse and validate a JSON configuration payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a JSON object of the expected
    /// shape or a value is out of range.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|source| Error::Config { source })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if !(self.sensitivity > 0.0 && self.sensitivity < 1.0) {
            return Err(Error::InvalidParameter {
                name: "sensitivity".to_string(),
                reason: "must be strictly between 0.0 and 1.0".to_string(),
            });
        }

        Ok(())
    }
}

/// Everything a comparison produced.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Mean structural similarity of the aligned pair.
    pub ssim_score: f64,
    /// Every surviving region, largest first.
    pub regions: Vec<ChangeRegion>,
    /// Cleaned binary change mask.
    pub mask: GrayImage,
    /// Fused difference field.
    pub field: DifferenceField,
    /// Jet rendering of the field.
    pub heat_map: RgbImage,
    /// The after image with the top regions outlined.
    pub annotated: RgbImage,
    /// What the aligner did with the before image.
    pub alignment: AlignOutcome,
    /// Strategy used for background suppression, when enabled.
    pub foreground: Option<Segmenter>,
}

impl Analysis {
    /// Regions surfaced to callers and drawn on the annotated image.
    #[must_use]
    pub fn top_regions(&self) -> &[ChangeRegion] {
        &self.regions[..self.regions.len().min(TOP_REGIONS)]
    }

    /// Number of regions found, before the top-N cut.
    #[must_use]
    pub fn changes_count(&self) -> usize {
        self.regions.len()
    }
}

/// Stateless change detection pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        tracing::info!("Initializing pipeline with config: {config:?}");

        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Compare two encoded images.
    ///
    /// # Errors
    ///
    /// Returns an error if either buffer cannot be decoded or the comparison
    /// fails.
    pub fn analyze_bytes(&self, before: &[u8], after: &[u8]) -> Result<Analysis> {
        let before = imaging::decode_image(before, ImageRole::Before)?;
        let after = imaging::decode_image(after, ImageRole::After)?;
        self.analyze(before, after)
    }

    /// Compare two image files.
    ///
    /// # Arguments
    ///
    /// * `before` - Path to the earlier capture
    /// * `after` - Path to the later capture, used as the reference frame
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be loaded or the comparison
    /// fails.
    pub fn analyze_files<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        before: P,
        after: Q,
    ) -> Result<Analysis> {
        let before = before.as_ref();
        let after = after.as_ref();

        tracing::info!("Comparing {} -> {}", before.display(), after.display());

        self.analyze(imaging::load_image(before)?, imaging::load_image(after)?)
    }

    /// Compare two decoded images.
    ///
    /// # Errors
    ///
    /// Returns an error if alignment was skipped and the images differ in
    /// size, or if the images are too small to compare.
    pub fn analyze(&self, before: RgbImage, after: RgbImage) -> Result<Analysis> {
        let (before, after) = imaging::resize_pair(before, after);

        let (before, after, foreground) = if self.config.remove_background {
            tracing::info!("Removing backgrounds...");
            let (b, a, strategy) = extract_pair(&before, &after);
            (b.image, a.image, Some(strategy))
        } else {
            (before, after, None)
        };

        tracing::info!("Aligning images...");
        let aligned = align(&before, &after);
        let after_gray = imaging::to_gray(&after);

        if aligned.gray.dimensions() != after_gray.dimensions() {
            return Err(Error::DimensionMismatch {
                before: aligned.gray.dimensions(),
                after: after_gray.dimensions(),
            });
        }

        tracing::info!("Computing difference field...");
        let diff = compute_difference(
            &aligned.gray,
            &after_gray,
            self.config.use_edge_detection,
        )?;

        let (regions, mask) = find_changes(
            &diff.field,
            self.config.sensitivity,
            self.config.filter_text_regions,
        );

        let (heat_map, annotated) = render(&after, &diff.field, &regions);

        tracing::info!(
            "Found {} changes, ssim {:.4}",
            regions.len(),
            diff.ssim_score
        );

        Ok(Analysis {
            ssim_score: diff.ssim_score,
            regions,
            mask,
            field: diff.field,
            heat_map,
            annotated,
            alignment: aligned.outcome,
            foreground,
        })
    }
}
