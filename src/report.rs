//! JSON-shaped results returned across the request boundary.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;

use crate::error::Result;
use crate::imaging::encode_png;
use crate::pipeline::{Analysis, ChangeRegion};

/// Successful comparison with PNG outputs as base64 strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub success: bool,
    /// All regions found, including those beyond the top ten.
    pub changes_count: usize,
    pub ssim_score: f64,
    /// The top regions, largest first.
    pub changes: Vec<ChangeRegion>,
    pub difference_map: String,
    pub annotated_image: String,
}

impl AnalysisReport {
    /// Encode an analysis into its transport form.
    ///
    /// # Errors
    ///
    /// Returns an error if either rendered image fails to encode.
    pub fn from_analysis(analysis: &Analysis) -> Result<Self> {
        Ok(Self {
            success: true,
            changes_count: analysis.changes_count(),
            ssim_score: analysis.ssim_score,
            changes: analysis.top_regions().to_vec(),
            difference_map: STANDARD.encode(encode_png(&analysis.heat_map)?),
            annotated_image: STANDARD.encode(encode_png(&analysis.annotated)?),
        })
    }
}

/// A comparison that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisFailure {
    pub success: bool,
    pub error: String,
}

impl AnalysisFailure {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

/// Exactly one of a full report or a failure message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnalysisResponse {
    Success(AnalysisReport),
    Failure(AnalysisFailure),
}

impl AnalysisResponse {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Service liveness payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Status {
    pub message: &'static str,
    pub status: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Config, Pipeline};
    use image::{Rgb, RgbImage};

    #[test]
    fn test_failure_shape() {
        let json = serde_json::to_value(AnalysisResponse::Failure(AnalysisFailure::new("boom"))).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "error": "boom"}));
    }

    #[test]
    fn test_report_shape() {
        let before = RgbImage::from_pixel(64, 64, Rgb([50, 50, 50]));
        let after = RgbImage::from_fn(64, 64, |x, y| {
            if (20..44).contains(&x) && (20..44).contains(&y) {
                Rgb([250, 250, 250])
            } else {
                Rgb([50, 50, 50])
            }
        });
        let analysis = Pipeline::new(Config::default())
            .unwrap()
            .analyze(before, after)
            .unwrap();

        let report = AnalysisReport::from_analysis(&analysis).unwrap();
        let json = serde_json::to_value(AnalysisResponse::Success(report.clone())).unwrap();

        assert_eq!(json["success"], serde_json::json!(true));
        assert_eq!(json["changes_count"], serde_json::json!(analysis.changes_count()));
        assert!(json["changes"].is_array());
        assert!(json["changes"][0]["bbox"].is_array());

        let png = STANDARD.decode(&report.difference_map).unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(decoded, analysis.heat_map);
    }
}
