//! Request boundary: raw config and image bytes in, one response out.
//!
//! Nothing escapes this layer. Parse errors, decode errors, pipeline errors
//! and panics inside a stage all become a failure response.

use std::panic::{self, AssertUnwindSafe};

use crate::error::{Error, Result};
use crate::pipeline::{Config, Pipeline};
use crate::report::{AnalysisFailure, AnalysisReport, AnalysisResponse, Status};

/// Reported by [`status`].
pub const SERVICE_NAME: &str = "FrameShift API v1.1";

/// Parse a raw JSON configuration.
///
/// # Errors
///
/// Returns an error if the payload is malformed or out of range.
pub fn parse_config(raw: &str) -> Result<Config> {
    Config::from_json(raw)
}

/// Run one comparison and fold every outcome into a response.
#[must_use]
pub fn analyze_request(config_json: &str, before: &[u8], after: &[u8]) -> AnalysisResponse {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run(config_json, before, after)))
        .unwrap_or_else(|payload| Err(Error::Internal(panic_message(payload.as_ref()))));

    match outcome {
        Ok(report) => AnalysisResponse::Success(report),
        Err(err) => {
            tracing::error!("Analysis failed: {err}");
            AnalysisResponse::Failure(AnalysisFailure::new(err.to_string()))
        }
    }
}

fn run(config_json: &str, before: &[u8], after: &[u8]) -> Result<AnalysisReport> {
    let config = parse_config(config_json)?;
    let analysis = Pipeline::new(config)?.analyze_bytes(before, after)?;
    AnalysisReport::from_analysis(&analysis)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "pipeline stage panicked".to_string())
}

/// Liveness payload for the service root.
#[must_use]
pub const fn status() -> Status {
    Status {
        message: SERVICE_NAME,
        status: "ready",
    }
}
