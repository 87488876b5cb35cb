//! # `FrameShift`
//!
//! Detect and visualize what changed between two photos of the same scene.
//!
//! The "before" image is registered onto the "after" image with a feature
//! based homography, a per-pixel difference field fuses intensity,
//! structural and (optionally) edge dissimilarity, and connected regions of
//! the thresholded field are ranked by area. Outputs are a jet heat map of
//! the field and the "after" image with the largest regions outlined.
//!
//! ## Example
//!
//! ```no_run
//! use frameshift::{Config, Pipeline};
//!
//! # fn main() -> frameshift::Result<()> {
//! let config = Config {
//!     use_edge_detection: true,
//!     ..Config::default()
//! };
//! let pipeline = Pipeline::new(config)?;
//!
//! let analysis = pipeline.analyze_files("before.jpg", "after.jpg")?;
//! for region in analysis.top_regions() {
//!     println!("{:?} area {}", region.bbox, region.area);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod imaging;
pub mod pipeline;
pub mod report;
pub mod service;

pub use error::{Error, ImageRole, Result};
pub use pipeline::{Analysis, BoundingBox, ChangeRegion, Config, Pipeline};
pub use report::{AnalysisFailure, AnalysisReport, AnalysisResponse, Status};
pub use service::{analyze_request, status};
