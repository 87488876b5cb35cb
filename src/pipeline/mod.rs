//! Align, compare, extract, and render.

pub mod align;
mod analyze;
mod difference;
pub mod foreground;
mod regions;
mod visualize;

pub use analyze::{Analysis, Config, Pipeline};
pub use difference::{compute_difference, Difference, DifferenceField};
pub use regions::{find_changes, is_text_region, BoundingBox, ChangeRegion, MIN_REGION_AREA};
pub use visualize::{annotate, heat_map, jet, render, TOP_REGIONS};
