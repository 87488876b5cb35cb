//! Custom error types for frameshift.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which side of the comparison an input image belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    /// The earlier capture, warped onto the other one.
    Before,
    /// The later capture, used as the reference frame.
    After,
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before => f.write_str("before"),
            Self::After => f.write_str("after"),
        }
    }
}

/// Main error type for the frameshift library.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to decode an uploaded image buffer.
    #[error("failed to decode {role} image: {source}")]
    ImageDecode {
        role: ImageRole,
        #[source]
        source: image::ImageError,
    },

    /// Failed to encode a rendered image.
    #[error("failed to encode output image: {source}")]
    ImageEncode {
        #[source]
        source: image::ImageError,
    },

    /// Failed to load an image file.
    #[error("failed to load image from {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to save an image file.
    #[error("failed to save image to {path}: {source}")]
    ImageSave {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The configuration payload could not be parsed.
    #[error("invalid configuration: {source}")]
    Config {
        #[source]
        source: serde_json::Error,
    },

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// The two grayscale fields handed to the difference engine disagree in size.
    #[error("image dimensions differ: before is {before:?}, after is {after:?}")]
    DimensionMismatch {
        before: (u32, u32),
        after: (u32, u32),
    },

    /// Image is smaller than the structural similarity window.
    #[error("image {width}x{height} is too small, both sides must be at least {min} px")]
    ImageTooSmall { width: u32, height: u32, min: u32 },

    /// A pipeline stage failed unexpectedly.
    #[error("internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for frameshift operations.
pub type Result<T> = std::result::Result<T, Error>;
