//! Error taxonomy for element resolution and action dispatch
//!
//! Ordinary absence (`NotFound` / `TimedOut`) is never an error: lookups return
//! `Option` and the poller returns [`crate::driver::common::WaitOutcome`]. Everything
//! here is something the calling test step has to decide about.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LocateError>;

#[derive(Debug, Error)]
pub enum LocateError {
    /// An action needed its target on screen and it never showed up
    #[error("Element not found: {target}")]
    ElementNotFound { target: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Index {index} out of range ({count} matches)")]
    IndexOutOfRange { index: usize, count: usize },

    /// Normalized coordinate outside [0, 1] (or pixel outside the screen)
    #[error("Coordinate out of range: ({x}, {y})")]
    OutOfRange { x: f64, y: f64 },

    #[error("Invalid rect [{x_min}, {y_min}, {x_max}, {y_max}] for {width}x{height} frame")]
    InvalidRect {
        x_min: u32,
        y_min: u32,
        x_max: u32,
        y_max: u32,
        width: u32,
        height: u32,
    },

    #[error("Assertion failed: {message}")]
    AssertionFailed { message: String },

    #[error("Template asset error ({path:?}): {reason}")]
    Asset { path: PathBuf, reason: String },

    #[error("Device error: {0}")]
    Device(String),

    #[error("OCR error: {0}")]
    Ocr(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LocateError {
    pub fn device(err: impl std::fmt::Display) -> Self {
        LocateError::Device(err.to_string())
    }

    pub fn ocr(err: impl std::fmt::Display) -> Self {
        LocateError::Ocr(err.to_string())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        LocateError::InvalidArgument(msg.into())
    }

    /// True for collaborator failures (device, OCR, filesystem)
    pub fn is_collaborator(&self) -> bool {
        matches!(
            self,
            LocateError::Device(_) | LocateError::Ocr(_) | LocateError::Io(_)
        )
    }
}

impl From<image::ImageError> for LocateError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(io) => LocateError::Io(io),
            other => LocateError::Io(std::io::Error::new(std::io::ErrorKind::Other, other)),
        }
    }
}
