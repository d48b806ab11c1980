//! Error taxonomy shared by every stage of the deconvolution pipeline.
//!
//! Each stage reports a distinguishable variant so that the controller can log
//! precisely what went wrong and restore the UI without guessing.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, FlfmError>;

/// Errors produced by the FLFM core.
#[derive(Error, Debug)]
pub enum FlfmError {
    /// Malformed, empty or inconsistent input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The compute backend could not be initialized.
    #[error("compute backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A device-bound execution context could not be acquired.
    #[error("could not acquire execution context on {device}: {reason}")]
    DeviceContext { device: String, reason: String },

    /// A model artifact or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A model name tried to escape the model directory.
    #[error("security violation: {0}")]
    SecurityViolation(String),

    /// Model bytes could not be deserialized into a runnable graph.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// The forward pass failed or produced an unusable output.
    #[error("inference failed: {0}")]
    InferenceFailure(String),

    /// A region of interest does not fit inside the slice.
    #[error("region out of bounds: {0}")]
    OutOfBounds(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}
