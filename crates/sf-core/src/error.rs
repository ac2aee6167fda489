//! Error types for Stemforge

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum SfError {
    #[error("DSP error: {0}")]
    Dsp(String),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },
}

/// Result type alias
pub type SfResult<T> = Result<T, SfError>;
