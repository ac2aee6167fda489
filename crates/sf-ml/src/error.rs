//! Error types for separation

use sf_core::SfError;
use thiserror::Error;

/// Separation error types
#[derive(Error, Debug)]
pub enum MlError {
    /// Invalid configuration, detected before any processing
    #[error("Configuration error: {0}")]
    Config(String),

    /// Model file not found
    #[error("Model not found: {path}")]
    ModelNotFound { path: String },

    /// Inference failed
    #[error("Inference failed: {reason}")]
    InferenceFailed { reason: String },

    /// Estimator or mixture tensors disagree
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    /// Invalid output shape
    #[error("Invalid output shape: expected {expected}, got {got}")]
    InvalidOutputShape { expected: String, got: String },

    /// Channel count mismatch
    #[error("Channel count mismatch: expected {expected}, got {got}")]
    ChannelMismatch { expected: usize, got: usize },

    /// Target name not produced by the separator
    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    /// Processing failed
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    /// Tract error
    #[error("Tract error: {0}")]
    TractError(String),

    /// Transform error
    #[error("DSP error: {0}")]
    Dsp(#[from] SfError),

    /// Config (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for separation
pub type MlResult<T> = Result<T, MlError>;
