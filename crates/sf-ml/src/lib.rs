//! # Stemforge Separation Engine
//!
//! Spectrogram-domain music source separation:
//! - Per-target magnitude estimators (tract ONNX models or model-free bands)
//! - Multichannel Wiener refinement with optional EM iterations
//! - Residual source, stem naming and aggregation
//!
//! ## Architecture
//!
//! Pure Rust `tract` inference on CPU. Estimation runs in parallel across
//! targets, refinement across frequency bins and synthesis across sources,
//! all on a rayon pool sized by the configuration.
//!
//! Offline only: chunking bounds memory, not latency.

// Many internal items don't need docs
#![allow(missing_docs)]

pub mod separation;

mod error;
mod inference;

pub use error::{MlError, MlResult};
pub use inference::{InferenceConfig, InferenceEngine};
pub use separation::{
    Aggregation, BandEstimator, OnnxEstimator, SeparationConfig, SeparationOutput, Separator, SourceEstimator,
    StemCollection, StemOutput, WienerConfig,
};

/// Well-known source names
pub mod targets {
    /// Piano model
    pub const PIANO: &str = "piano";

    /// Orchestra model
    pub const ORCHESTRA: &str = "orch";

    /// Mixture minus every modelled target
    pub const RESIDUAL: &str = "residual";
}

/// Sample rates commonly used by separation models
pub mod sample_rates {
    /// Default model rate
    pub const DEFAULT: u32 = 44100;
}
