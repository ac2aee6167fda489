//! Spectrogram-domain source separation
//!
//! Pipeline per mixture:
//! - STFT of the mixture, magnitude (optionally mono)
//! - one `SourceEstimator` per target, run in parallel
//! - multichannel Wiener refinement per chunk of frames (optional residual,
//!   softmask and EM iterations)
//! - inverse STFT of every source back to the input length
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sf_ml::separation::{SeparationConfig, Separator};
//!
//! let config = SeparationConfig::high_quality();
//! let separator = Separator::from_model_dir(config, "models/")?;
//! let stems = separator.separate(mix.view())?;
//!
//! let piano = stems.get("piano").unwrap();
//! let residual = stems.get("residual").unwrap();
//! ```

mod config;
mod estimator;
mod separator;
mod stems;
pub mod wiener;

pub use config::{AudioConfig, ModelConfig, SeparationConfig, WienerConfig};
pub use estimator::{BandEstimator, OnnxEstimator};
pub use separator::{SeparationOutput, Separator};
pub use stems::{Aggregation, StemCollection, StemOutput};
pub use wiener::{frame_chunks, wiener};

use ndarray::{Array4, ArrayView4};

use crate::error::MlResult;

/// Per-target magnitude estimator
///
/// Receives the mixture magnitude `(batch, channel|1, bin, frame)` and must
/// return a non-negative estimate of the same shape for its target.
pub trait SourceEstimator: Send + Sync {
    /// Estimate the target's magnitude spectrogram
    fn estimate(&self, magnitude: ArrayView4<f32>) -> MlResult<Array4<f32>>;

    /// Target name, used as the output key
    fn name(&self) -> &str;
}
