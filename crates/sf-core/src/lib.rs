//! sf-core: Shared types for Stemforge
//!
//! Tensor aliases and the error type used by the DSP and ML crates.
//! Every spectrogram in the workspace uses the `(batch, channel, bin, frame)`
//! axis order; waveforms use `(batch, channel, time)`.

mod error;

pub use error::*;

use ndarray::{Array3, Array4};
use num_complex::Complex32;

/// Real-valued audio, indexed `(batch, channel, time)`
pub type Waveform = Array3<f32>;

/// One-sided STFT, indexed `(batch, channel, bin, frame)`
pub type ComplexSpectrogram = Array4<Complex32>;

/// Non-negative magnitudes, indexed `(batch, channel|1, bin, frame)`
pub type MagnitudeSpectrogram = Array4<f32>;

/// Format an array shape for error messages
pub fn shape_string(shape: &[usize]) -> String {
    format!("{:?}", shape)
}
