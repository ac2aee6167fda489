//! sf-dsp: Time-frequency processing for Stemforge
//!
//! ## Modules
//! - `stft` - Forward/inverse short-time Fourier transform pair
//! - `magnitude` - Complex spectrogram to magnitude (optionally mono)
//! - `bandwidth` - Bandwidth (Hz) to maximum usable bin
//! - `window` - Analysis/synthesis windows

pub mod bandwidth;
pub mod magnitude;
pub mod stft;
pub mod window;

pub use bandwidth::{bandwidth_to_max_bin, bin_frequencies};
pub use magnitude::{magnitude, ComplexNorm};
pub use stft::{PadMode, Stft, StftConfig};
pub use window::hann_window;
