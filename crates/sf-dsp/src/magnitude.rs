//! Complex spectrogram to magnitude

use ndarray::{Array4, ArrayView4, Axis};
use num_complex::Complex32;
use sf_core::MagnitudeSpectrogram;

/// Modulus of each bin, optionally averaged over channels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComplexNorm {
    /// Collapse the channel axis to one by averaging
    pub mono: bool,
}

impl ComplexNorm {
    pub fn new(mono: bool) -> Self {
        Self { mono }
    }

    /// `(batch, channel, bin, frame)` complex → magnitude
    ///
    /// With `mono` the result has a single channel holding the mean of the
    /// per-channel magnitudes.
    pub fn apply(&self, spectrum: ArrayView4<Complex32>) -> MagnitudeSpectrogram {
        // `norm` is hypot, so (0, 0) maps to 0 without dividing
        let magnitude = spectrum.mapv(|c| c.norm());

        if !self.mono {
            return magnitude;
        }

        let (batch, _, bins, frames) = magnitude.dim();
        match magnitude.mean_axis(Axis(1)) {
            Some(mean) => mean.insert_axis(Axis(1)),
            None => Array4::zeros((batch, 1, bins, frames)),
        }
    }
}

/// Shorthand for `ComplexNorm::new(mono).apply(spectrum)`
pub fn magnitude(spectrum: ArrayView4<Complex32>, mono: bool) -> MagnitudeSpectrogram {
    ComplexNorm::new(mono).apply(spectrum)
}
