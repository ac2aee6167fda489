//! Short-time Fourier transform pair
//!
//! `forward` and `inverse` are mutual inverses: the same periodic Hann
//! window is used for analysis and synthesis, and overlap-add output is
//! divided by the summed squared window. With `center` set the signal is
//! padded by `n_fft / 2` on both sides, so frame `t` is centred on sample
//! `t * hop_length` and the edges reconstruct as well as the interior.

use std::sync::Arc;

use ndarray::{s, Array2, Array3, Array4, ArrayView2, ArrayView3, ArrayView4};
use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};
use sf_core::{shape_string, ComplexSpectrogram, SfError, SfResult, Waveform};

use crate::window::hann_window;

/// Smallest window envelope that is still normalised on inverse
const ENVELOPE_FLOOR: f32 = 1e-11;

/// Edge padding applied when centering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PadMode {
    /// Symmetric zero padding
    #[default]
    Zero,
    /// Mirror around the edge sample (edge sample not repeated)
    Reflect,
}

/// STFT parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StftConfig {
    /// FFT length (= window length)
    pub n_fft: usize,

    /// Hop between frames in samples
    pub hop_length: usize,

    /// Pad so the first frame is centred on sample 0
    pub center: bool,

    /// Padding used when centering
    pub pad_mode: PadMode,
}

impl Default for StftConfig {
    fn default() -> Self {
        Self {
            n_fft: 4096,
            hop_length: 1024,
            center: true,
            pad_mode: PadMode::Zero,
        }
    }
}

impl StftConfig {
    /// Check window/hop compatibility
    pub fn validate(&self) -> SfResult<()> {
        if self.n_fft < 2 {
            return Err(SfError::InvalidParam(format!(
                "n_fft must be at least 2, got {}",
                self.n_fft
            )));
        }
        // Periodic Hann is zero at each frame start, so frames must overlap
        if self.hop_length == 0 || self.hop_length >= self.n_fft {
            return Err(SfError::InvalidParam(format!(
                "hop_length must be in 1..{}, got {}",
                self.n_fft, self.hop_length
            )));
        }
        Ok(())
    }

    /// Number of one-sided frequency bins
    pub fn num_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Padding applied to each side of the signal
    pub fn pad(&self) -> usize {
        if self.center { self.n_fft / 2 } else { 0 }
    }

    /// Frame count for a signal of `length` samples
    pub fn num_frames(&self, length: usize) -> SfResult<usize> {
        let padded = length + 2 * self.pad();
        if length == 0 || padded < self.n_fft {
            return Err(SfError::InvalidParam(format!(
                "signal of {} samples is shorter than n_fft {}",
                length, self.n_fft
            )));
        }
        Ok(1 + (padded - self.n_fft) / self.hop_length)
    }
}

/// Forward/inverse STFT with planned FFTs
pub struct Stft {
    /// Transform parameters
    config: StftConfig,

    /// Real-to-complex FFT
    fft_forward: Arc<dyn RealToComplex<f32>>,

    /// Complex-to-real FFT
    fft_inverse: Arc<dyn ComplexToReal<f32>>,

    /// Analysis and synthesis window
    window: Vec<f32>,
}

impl std::fmt::Debug for Stft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stft").field("config", &self.config).finish()
    }
}

impl Stft {
    /// Plan forward and inverse FFTs for `config`
    pub fn new(config: StftConfig) -> SfResult<Self> {
        config.validate()?;

        let mut planner = RealFftPlanner::new();
        let fft_forward = planner.plan_fft_forward(config.n_fft);
        let fft_inverse = planner.plan_fft_inverse(config.n_fft);

        Ok(Self {
            config,
            fft_forward,
            fft_inverse,
            window: hann_window(config.n_fft),
        })
    }

    pub fn config(&self) -> &StftConfig {
        &self.config
    }

    pub fn num_bins(&self) -> usize {
        self.config.num_bins()
    }

    /// Transform a `(batch, channel, time)` waveform
    ///
    /// Returns `(batch, channel, bin, frame)`.
    pub fn forward(&self, waveform: ArrayView3<f32>) -> SfResult<ComplexSpectrogram> {
        let (batch, channels, length) = waveform.dim();
        if channels == 0 {
            return Err(SfError::ShapeMismatch {
                expected: "at least one channel".into(),
                got: shape_string(waveform.shape()),
            });
        }

        let n_frames = self.config.num_frames(length)?;
        let mut spectrum =
            Array4::<Complex32>::zeros((batch, channels, self.num_bins(), n_frames));

        for b in 0..batch {
            for ch in 0..channels {
                // Owned copy; the caller's buffer is never touched
                let signal = waveform.slice(s![b, ch, ..]).to_vec();
                let channel_spec = self.forward_channel(&signal)?;
                spectrum.slice_mut(s![b, ch, .., ..]).assign(&channel_spec);
            }
        }

        Ok(spectrum)
    }

    /// Transform one channel, returning `(bin, frame)`
    pub fn forward_channel(&self, signal: &[f32]) -> SfResult<Array2<Complex32>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let n_frames = self.config.num_frames(signal.len())?;
        let n_bins = self.num_bins();

        let padded = self.pad_signal(signal);

        let mut spectrum = Array2::<Complex32>::zeros((n_bins, n_frames));
        let mut input_buffer = vec![0.0f32; n_fft];
        let mut output_buffer = vec![Complex32::new(0.0, 0.0); n_bins];
        let mut scratch = vec![Complex32::new(0.0, 0.0); self.fft_forward.get_scratch_len()];

        for frame_idx in 0..n_frames {
            let start = frame_idx * hop;

            // Apply window
            for (i, (&sample, &w)) in padded[start..start + n_fft]
                .iter()
                .zip(&self.window)
                .enumerate()
            {
                input_buffer[i] = sample * w;
            }

            self.fft_forward
                .process_with_scratch(&mut input_buffer, &mut output_buffer, &mut scratch)
                .map_err(|e| SfError::Dsp(format!("FFT failed: {}", e)))?;

            for (bin, &val) in output_buffer.iter().enumerate() {
                spectrum[[bin, frame_idx]] = val;
            }
        }

        Ok(spectrum)
    }

    /// Invert a `(batch, channel, bin, frame)` spectrogram to `length` samples
    pub fn inverse(&self, spectrum: ArrayView4<Complex32>, length: usize) -> SfResult<Waveform> {
        let (batch, channels, _, _) = spectrum.dim();
        let mut output = Array3::<f32>::zeros((batch, channels, length));

        for b in 0..batch {
            for ch in 0..channels {
                let signal = self.inverse_channel(spectrum.slice(s![b, ch, .., ..]), length)?;
                output
                    .slice_mut(s![b, ch, ..])
                    .iter_mut()
                    .zip(signal)
                    .for_each(|(out, sample)| *out = sample);
            }
        }

        Ok(output)
    }

    /// Invert one channel's `(bin, frame)` spectrogram to `length` samples
    pub fn inverse_channel(&self, spectrum: ArrayView2<Complex32>, length: usize) -> SfResult<Vec<f32>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let n_bins = self.num_bins();
        let (spec_bins, n_frames) = spectrum.dim();

        if spec_bins != n_bins {
            return Err(SfError::ShapeMismatch {
                expected: format!("{} bins", n_bins),
                got: format!("{} bins", spec_bins),
            });
        }
        if n_frames == 0 {
            return Ok(vec![0.0; length]);
        }

        let total = n_fft + hop * (n_frames - 1);
        let mut output = vec![0.0f32; total];
        let mut envelope = vec![0.0f32; total];

        let mut input_buffer = vec![Complex32::new(0.0, 0.0); n_bins];
        let mut output_buffer = vec![0.0f32; n_fft];
        let mut scratch = vec![Complex32::new(0.0, 0.0); self.fft_inverse.get_scratch_len()];
        let norm = 1.0 / n_fft as f32;

        for frame_idx in 0..n_frames {
            let start = frame_idx * hop;

            for (bin, value) in input_buffer.iter_mut().enumerate() {
                *value = spectrum[[bin, frame_idx]];
            }
            // A real signal has no imaginary DC (or Nyquist) component
            input_buffer[0].im = 0.0;
            if n_fft % 2 == 0 {
                input_buffer[n_bins - 1].im = 0.0;
            }

            self.fft_inverse
                .process_with_scratch(&mut input_buffer, &mut output_buffer, &mut scratch)
                .map_err(|e| SfError::Dsp(format!("IFFT failed: {}", e)))?;

            for (i, (&sample, &w)) in output_buffer.iter().zip(&self.window).enumerate() {
                output[start + i] += sample * norm * w;
                envelope[start + i] += w * w;
            }
        }

        for (sample, &env) in output.iter_mut().zip(&envelope) {
            if env > ENVELOPE_FLOOR {
                *sample /= env;
            }
        }

        let pad = self.config.pad();
        let mut signal: Vec<f32> = output.into_iter().skip(pad).take(length).collect();
        signal.resize(length, 0.0);

        Ok(signal)
    }

    fn pad_signal(&self, signal: &[f32]) -> Vec<f32> {
        let pad = self.config.pad();
        if pad == 0 {
            return signal.to_vec();
        }

        let n = signal.len();
        let mut padded = Vec::with_capacity(n + 2 * pad);

        match self.config.pad_mode {
            PadMode::Reflect if n > pad => {
                padded.extend((1..=pad).rev().map(|i| signal[i]));
                padded.extend_from_slice(signal);
                padded.extend((0..pad).map(|i| signal[n - 2 - i]));
            }
            mode => {
                if mode == PadMode::Reflect {
                    log::debug!(
                        "signal of {} samples too short to reflect-pad by {}, zero padding",
                        n,
                        pad
                    );
                }
                padded.resize(pad, 0.0);
                padded.extend_from_slice(signal);
                padded.resize(n + 2 * pad, 0.0);
            }
        }

        padded
    }
}
