//! Estimator backends

use std::ops::Range;
use std::path::Path;

use ndarray::{s, Array4, ArrayView4, Axis};
use sf_core::shape_string;
use sf_dsp::bandwidth_to_max_bin;

use super::SourceEstimator;
use crate::error::{MlError, MlResult};
use crate::inference::{InferenceConfig, InferenceEngine};

/// Trained per-target model run through tract
///
/// Only the first `max_bin` bins are fed to the model; it must return the
/// full bin count.
pub struct OnnxEstimator {
    /// Target name
    name: String,

    /// Loaded model
    engine: InferenceEngine,

    /// Input bins kept after bandwidth limiting
    max_bin: usize,
}

impl OnnxEstimator {
    /// Load a model file for `name`
    pub fn new<P: AsRef<Path>>(name: impl Into<String>, model_path: P, max_bin: usize) -> MlResult<Self> {
        if max_bin == 0 {
            return Err(MlError::Config("max_bin must be positive".into()));
        }

        let engine = InferenceEngine::new(model_path, InferenceConfig::default())?;

        Ok(Self {
            name: name.into(),
            engine,
            max_bin,
        })
    }

    /// Resolve `<model_dir>/<target>.onnx`
    pub fn from_model_dir<P: AsRef<Path>>(model_dir: P, target: &str, max_bin: usize) -> MlResult<Self> {
        let path = model_dir.as_ref().join(format!("{}.onnx", target));
        Self::new(target, path, max_bin)
    }

    pub fn max_bin(&self) -> usize {
        self.max_bin
    }
}

impl SourceEstimator for OnnxEstimator {
    fn estimate(&self, magnitude: ArrayView4<f32>) -> MlResult<Array4<f32>> {
        run_bandlimited(magnitude, self.max_bin, |input| self.engine.run_array4(input))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Feed the first `max_bin` bins to `model` and check it returns every bin
///
/// Negative model outputs are clamped to 0.
fn run_bandlimited<F>(magnitude: ArrayView4<f32>, max_bin: usize, model: F) -> MlResult<Array4<f32>>
where
    F: FnOnce(&Array4<f32>) -> MlResult<Array4<f32>>,
{
    let nb_bins = magnitude.dim().2;
    if nb_bins < max_bin {
        return Err(MlError::ShapeMismatch {
            expected: format!("at least {} bins", max_bin),
            got: shape_string(magnitude.shape()),
        });
    }

    let input = magnitude.slice(s![.., .., ..max_bin, ..]).to_owned();
    let output = model(&input)?;

    if output.dim() != magnitude.dim() {
        return Err(MlError::InvalidOutputShape {
            expected: shape_string(magnitude.shape()),
            got: shape_string(output.shape()),
        });
    }

    Ok(output.mapv(|v| v.max(0.0)))
}

/// Model-free estimator keeping one band of the mixture magnitude
///
/// Useful for previews and for exercising the pipeline without weights.
#[derive(Debug, Clone)]
pub struct BandEstimator {
    /// Target name
    name: String,

    /// Bins passed through
    bins: Range<usize>,

    /// Gain applied inside the band
    gain: f32,
}

impl BandEstimator {
    pub fn new(name: impl Into<String>, bins: Range<usize>, gain: f32) -> Self {
        Self {
            name: name.into(),
            bins,
            gain: gain.max(0.0),
        }
    }

    /// Band from the bin at or below `low_hz` to the bin at or below `high_hz`
    pub fn from_frequencies(
        name: impl Into<String>,
        sample_rate: u32,
        n_fft: usize,
        low_hz: f64,
        high_hz: f64,
        gain: f32,
    ) -> MlResult<Self> {
        if high_hz < low_hz {
            return Err(MlError::Config(format!(
                "band upper edge {} Hz below lower edge {} Hz",
                high_hz, low_hz
            )));
        }

        let start = bandwidth_to_max_bin(sample_rate, n_fft, low_hz)? - 1;
        let end = bandwidth_to_max_bin(sample_rate, n_fft, high_hz)?;

        Ok(Self::new(name, start..end, gain))
    }

    pub fn bins(&self) -> Range<usize> {
        self.bins.clone()
    }
}

impl SourceEstimator for BandEstimator {
    fn estimate(&self, magnitude: ArrayView4<f32>) -> MlResult<Array4<f32>> {
        let nb_bins = magnitude.dim().2;
        let mut output = magnitude.to_owned();

        for (bin, mut lane) in output.axis_iter_mut(Axis(2)).enumerate() {
            if self.bins.contains(&bin) {
                lane.mapv_inplace(|v| v * self.gain);
            } else {
                lane.fill(0.0);
            }
        }

        if self.bins.end > nb_bins {
            log::debug!(
                "band {:?} of '{}' extends past {} bins",
                self.bins,
                self.name,
                nb_bins
            );
        }

        Ok(output)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
