//! Separation orchestrator

use std::collections::HashSet;
use std::path::Path;

use ndarray::{s, stack, Array4, Array5, ArrayView3, ArrayView4, ArrayView5, Axis};
use num_complex::Complex32;
use rayon::prelude::*;
use sf_core::shape_string;
use sf_dsp::{bandwidth_to_max_bin, ComplexNorm, Stft};
use tracing::{debug, debug_span, info};

use super::config::SeparationConfig;
use super::estimator::OnnxEstimator;
use super::stems::{Aggregation, StemCollection, StemOutput};
use super::wiener::{frame_chunks, wiener};
use super::SourceEstimator;
use crate::error::{MlError, MlResult};
use crate::targets;

/// Raw separator output
#[derive(Debug, Clone)]
pub struct SeparationOutput {
    /// Waveforms `(batch, source, channel, time)`
    pub estimates: Array4<f32>,

    /// Refined spectrograms `(batch, source, channel, bin, frame)`
    pub targets_stft: Array5<Complex32>,
}

/// Mixture in, one waveform per source out
pub struct Separator {
    config: SeparationConfig,
    stft: Stft,
    norm: ComplexNorm,

    /// Bins fed to bandwidth-limited estimators
    max_bin: usize,

    estimators: Vec<Box<dyn SourceEstimator>>,
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for Separator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Separator")
            .field("sources", &self.source_names())
            .field("max_bin", &self.max_bin)
            .field("config", &self.config)
            .finish()
    }
}

impl Separator {
    /// Build from explicit estimators
    ///
    /// Names must be unique and, with the residual enabled, must not clash
    /// with `residual`.
    pub fn new(config: SeparationConfig, estimators: Vec<Box<dyn SourceEstimator>>) -> MlResult<Self> {
        if estimators.is_empty() {
            return Err(MlError::Config("at least one estimator is required".into()));
        }

        let mut seen = HashSet::new();
        for estimator in &estimators {
            let name = estimator.name();
            if !seen.insert(name) {
                return Err(MlError::Config(format!("duplicate target '{}'", name)));
            }
            if config.wiener.residual && name == targets::RESIDUAL {
                return Err(MlError::Config(format!(
                    "target name '{}' is reserved while the residual is enabled",
                    targets::RESIDUAL
                )));
            }
        }

        config.validate(estimators.len())?;

        let stft = Stft::new(config.stft)?;
        let max_bin = bandwidth_to_max_bin(config.audio.sample_rate, config.stft.n_fft, config.model.bandwidth_hz)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(|i| format!("sf-separate-{}", i))
            .build()
            .map_err(|e| MlError::ProcessingFailed(format!("thread pool: {}", e)))?;

        info!(
            "Separator ready: {} target(s), residual = {}, passes = {}, max_bin = {}/{}",
            estimators.len(),
            config.wiener.residual,
            config.wiener.passes(),
            max_bin,
            stft.num_bins()
        );

        Ok(Self {
            norm: ComplexNorm::new(config.audio.mono),
            config,
            stft,
            max_bin,
            estimators,
            pool,
        })
    }

    /// Load `<model_dir>/<target>.onnx` for every configured target
    pub fn from_model_dir<P: AsRef<Path>>(config: SeparationConfig, model_dir: P) -> MlResult<Self> {
        config.stft.validate()?;
        let max_bin = bandwidth_to_max_bin(config.audio.sample_rate, config.stft.n_fft, config.model.bandwidth_hz)?;

        let estimators = config
            .model
            .targets
            .iter()
            .map(|target| {
                OnnxEstimator::from_model_dir(model_dir.as_ref(), target, max_bin)
                    .map(|e| Box::new(e) as Box<dyn SourceEstimator>)
            })
            .collect::<MlResult<Vec<_>>>()?;

        Self::new(config, estimators)
    }

    pub fn config(&self) -> &SeparationConfig {
        &self.config
    }

    pub fn max_bin(&self) -> usize {
        self.max_bin
    }

    /// Output names: targets in estimator order, then `residual` if enabled
    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.estimators.iter().map(|e| e.name().to_string()).collect();
        if self.config.wiener.residual {
            names.push(targets::RESIDUAL.to_string());
        }
        names
    }

    /// Separate a `(batch, channel, time)` mixture
    pub fn forward(&self, mix: ArrayView3<f32>) -> MlResult<SeparationOutput> {
        let (nb_samples, nb_channels, length) = mix.dim();

        if nb_channels != self.config.audio.nb_channels {
            return Err(MlError::ChannelMismatch {
                expected: self.config.audio.nb_channels,
                got: nb_channels,
            });
        }
        if nb_samples == 0 || length == 0 {
            return Err(MlError::ShapeMismatch {
                expected: "non-empty (batch, channel, time)".into(),
                got: shape_string(mix.shape()),
            });
        }

        let span = debug_span!("separate", samples = nb_samples, length);
        let _enter = span.enter();

        self.pool.install(|| {
            let mix_stft = self.stft.forward(mix)?;
            let magnitude = self.norm.apply(mix_stft.view());

            let estimates = self.estimate_targets(magnitude.view())?;
            let targets_stft = self.refine(estimates.view(), mix_stft.view())?;
            let waveforms = self.inverse(targets_stft.view(), length)?;

            Ok(SeparationOutput {
                estimates: waveforms,
                targets_stft,
            })
        })
    }

    /// Separate and name every source
    pub fn separate(&self, mix: ArrayView3<f32>) -> MlResult<StemCollection> {
        let output = self.forward(mix)?;
        self.to_collection(output.estimates.view(), None)
    }

    /// Separate, then sum sources into the groups of `aggregation`
    pub fn separate_aggregated(&self, mix: ArrayView3<f32>, aggregation: &Aggregation) -> MlResult<StemCollection> {
        let output = self.forward(mix)?;
        self.to_collection(output.estimates.view(), Some(aggregation))
    }

    /// Name `(batch, source, channel, time)` waveforms, optionally grouped
    pub fn to_collection(
        &self,
        estimates: ArrayView4<f32>,
        aggregation: Option<&Aggregation>,
    ) -> MlResult<StemCollection> {
        let names = self.source_names();
        if estimates.dim().1 != names.len() {
            return Err(MlError::ShapeMismatch {
                expected: format!("{} sources", names.len()),
                got: shape_string(estimates.shape()),
            });
        }

        let mut collection = StemCollection::new(self.config.audio.sample_rate);
        for (j, name) in names.into_iter().enumerate() {
            let audio = estimates.index_axis(Axis(1), j).to_owned();
            collection.add(StemOutput::new(name, audio, self.config.audio.sample_rate));
        }

        match aggregation {
            Some(aggregation) => collection.aggregate(aggregation),
            None => Ok(collection),
        }
    }

    /// Run every estimator; returns `(batch, target, channel|1, bin, frame)`
    fn estimate_targets(&self, magnitude: ArrayView4<f32>) -> MlResult<Array5<f32>> {
        let outputs = self
            .estimators
            .par_iter()
            .map(|estimator| {
                debug!("estimating '{}'", estimator.name());

                let output = estimator.estimate(magnitude)?;
                if output.dim() != magnitude.dim() {
                    return Err(MlError::ShapeMismatch {
                        expected: format!("{} from '{}'", shape_string(magnitude.shape()), estimator.name()),
                        got: shape_string(output.shape()),
                    });
                }
                Ok(output)
            })
            .collect::<MlResult<Vec<Array4<f32>>>>()?;

        let views: Vec<_> = outputs.iter().map(|o| o.view()).collect();
        stack(Axis(1), &views).map_err(|e| MlError::ProcessingFailed(format!("stacking estimates: {}", e)))
    }

    /// Wiener refinement per sample and frame chunk
    fn refine(&self, estimates: ArrayView5<f32>, mix_stft: ArrayView4<Complex32>) -> MlResult<Array5<Complex32>> {
        let (nb_samples, nb_channels, nb_bins, nb_frames) = mix_stft.dim();
        let nb_sources = self.config.wiener.nb_sources(self.estimators.len());

        let mut targets_stft = Array5::<Complex32>::zeros((nb_samples, nb_sources, nb_channels, nb_bins, nb_frames));
        let chunks = frame_chunks(nb_frames, self.config.wiener.window_frames);

        for sample in 0..nb_samples {
            for chunk in &chunks {
                debug!("refining sample {} frames {:?}", sample, chunk);

                let refined = wiener(
                    estimates.slice(s![sample, .., .., .., chunk.clone()]),
                    mix_stft.slice(s![sample, .., .., chunk.clone()]),
                    &self.config.wiener,
                )?;
                targets_stft
                    .slice_mut(s![sample, .., .., .., chunk.clone()])
                    .assign(&refined);
            }
        }

        Ok(targets_stft)
    }

    /// Inverse STFT per (sample, source), trimmed to `length`
    fn inverse(&self, targets_stft: ArrayView5<Complex32>, length: usize) -> MlResult<Array4<f32>> {
        let (nb_samples, nb_sources, nb_channels, _, _) = targets_stft.dim();

        let pairs: Vec<(usize, usize)> = (0..nb_samples)
            .flat_map(|b| (0..nb_sources).map(move |j| (b, j)))
            .collect();

        let waveforms = pairs
            .par_iter()
            .map(|&(b, j)| {
                let spectrum = targets_stft.slice(s![b, j, .., .., ..]).insert_axis(Axis(0));
                self.stft.inverse(spectrum, length).map_err(MlError::from)
            })
            .collect::<MlResult<Vec<_>>>()?;

        let mut output = Array4::<f32>::zeros((nb_samples, nb_sources, nb_channels, length));
        for (&(b, j), waveform) in pairs.iter().zip(&waveforms) {
            output
                .slice_mut(s![b, j, .., ..])
                .assign(&waveform.index_axis(Axis(0), 0));
        }

        Ok(output)
    }
}
