//! Separation configuration

use std::path::Path;

use serde::{Deserialize, Serialize};
use sf_dsp::StftConfig;

use crate::error::{MlError, MlResult};
use crate::{sample_rates, targets};

/// Audio layout expected by the models
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate the models were trained at
    pub sample_rate: u32,

    /// Channels of the mixture (and of every output)
    pub nb_channels: usize,

    /// Feed channel-averaged magnitudes to the estimators
    pub mono: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: sample_rates::DEFAULT,
            nb_channels: 2,
            mono: false,
        }
    }
}

/// Estimator selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Estimator input is cut above this frequency (Hz)
    pub bandwidth_hz: f64,

    /// Target names, resolved to models at construction
    pub targets: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            bandwidth_hz: 16000.0,
            targets: vec![targets::PIANO.to_string(), targets::ORCHESTRA.to_string()],
        }
    }
}

/// Multichannel Wiener refinement settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WienerConfig {
    /// Frames per refinement chunk (`None` = whole signal)
    pub window_frames: Option<usize>,

    /// Covariance (EM) passes over the initial estimate; 0 returns it as is
    pub iterations: usize,

    /// Initialise with a power-ratio mask instead of magnitude + mixture phase
    pub softmask: bool,

    /// Add a `residual` source (mixture minus all targets)
    pub residual: bool,

    /// Exponent applied to estimates before ratio masking (2 = power)
    pub mask_power: f32,

    /// Regulariser for weights and covariance diagonals
    pub eps: f32,

    /// Mixture is scaled so its peak modulus is at most this during EM
    pub scale_factor: f32,
}

impl Default for WienerConfig {
    fn default() -> Self {
        Self {
            window_frames: Some(300),
            iterations: 0,
            softmask: false,
            residual: true,
            mask_power: 1.0,
            eps: 1e-10,
            scale_factor: 10.0,
        }
    }
}

impl WienerConfig {
    /// Targets plus the residual, if enabled
    pub fn nb_sources(&self, nb_targets: usize) -> usize {
        nb_targets + usize::from(self.residual)
    }

    /// Covariance passes run after the initial estimate
    pub fn passes(&self) -> usize {
        self.iterations
    }

    /// Validate against the number of modelled targets
    pub fn validate(&self, nb_targets: usize) -> MlResult<()> {
        let nb_sources = self.nb_sources(nb_targets);

        if nb_sources == 0 {
            return Err(MlError::Config("no sources to separate".into()));
        }
        if nb_sources == 1 && self.iterations > 0 {
            return Err(MlError::Config(
                "cannot use EM if only one target is estimated; \
                 provide two targets or enable the residual"
                    .into(),
            ));
        }
        if self.window_frames == Some(0) {
            return Err(MlError::Config("window_frames must be positive".into()));
        }
        if !(self.eps.is_finite() && self.eps > 0.0) {
            return Err(MlError::Config(format!("eps must be positive, got {}", self.eps)));
        }
        if !(self.scale_factor.is_finite() && self.scale_factor > 0.0) {
            return Err(MlError::Config(format!(
                "scale_factor must be positive, got {}",
                self.scale_factor
            )));
        }
        if !(self.mask_power.is_finite() && self.mask_power > 0.0) {
            return Err(MlError::Config(format!(
                "mask_power must be positive, got {}",
                self.mask_power
            )));
        }

        Ok(())
    }
}

/// Full separation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparationConfig {
    /// Transform pair
    pub stft: StftConfig,

    /// Audio layout
    pub audio: AudioConfig,

    /// Estimators
    pub model: ModelConfig,

    /// Refinement
    pub wiener: WienerConfig,

    /// Worker threads for estimation/refinement (0 = all cores)
    pub num_threads: usize,
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            stft: StftConfig::default(),
            audio: AudioConfig::default(),
            model: ModelConfig::default(),
            wiener: WienerConfig::default(),
            num_threads: num_cpus::get(),
        }
    }
}

impl SeparationConfig {
    /// Mask-only refinement, no spatial statistics
    pub fn fast() -> Self {
        Self {
            wiener: WienerConfig {
                softmask: true,
                iterations: 0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// One covariance pass over the magnitude estimate
    pub fn high_quality() -> Self {
        Self {
            wiener: WienerConfig {
                iterations: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Replace the target list
    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.model.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    /// Check every scalar before any processing
    pub fn validate(&self, nb_targets: usize) -> MlResult<()> {
        self.stft.validate()?;

        if self.audio.sample_rate == 0 {
            return Err(MlError::Config("sample_rate must be positive".into()));
        }
        if self.audio.nb_channels == 0 {
            return Err(MlError::Config("nb_channels must be positive".into()));
        }

        self.wiener.validate(nb_targets)
    }

    /// Load from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> MlResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parse from JSON; missing fields take their defaults
    pub fn from_json_str(text: &str) -> MlResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize to pretty JSON
    pub fn to_json_string(&self) -> MlResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Estimate peak memory in MB for a mixture of `duration_secs`
    pub fn estimated_memory_mb(&self, duration_secs: f32, nb_targets: usize) -> f32 {
        let samples = duration_secs * self.audio.sample_rate as f32;
        let channels = self.audio.nb_channels as f32;
        let sources = self.wiener.nb_sources(nb_targets) as f32;

        let frames = samples / self.stft.hop_length as f32 + 1.0;
        let bins = self.stft.num_bins() as f32;

        // Mixture + complex target arena (8 bytes per cell)
        let complex_mb = frames * bins * channels * (1.0 + sources) * 8.0 / 1_000_000.0;

        // Magnitude stack (4 bytes per cell)
        let magnitude_mb = frames * bins * channels * (1.0 + nb_targets as f32) * 4.0 / 1_000_000.0;

        // Waveform outputs
        let waveform_mb = samples * channels * (1.0 + sources) * 4.0 / 1_000_000.0;

        complex_mb + magnitude_mb + waveform_mb
    }
}
