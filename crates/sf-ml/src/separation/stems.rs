//! Stem types and output structures

use std::collections::{BTreeMap, HashMap};

use ndarray::{Array3, Zip};
use sf_core::shape_string;

use crate::error::{MlError, MlResult};

/// Grouping of separated sources into new stems
///
/// Key: new stem name. Value: source names summed into it.
pub type Aggregation = BTreeMap<String, Vec<String>>;

/// Single separated source
#[derive(Debug, Clone)]
pub struct StemOutput {
    /// Source name (`residual` for the remainder)
    pub name: String,

    /// Audio data `(batch, channel, time)`
    pub audio: Array3<f32>,

    /// Sample rate
    pub sample_rate: u32,
}

impl StemOutput {
    /// Create new stem output
    pub fn new(name: impl Into<String>, audio: Array3<f32>, sample_rate: u32) -> Self {
        Self {
            name: name.into(),
            audio,
            sample_rate,
        }
    }

    /// Number of channels
    pub fn channels(&self) -> usize {
        self.audio.dim().1
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.audio.dim().2 as f64 / self.sample_rate as f64
    }

    /// Compute RMS level
    pub fn rms(&self) -> f32 {
        if self.audio.is_empty() {
            return 0.0;
        }

        let sum_sq: f32 = self.audio.iter().map(|&s| s * s).sum();
        (sum_sq / self.audio.len() as f32).sqrt()
    }

    /// Compute peak level
    pub fn peak(&self) -> f32 {
        self.audio.iter().map(|&s| s.abs()).fold(0.0f32, f32::max)
    }
}

/// Collection of separated stems, in separator order
#[derive(Debug, Clone)]
pub struct StemCollection {
    /// All stems
    stems: Vec<StemOutput>,

    /// Sample rate
    pub sample_rate: u32,
}

impl StemCollection {
    /// Create new stem collection
    pub fn new(sample_rate: u32) -> Self {
        Self {
            stems: Vec::new(),
            sample_rate,
        }
    }

    /// Add a stem, replacing any stem with the same name
    pub fn add(&mut self, stem: StemOutput) {
        match self.stems.iter_mut().find(|s| s.name == stem.name) {
            Some(existing) => *existing = stem,
            None => self.stems.push(stem),
        }
    }

    /// Get a stem by name
    pub fn get(&self, name: &str) -> Option<&StemOutput> {
        self.stems.iter().find(|s| s.name == name)
    }

    /// Stem names, in order
    pub fn names(&self) -> Vec<&str> {
        self.stems.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StemOutput> {
        self.stems.iter()
    }

    /// Number of stems
    pub fn len(&self) -> usize {
        self.stems.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }

    /// Remix stems with custom gains (missing names keep unity gain)
    pub fn remix(&self, gains: &HashMap<String, f32>) -> Option<Array3<f32>> {
        let reference = self.stems.first()?;
        let mut output = Array3::<f32>::zeros(reference.audio.raw_dim());

        for stem in &self.stems {
            let gain = gains.get(&stem.name).copied().unwrap_or(1.0);
            if stem.audio.dim() != output.dim() {
                log::warn!(
                    "skipping stem '{}' in remix: shape {} differs from {}",
                    stem.name,
                    shape_string(stem.audio.shape()),
                    shape_string(output.shape())
                );
                continue;
            }
            output.scaled_add(gain, &stem.audio);
        }

        Some(output)
    }

    /// Sum stems into new groups
    ///
    /// Every referenced name must exist. The result holds exactly the
    /// aggregation's keys; a group without members is silence shaped like
    /// the first stem.
    pub fn aggregate(&self, aggregation: &Aggregation) -> MlResult<StemCollection> {
        let mut grouped = StemCollection::new(self.sample_rate);

        for (group, members) in aggregation {
            let mut sum: Option<Array3<f32>> = None;

            for member in members {
                let stem = self
                    .get(member)
                    .ok_or_else(|| MlError::UnknownTarget(member.clone()))?;

                match sum.as_mut() {
                    None => sum = Some(stem.audio.clone()),
                    Some(acc) => {
                        if acc.dim() != stem.audio.dim() {
                            return Err(MlError::ShapeMismatch {
                                expected: shape_string(acc.shape()),
                                got: shape_string(stem.audio.shape()),
                            });
                        }
                        Zip::from(acc).and(&stem.audio).for_each(|a, &b| *a += b);
                    }
                }
            }

            let audio = match sum {
                Some(audio) => audio,
                None => {
                    let reference = self.stems.first().ok_or_else(|| {
                        MlError::Config(format!("cannot shape empty group '{}' without stems", group))
                    })?;
                    Array3::zeros(reference.audio.raw_dim())
                }
            };
            grouped.add(StemOutput::new(group.clone(), audio, self.sample_rate));
        }

        Ok(grouped)
    }
}

impl IntoIterator for StemCollection {
    type Item = StemOutput;
    type IntoIter = std::vec::IntoIter<StemOutput>;

    fn into_iter(self) -> Self::IntoIter {
        self.stems.into_iter()
    }
}
