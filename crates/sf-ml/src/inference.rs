//! ONNX inference engine
//!
//! Pure Rust backend built on tract. Estimator models take a magnitude
//! spectrogram `[batch, channels, bins, frames]` and return one of the same
//! rank.

use std::path::Path;

use ndarray::{Array4, ArrayD, Ix4, IxDyn};
use tract_onnx::prelude::*;

use crate::error::{MlError, MlResult};

/// Configuration for inference engine
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Run tract's graph optimiser after loading
    pub optimize_graph: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            optimize_graph: true,
        }
    }
}

/// Loaded, runnable ONNX model
pub struct InferenceEngine {
    /// Runnable plan
    model: TypedRunnableModel<TypedModel>,

    /// Source file, for diagnostics
    model_path: String,
}

impl std::fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("model_path", &self.model_path)
            .finish()
    }
}

impl InferenceEngine {
    /// Load model from an ONNX file
    pub fn new<P: AsRef<Path>>(model_path: P, config: InferenceConfig) -> MlResult<Self> {
        let path = model_path.as_ref();

        if !path.exists() {
            return Err(MlError::ModelNotFound {
                path: path.display().to_string(),
            });
        }

        log::info!(
            "Loading model {} (optimize_graph = {})",
            path.display(),
            config.optimize_graph
        );

        let model = Self::load_tract_model(path, &config)?;

        Ok(Self {
            model,
            model_path: path.display().to_string(),
        })
    }

    fn load_tract_model(path: &Path, config: &InferenceConfig) -> MlResult<TypedRunnableModel<TypedModel>> {
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| MlError::TractError(e.to_string()))?;

        let typed = if config.optimize_graph {
            model.into_optimized()
        } else {
            model.into_typed()
        }
        .map_err(|e| MlError::TractError(e.to_string()))?;

        typed
            .into_runnable()
            .map_err(|e| MlError::TractError(e.to_string()))
    }

    pub fn model_path(&self) -> &str {
        &self.model_path
    }

    /// Run inference with f32 inputs/outputs
    pub fn run_f32(&self, inputs: &[ArrayD<f32>]) -> MlResult<Vec<ArrayD<f32>>> {
        // Copy through flat buffers so tract's ndarray version never has to match ours
        let tract_inputs: TVec<TValue> = inputs
            .iter()
            .map(|arr| {
                let data: Vec<f32> = arr.iter().copied().collect();
                Tensor::from_shape(arr.shape(), &data)
                    .map(TValue::from)
                    .map_err(|e| MlError::TractError(e.to_string()))
            })
            .collect::<MlResult<_>>()?;

        let outputs = self
            .model
            .run(tract_inputs)
            .map_err(|e| MlError::TractError(e.to_string()))?;

        outputs
            .iter()
            .map(|output| {
                let data = output
                    .as_slice::<f32>()
                    .map_err(|e| MlError::TractError(e.to_string()))?;
                ArrayD::from_shape_vec(IxDyn(output.shape()), data.to_vec())
                    .map_err(|e| MlError::ProcessingFailed(format!("Output conversion failed: {}", e)))
            })
            .collect()
    }

    /// Run inference with a 4D input, return the first output as 4D
    ///
    /// Input and output: `[batch, channels, bins, frames]`
    pub fn run_array4(&self, input: &Array4<f32>) -> MlResult<Array4<f32>> {
        let outputs = self.run_f32(&[input.clone().into_dyn()])?;

        let output = outputs.into_iter().next().ok_or_else(|| MlError::InferenceFailed {
            reason: "No output from model".into(),
        })?;

        if output.ndim() != 4 {
            return Err(MlError::InvalidOutputShape {
                expected: "4D tensor [batch, channels, bins, frames]".into(),
                got: format!("{}D tensor {:?}", output.ndim(), output.shape()),
            });
        }

        output
            .into_dimensionality::<Ix4>()
            .map_err(|e| MlError::ProcessingFailed(format!("Shape conversion failed: {}", e)))
    }
}
