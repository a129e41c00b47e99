use super::{EngineError, InferenceEngine};

use ndarray::{Array5, ArrayView5};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// ONNX Runtime backend. A single session is shared; runs are serialized
/// on its mutex.
pub struct OnnxEngine {
    session: Mutex<Session>,
    model_path: PathBuf,
}

impl OnnxEngine {
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let load_error = |e: ort::Error| EngineError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        if !path.is_file() {
            return Err(EngineError::Load {
                path: path.to_path_buf(),
                reason: "model file does not exist".to_owned(),
            });
        }

        let session = Session::builder()
            .map_err(load_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_error)?
            .commit_from_file(path)
            .map_err(load_error)?;

        Ok(Self {
            session: Mutex::new(session),
            model_path: path.to_path_buf(),
        })
    }
}

impl InferenceEngine for OnnxEngine {
    fn predict(&self, input: ArrayView5<'_, f32>) -> Result<Array5<f32>, EngineError> {
        let input = input.as_standard_layout();
        let dims: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let data = input
            .as_slice()
            .ok_or_else(|| EngineError::Predict("input tensor is not contiguous".to_owned()))?;
        let tensor = TensorRef::from_array_view((dims, data))
            .map_err(|e| EngineError::Predict(format!("tensor conversion: {e}")))?;

        let mut session = self.session.lock().map_err(|_| EngineError::Poisoned)?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| EngineError::Predict(format!("forward pass: {e}")))?;
        let (shape, values) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::Predict(format!("output extraction: {e}")))?;

        let shape: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        let &[batch, x, y, z, classes] = shape.as_slice() else {
            return Err(EngineError::MalformedOutput {
                input: input.shape().to_vec(),
                actual: shape.clone(),
            });
        };
        Array5::from_shape_vec((batch, x, y, z, classes), values.to_vec())
            .map_err(|e| EngineError::Predict(format!("output reshape: {e}")))
    }

    fn describe(&self) -> String {
        format!("onnx:{}", self.model_path.display())
    }

    fn supports_concurrent_predict(&self) -> bool {
        // the session mutex already serializes runs
        true
    }
}
