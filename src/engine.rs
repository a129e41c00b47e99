//! The seam to the segmentation network.
//!
//! [`InferenceEngine`] is the single call the pipeline needs. [`ModelService`]
//! owns one lazily loaded engine for the lifetime of the process and is
//! shared between request handlers.

#[cfg(feature = "onnx")]
mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::OnnxEngine;

use ndarray::{Array4, Array5, ArrayView1, ArrayView5, Axis, Zip};
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to load model from {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("no inference backend is compiled in; rebuild with the `onnx` feature")]
    Unavailable,

    #[error("prediction failed: {0}")]
    Predict(String),

    #[error("engine returned shape {actual:?} for input {input:?}; expected [1, X, Y, Z, classes]")]
    MalformedOutput { input: Vec<usize>, actual: Vec<usize> },

    #[error("model reports {0} classes but labels are stored as bytes (at most 256)")]
    TooManyClasses(usize),

    #[error("prediction lock poisoned by an earlier panic")]
    Poisoned,
}

/// A loaded segmentation network.
///
/// `predict` takes a `(1, X, Y, Z, 1)` tensor and returns per-class
/// probabilities of shape `(1, X, Y, Z, C)`. It must be deterministic for
/// identical input.
pub trait InferenceEngine: Send + Sync {
    fn predict(&self, input: ArrayView5<'_, f32>) -> Result<Array5<f32>, EngineError>;

    /// Short human readable description, e.g. the model file.
    fn describe(&self) -> String;

    /// Whether `predict` may be entered from several threads at once.
    fn supports_concurrent_predict(&self) -> bool {
        false
    }
}

type EngineLoader = Box<dyn Fn() -> Result<Box<dyn InferenceEngine>, EngineError> + Send + Sync>;

/// Process-wide owner of the inference engine.
pub struct ModelService {
    loader: EngineLoader,
    engine: OnceCell<Box<dyn InferenceEngine>>,
    predict_lock: Mutex<()>,
}

impl ModelService {
    /// Engine built on first use by `loader`.
    pub fn lazy<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Box<dyn InferenceEngine>, EngineError> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            engine: OnceCell::new(),
            predict_lock: Mutex::new(()),
        }
    }

    /// Service around an engine that is already loaded.
    pub fn with_engine(engine: Box<dyn InferenceEngine>) -> Self {
        let service = Self::lazy(|| Err(EngineError::Unavailable));
        // a fresh cell cannot already be set
        let _ = service.engine.set(engine);
        service
    }

    /// Service that loads the model file at `path` with the compiled-in
    /// backend.
    pub fn from_model_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self::lazy(move || load_backend(&path))
    }

    pub fn is_loaded(&self) -> bool {
        self.engine.get().is_some()
    }

    pub fn describe(&self) -> Option<String> {
        self.engine.get().map(|engine| engine.describe())
    }

    /// Load the engine now if it is not loaded yet. Concurrent callers wait
    /// for the single loader run.
    pub fn engine(&self) -> Result<&dyn InferenceEngine, EngineError> {
        let engine = self.engine.get_or_try_init(|| {
            info!("loading inference engine");
            let engine = (self.loader)()?;
            info!(engine = %engine.describe(), "inference engine loaded");
            Ok::<_, EngineError>(engine)
        })?;
        Ok(engine.as_ref())
    }

    /// Run the network and validate the output shape against the input.
    pub fn predict(&self, input: ArrayView5<'_, f32>) -> Result<Array5<f32>, EngineError> {
        let engine = self.engine()?;
        let output = if engine.supports_concurrent_predict() {
            engine.predict(input.view())?
        } else {
            let _guard = self.predict_lock.lock().map_err(|_| EngineError::Poisoned)?;
            engine.predict(input.view())?
        };

        let input_shape = input.shape();
        let output_shape = output.shape();
        let matches = output_shape.len() == 5
            && output_shape[0] == 1
            && output_shape[1..4] == input_shape[1..4]
            && output_shape[4] > 0;
        if !matches {
            return Err(EngineError::MalformedOutput {
                input: input_shape.to_vec(),
                actual: output_shape.to_vec(),
            });
        }
        Ok(output)
    }

    /// Predict and reduce to a `(1, X, Y, Z)` label array.
    pub fn segment(&self, input: ArrayView5<'_, f32>) -> Result<Array4<u8>, EngineError> {
        let probabilities = self.predict(input)?;
        argmax_labels(&probabilities)
    }
}

#[cfg(feature = "onnx")]
fn load_backend(path: &Path) -> Result<Box<dyn InferenceEngine>, EngineError> {
    Ok(Box::new(OnnxEngine::load(path)?))
}

#[cfg(not(feature = "onnx"))]
fn load_backend(path: &Path) -> Result<Box<dyn InferenceEngine>, EngineError> {
    tracing::warn!(path = %path.display(), "model requested but no inference backend is compiled in");
    Err(EngineError::Unavailable)
}

fn argmax(lane: ArrayView1<'_, f32>) -> u8 {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (class, &value) in lane.iter().enumerate() {
        // strictly greater keeps the lowest index on ties
        if value > best_value {
            best = class;
            best_value = value;
        }
    }
    best as u8
}

/// Index of the most probable class per voxel, over the trailing axis.
pub fn argmax_labels(probabilities: &Array5<f32>) -> Result<Array4<u8>, EngineError> {
    let classes = probabilities.len_of(Axis(4));
    if classes > usize::from(u8::MAX) + 1 {
        return Err(EngineError::TooManyClasses(classes));
    }
    Ok(Zip::from(probabilities.lanes(Axis(4))).par_map_collect(argmax))
}
