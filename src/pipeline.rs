//! The per-request segmentation pipeline.
//!
//! File path: decode, canonicalize, resample, conform, normalize, lay out,
//! infer, undo the layout and undo the conformation. Tensor path: the upload
//! already is the conformed cube, so only normalize, lay out, infer and undo
//! the layout run.

use crate::conform::{self, ConformError, ConformationMapping};
use crate::encoding::{self, EncodingError};
use crate::engine::{EngineError, ModelService};
use crate::enums::ErrorKind;
use crate::interpolator::{self, ResampleError};
use crate::layout::{self, LayoutError};
use crate::orientation;
use crate::volume::{SpatialFrame, Volume};
use crate::volume_loader::{VolumeLoader, VolumeLoaderError};
use crate::{CUBE_EDGE, TARGET_SPACING};

use ndarray::Array3;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, info_span};
use web_time::Instant;

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Decode(#[from] VolumeLoaderError),

    #[error("resampling: {0}")]
    Resample(#[from] ResampleError),

    #[error("conformation: {0}")]
    Conform(#[from] ConformError),

    #[error("layout: {0}")]
    Layout(#[from] LayoutError),

    #[error("tensor: {0}")]
    Tensor(#[from] EncodingError),

    #[error("inference: {0}")]
    Engine(#[from] EngineError),
}

impl SegmentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Tensor(
                EncodingError::TensorLength { .. }
                | EncodingError::ShapeLength { .. }
                | EncodingError::Oversized { .. },
            ) => ErrorKind::InvalidInput,
            Self::Decode(VolumeLoaderError::UnsupportedExtension(_) | VolumeLoaderError::Empty) => {
                ErrorKind::InvalidInput
            }
            Self::Decode(VolumeLoaderError::Orientation(_)) => ErrorKind::Pipeline,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Resample(_) | Self::Conform(_) | Self::Layout(_) => {
                ErrorKind::Pipeline
            }
            Self::Tensor(EncodingError::Compression(_)) => ErrorKind::Pipeline,
            Self::Engine(_) => ErrorKind::Engine,
        }
    }
}

/// Geometry of the network input. Defaults to the global constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConformSettings {
    pub cube_edge: usize,
    pub target_spacing: f32,
}

impl Default for ConformSettings {
    fn default() -> Self {
        Self {
            cube_edge: CUBE_EDGE,
            target_spacing: TARGET_SPACING,
        }
    }
}

/// Seconds spent per stage, rounded to milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StageTimings {
    pub parse: f64,
    pub preprocess: f64,
    pub inference: f64,
    pub total: f64,
}

struct Stopwatch {
    started: Instant,
    checkpoint: Instant,
}

impl Stopwatch {
    fn start() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            checkpoint: now,
        }
    }

    fn lap(&mut self) -> f64 {
        let now = Instant::now();
        let seconds = now.duration_since(self.checkpoint).as_secs_f64();
        self.checkpoint = now;
        round_millis(seconds)
    }

    fn total(&self) -> f64 {
        round_millis(self.started.elapsed().as_secs_f64())
    }
}

fn round_millis(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

/// Per-request state; created at request start and dropped with the
/// response.
#[derive(Debug, Clone, Serialize)]
pub struct RequestContext {
    pub original_shape: [usize; 3],
    pub resampled_shape: [usize; 3],
    pub mapping: ConformationMapping,
    pub timings: StageTimings,
}

/// Result of the file path.
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Labels on the resampled RAS+ grid, before conformation.
    pub labels: Array3<u8>,
    pub context: RequestContext,
}

impl Segmentation {
    pub fn shape(&self) -> [usize; 3] {
        let (x, y, z) = self.labels.dim();
        [x, y, z]
    }

    pub fn unique_labels(&self) -> Vec<u8> {
        unique_labels(&self.labels)
    }
}

/// Result of the tensor path.
#[derive(Debug, Clone)]
pub struct TensorSegmentation {
    pub labels: Array3<u8>,
    pub inference_seconds: f64,
    pub total_seconds: f64,
}

/// Sorted distinct labels present in `labels`.
pub fn unique_labels(labels: &Array3<u8>) -> Vec<u8> {
    let mut seen = [false; 256];
    labels.iter().for_each(|&l| seen[usize::from(l)] = true);
    (0..=u8::MAX).filter(|&l| seen[usize::from(l)]).collect()
}

/// The conformed, normalized cube that is fed to the network, along with
/// the mapping needed to undo the conformation.
#[derive(Debug, Clone)]
pub struct PreparedVolume {
    pub original_shape: [usize; 3],
    pub resampled_shape: [usize; 3],
    pub cube: Volume,
    pub mapping: ConformationMapping,
}

pub struct Segmenter {
    model: Arc<ModelService>,
    settings: ConformSettings,
}

impl Segmenter {
    pub fn new(model: Arc<ModelService>) -> Self {
        Self::with_settings(model, ConformSettings::default())
    }

    pub fn with_settings(model: Arc<ModelService>, settings: ConformSettings) -> Self {
        Self { model, settings }
    }

    pub fn model(&self) -> &ModelService {
        &self.model
    }

    /// Canonicalize, resample, conform and normalize a decoded volume.
    pub fn prepare(&self, volume: &Volume) -> Result<PreparedVolume, SegmentError> {
        let original_shape = volume.shape();
        info!(
            shape = ?original_shape,
            orientation = %volume.frame.orientation,
            spacing = ?volume.frame.spacing,
            "preparing volume"
        );

        let canonical = orientation::canonicalize(volume);
        let resampled = interpolator::resample_isotropic(&canonical, self.settings.target_spacing)?;
        let resampled_shape = resampled.shape();
        info!(shape = ?resampled_shape, "resampled to isotropic spacing");

        let (cube, mapping) = conform::conform(&resampled, self.settings.cube_edge)?;
        info!(
            source_offsets = ?mapping.source_offsets(),
            destination_offsets = ?mapping.destination_offsets(),
            "conformed to cube"
        );

        Ok(PreparedVolume {
            original_shape,
            resampled_shape,
            cube: cube.normalized(),
            mapping,
        })
    }

    /// Lay out, infer and undo the layout for a normalized cube.
    pub fn infer_cube(&self, cube: &Volume) -> Result<Array3<u8>, SegmentError> {
        let input = layout::to_network_input(cube.data.view());
        let labels = self.model.segment(input.view())?;
        Ok(layout::from_network_output(labels)?)
    }

    /// Full file path: decode through inverse mapping.
    pub fn segment_file(&self, bytes: &[u8], filename: &str) -> Result<Segmentation, SegmentError> {
        let _span = info_span!("segment_file", filename).entered();
        if !VolumeLoader::is_supported_filename(filename) {
            return Err(VolumeLoaderError::UnsupportedExtension(filename.to_owned()).into());
        }
        let mut stopwatch = Stopwatch::start();

        let volume = VolumeLoader::load_from_bytes(bytes, filename)?;
        let parse = stopwatch.lap();
        info!(shape = ?volume.shape(), seconds = parse, "parsed volume");

        let prepared = self.prepare(&volume)?;
        let preprocess = stopwatch.lap();

        let cube_labels = self.infer_cube(&prepared.cube)?;
        let labels = prepared.mapping.restore(&cube_labels)?;
        let inference = stopwatch.lap();
        info!(shape = ?labels.dim(), seconds = inference, "inference finished");

        Ok(Segmentation {
            labels,
            context: RequestContext {
                original_shape: prepared.original_shape,
                resampled_shape: prepared.resampled_shape,
                mapping: prepared.mapping,
                timings: StageTimings {
                    parse,
                    preprocess,
                    inference,
                    total: stopwatch.total(),
                },
            },
        })
    }

    /// Tensor path: the upload is an already conformed byte cube.
    pub fn segment_tensor(&self, upload: &[u8]) -> Result<TensorSegmentation, SegmentError> {
        let _span = info_span!("segment_tensor", bytes = upload.len()).entered();
        let stopwatch = Stopwatch::start();
        let edge = self.settings.cube_edge;

        let cube = encoding::decode_tensor_upload(upload, edge)?;
        let spacing = self.settings.target_spacing;
        let volume = Volume::new(
            cube.mapv(f32::from),
            SpatialFrame::canonical((spacing, spacing, spacing)),
        )
        .normalized();

        let inference_started = Instant::now();
        let labels = self.infer_cube(&volume)?;
        let inference_seconds = round_millis(inference_started.elapsed().as_secs_f64());
        info!(shape = ?labels.dim(), seconds = inference_seconds, "tensor inference finished");

        Ok(TensorSegmentation {
            labels,
            inference_seconds,
            total_seconds: stopwatch.total(),
        })
    }
}
