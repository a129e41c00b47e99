//! # MRI-segment library
//!
//! This crate serves a brain MRI segmentation network over HTTP and, more
//! importantly, owns the geometry around it: how an MRI volume of arbitrary
//! shape, spacing and axis order is conformed onto the fixed cube the network
//! was trained on, and how the network's labels are mapped back.
//!
//! A request flows through these stages:
//!  - NIfTI decoding from memory (`.nii` and `.nii.gz`)
//!  - Orientation canonicalization to RAS+ (axis permutation and flips only)
//!  - Isotropic resampling with trilinear interpolation
//!  - Centered crop/pad onto a [`CUBE_EDGE`]^3 cube, recording the mapping
//!  - Min/max intensity normalization
//!  - Network layout (transpose plus batch and channel axes)
//!  - Inference and per-voxel arg-max
//!  - Inverse layout and inverse conformation
//!
//! Volumes that are already conformed can skip the geometric stages through
//! [`Segmenter::segment_tensor`].
//!
//! The inference engine is pluggable through [`InferenceEngine`]. An ONNX
//! Runtime backend is available with the `onnx` feature.
//!
//! # Examples
//!
//! ## Conforming a volume and undoing it
//!
//! ```
//! # use mri_segment::{conform, SpatialFrame, Volume};
//! # use ndarray::Array3;
//! let volume = Volume::new(Array3::from_elem((100, 120, 90), 1.0), SpatialFrame::canonical((1.0, 1.0, 1.0)));
//! let (cube, mapping) = conform::conform(&volume, 256).expect("volume should conform");
//! assert_eq!(mapping.destination_offsets(), [78, 68, 83]);
//! let restored = mapping.restore(&cube.data).expect("mapping should invert");
//! assert_eq!(restored, volume.data);
//! ```

pub mod config;
pub mod conform;
pub mod encoding;
pub mod engine;
pub mod enums;
mod interpolator;
pub mod layout;
pub mod orientation;
pub mod pipeline;
pub mod server;
pub mod volume;
pub mod volume_loader;

pub use engine::{EngineError, InferenceEngine, ModelService};
pub use interpolator::{ResampleError, resample_isotropic};
pub use pipeline::{ConformSettings, SegmentError, Segmenter};
pub use volume::{SpatialFrame, Volume};

/// Edge length of the cube the network consumes, in voxels.
pub const CUBE_EDGE: usize = 256;

/// Voxel edge length the network was trained on, in millimetres.
pub const TARGET_SPACING: f32 = 1.0;
