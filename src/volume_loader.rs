use crate::orientation::{OrientationCode, OrientationError};
use crate::volume::{SpatialFrame, Volume};

use flate2::read::GzDecoder;
use ndarray::{Array3, ShapeBuilder};
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("file {0:?} must be a NIfTI file (.nii or .nii.gz)")]
    UnsupportedExtension(String),

    #[error("empty upload")]
    Empty,

    #[error("expected a 3D volume, header declares {0} dimensions")]
    UnsupportedDimensionality(i64),

    #[error("multi-volume input {shape:?} is not supported; only a single 3D volume")]
    MultiVolume { shape: Vec<usize> },

    #[error("header declares an empty volume {0:?}")]
    EmptyVolume([usize; 3]),

    #[error("volume holds {actual} samples, header needs at least {expected}")]
    Truncated { expected: usize, actual: usize },

    #[error("cannot determine orientation: {0}")]
    Orientation(#[from] OrientationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::error::NiftiError),
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Whether `filename` names a NIfTI file this loader accepts.
    pub fn is_supported_filename(filename: &str) -> bool {
        let lower = filename.to_ascii_lowercase();
        lower.ends_with(".nii") || lower.ends_with(".nii.gz")
    }

    /// Decode a NIfTI-1 volume held in memory
    ///
    /// # Arguments
    ///
    /// * `bytes` - Raw file content, optionally gzip compressed
    /// * `filename_hint` - Original file name, used to report the expected
    ///   compression
    ///
    /// # Errors
    ///
    /// Returns error if the content is not a readable single-volume 3D NIfTI
    /// file or its affine gives no usable orientation
    pub fn load_from_bytes(bytes: &[u8], filename_hint: &str) -> Result<Volume, VolumeLoaderError> {
        if bytes.is_empty() {
            return Err(VolumeLoaderError::Empty);
        }

        let object = Self::read_object(bytes, filename_hint)?;
        let header = object.header().clone();

        let shape = Self::spatial_shape(&header)?;
        let orientation = OrientationCode::from_affine_columns(Self::affine_columns(&header))?;
        let spacing = Self::spacing(&header);
        debug!(?shape, %orientation, ?spacing, datatype = header.datatype, "decoded NIfTI header");

        let samples = object.into_volume().into_nifti_typed_data::<f32>()?;
        let data = Self::build_volume_array(samples, shape)?;

        Ok(Volume::new(data, SpatialFrame { spacing, orientation }))
    }

    /// Load a volume from a `.nii` or `.nii.gz` file on disk
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Volume, VolumeLoaderError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_owned();
        if !Self::is_supported_filename(&name) {
            return Err(VolumeLoaderError::UnsupportedExtension(name));
        }
        let bytes = std::fs::read(path)?;
        Self::load_from_bytes(&bytes, &name)
    }

    fn read_object(bytes: &[u8], filename_hint: &str) -> Result<InMemNiftiObject, VolumeLoaderError> {
        let compressed = bytes.starts_with(&GZIP_MAGIC);
        if !compressed && filename_hint.to_ascii_lowercase().ends_with(".gz") {
            warn!(filename = filename_hint, "name says gzip but content is not compressed, reading as raw");
        }

        let object = if compressed {
            InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes)))?
        } else {
            InMemNiftiObject::from_reader(Cursor::new(bytes))?
        };
        Ok(object)
    }

    fn spatial_shape(header: &NiftiHeader) -> Result<[usize; 3], VolumeLoaderError> {
        let rank = header.dim[0] as i64;
        if !(3..=7).contains(&rank) {
            return Err(VolumeLoaderError::UnsupportedDimensionality(rank));
        }
        let dims: Vec<usize> = (1..=rank as usize)
            .map(|i| (header.dim[i] as i64).max(0) as usize)
            .collect();
        if dims[3..].iter().any(|&d| d > 1) {
            return Err(VolumeLoaderError::MultiVolume { shape: dims });
        }

        let shape = [dims[0], dims[1], dims[2]];
        if shape.contains(&0) {
            return Err(VolumeLoaderError::EmptyVolume(shape));
        }
        Ok(shape)
    }

    fn spacing(header: &NiftiHeader) -> (f32, f32, f32) {
        let pixdim = header.pixdim;
        (pixdim[1].abs(), pixdim[2].abs(), pixdim[3].abs())
    }

    /// Rotation/zoom columns of the voxel-to-world affine. The sform wins
    /// when present, then the qform; without either the scanner default
    /// `diag(-dx, dy, dz)` applies.
    fn affine_columns(header: &NiftiHeader) -> [[f64; 3]; 3] {
        let pixdim = header.pixdim.map(f64::from);

        if header.sform_code > 0 {
            let rows = [header.srow_x, header.srow_y, header.srow_z].map(|row| row.map(f64::from));
            return [0, 1, 2].map(|column| [rows[0][column], rows[1][column], rows[2][column]]);
        }

        if header.qform_code > 0 {
            let (b, c, d) = (
                f64::from(header.quatern_b),
                f64::from(header.quatern_c),
                f64::from(header.quatern_d),
            );
            let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
            let rotation = [
                [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
                [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
                [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - b * b - c * c],
            ];
            let qfac = if pixdim[0] < 0.0 { -1.0 } else { 1.0 };
            let scale = [pixdim[1], pixdim[2], pixdim[3] * qfac];
            return [0, 1, 2].map(|column| {
                [0, 1, 2].map(|row| rotation[row][column] * scale[column])
            });
        }

        [
            [-pixdim[1], 0.0, 0.0],
            [0.0, pixdim[2], 0.0],
            [0.0, 0.0, pixdim[3]],
        ]
    }

    /// NIfTI stores samples with the first axis varying fastest.
    fn build_volume_array(samples: Vec<f32>, shape: [usize; 3]) -> Result<Array3<f32>, VolumeLoaderError> {
        let expected = shape.iter().product::<usize>();
        if samples.len() < expected {
            return Err(VolumeLoaderError::Truncated {
                expected,
                actual: samples.len(),
            });
        }
        let mut samples = samples;
        samples.truncate(expected);

        let array = Array3::from_shape_vec((shape[0], shape[1], shape[2]).f(), samples)
            .map_err(|_| VolumeLoaderError::Truncated { expected, actual: expected })?;
        Ok(array.as_standard_layout().into_owned())
    }
}
