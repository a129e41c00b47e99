use crate::interpolator::{Interpolator, ResampleError};
use crate::orientation::OrientationCode;

use ndarray::Array3;
use ndarray::Zip;
use rayon::prelude::*;

/// Physical layout of a volume's samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialFrame {
    /// Edge length of a voxel along each array axis, in millimetres.
    pub spacing: (f32, f32, f32),
    pub orientation: OrientationCode,
}

impl SpatialFrame {
    pub fn canonical(spacing: (f32, f32, f32)) -> Self {
        Self {
            spacing,
            orientation: OrientationCode::RAS,
        }
    }
}

/// A single-channel 3D intensity volume together with its spatial frame.
///
/// Every pipeline stage takes a `&Volume` and returns a new one.
#[derive(Debug, Clone)]
pub struct Volume {
    pub data: Array3<f32>,
    pub frame: SpatialFrame,
}

impl Volume {
    pub fn new(data: Array3<f32>, frame: SpatialFrame) -> Self {
        Self { data, frame }
    }

    /// Get the dimensions of the volume along its three array axes
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn shape(&self) -> [usize; 3] {
        let (x, y, z) = self.dim();
        [x, y, z]
    }

    /// Dimensions this volume would have after resampling to isotropic
    /// `target_spacing`.
    pub fn isotropic_dim(&self, target_spacing: f32) -> Result<(usize, usize, usize), ResampleError> {
        Interpolator::resampled_dimensions(self.frame.spacing, self.dim(), target_spacing)
    }

    /// Smallest and largest finite sample, if there is one.
    pub fn finite_range(&self) -> Option<(f32, f32)> {
        let standard = self.data.as_standard_layout();
        standard
            .as_slice()?
            .par_iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(|| None, widen)
            .reduce(|| None, |a, b| match (a, b) {
                (Some((lo, hi)), Some(other)) => widen(widen(Some(other), lo), hi),
                (range, None) | (None, range) => range,
            })
    }

    /// Rescale intensities so that the volume's own minimum maps to 0.0 and
    /// its maximum to 1.0. A constant volume is returned unchanged.
    /// Non-finite samples are written as 0.0.
    pub fn normalized(&self) -> Volume {
        let (min, range) = match self.finite_range() {
            Some((min, max)) if max > min => (min, max - min),
            _ => {
                return Volume::new(self.data.mapv(|v| if v.is_finite() { v } else { 0.0 }), self.frame);
            }
        };

        let mut data = Array3::<f32>::zeros(self.data.raw_dim());
        Zip::from(&mut data).and(&self.data).par_for_each(|out, &v| {
            *out = if v.is_finite() {
                ((v - min) / range).clamp(0.0, 1.0)
            } else {
                0.0
            };
        });
        Volume::new(data, self.frame)
    }
}

fn widen(range: Option<(f32, f32)>, v: f32) -> Option<(f32, f32)> {
    match range {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    }
}
