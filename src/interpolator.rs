use crate::volume::{SpatialFrame, Volume};

use ndarray::{Array3, ArrayView3, Zip};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ResampleError {
    #[error("voxel spacing {spacing:?} must be finite and positive on every axis")]
    InvalidSpacing { spacing: (f32, f32, f32) },

    #[error("target spacing {0} must be finite and positive")]
    InvalidTarget(f32),

    #[error("resampling shape {source_shape:?} with spacing {spacing:?} gives degenerate shape {target:?}")]
    Degenerate {
        source_shape: (usize, usize, usize),
        spacing: (f32, f32, f32),
        target: (usize, usize, usize),
    },
}

/// Source position of one output sample along one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Tap {
    lower: usize,
    upper: usize,
    weight: f32,
}

pub(crate) struct Interpolator;

impl Interpolator {
    /// Output extent per axis after resampling to `target_spacing`.
    /// Extents are rounded half to even.
    pub(crate) fn resampled_dimensions(
        spacing: (f32, f32, f32),
        original_dim: (usize, usize, usize),
        target_spacing: f32,
    ) -> Result<(usize, usize, usize), ResampleError> {
        if !(target_spacing.is_finite() && target_spacing > 0.0) {
            return Err(ResampleError::InvalidTarget(target_spacing));
        }
        let (x_spacing, y_spacing, z_spacing) = spacing;
        if [x_spacing, y_spacing, z_spacing]
            .iter()
            .any(|s| !(s.is_finite() && *s > 0.0))
        {
            return Err(ResampleError::InvalidSpacing { spacing });
        }

        let scale = |extent: usize, axis_spacing: f32| {
            let zoom = f64::from(axis_spacing) / f64::from(target_spacing);
            (extent as f64 * zoom).round_ties_even() as usize
        };
        let target = (
            scale(original_dim.0, x_spacing),
            scale(original_dim.1, y_spacing),
            scale(original_dim.2, z_spacing),
        );

        if target.0 == 0 || target.1 == 0 || target.2 == 0 {
            return Err(ResampleError::Degenerate {
                source_shape: original_dim,
                spacing,
                target,
            });
        }
        Ok(target)
    }

    /// Corner-aligned sample positions: output index 0 lands on input 0 and
    /// the last output index on the last input.
    fn taps(input: usize, output: usize) -> Vec<Tap> {
        (0..output)
            .map(|o| {
                let position = if output > 1 {
                    (o * (input - 1)) as f64 / (output - 1) as f64
                } else {
                    0.0
                };
                let lower = position.floor() as usize;
                Tap {
                    lower,
                    upper: (lower + 1).min(input - 1),
                    weight: (position - lower as f64) as f32,
                }
            })
            .collect()
    }

    #[inline]
    fn trilinear_interpolate(data: &ArrayView3<f32>, x: Tap, y: Tap, z: Tap) -> f32 {
        let lerp = |a: f32, b: f32, t: f32| {
            if t == 0.0 || a == b { a } else { a.mul_add(1.0 - t, b * t) }
        };

        let c00 = lerp(data[[x.lower, y.lower, z.lower]], data[[x.upper, y.lower, z.lower]], x.weight);
        let c10 = lerp(data[[x.lower, y.upper, z.lower]], data[[x.upper, y.upper, z.lower]], x.weight);
        let c01 = lerp(data[[x.lower, y.lower, z.upper]], data[[x.upper, y.lower, z.upper]], x.weight);
        let c11 = lerp(data[[x.lower, y.upper, z.upper]], data[[x.upper, y.upper, z.upper]], x.weight);

        let c0 = lerp(c00, c10, y.weight);
        let c1 = lerp(c01, c11, y.weight);

        lerp(c0, c1, z.weight)
    }

    /// Resample `volume` to `target_spacing` on every axis with trilinear
    /// interpolation. Extent is preserved; only sample density changes.
    pub(crate) fn resample(volume: &Volume, target_spacing: f32) -> Result<Volume, ResampleError> {
        let source_dim = volume.dim();
        let target_dim = Self::resampled_dimensions(volume.frame.spacing, source_dim, target_spacing)?;
        let frame = SpatialFrame {
            spacing: (target_spacing, target_spacing, target_spacing),
            orientation: volume.frame.orientation,
        };
        if target_dim == source_dim {
            return Ok(Volume::new(volume.data.clone(), frame));
        }

        let x_taps = Self::taps(source_dim.0, target_dim.0);
        let y_taps = Self::taps(source_dim.1, target_dim.1);
        let z_taps = Self::taps(source_dim.2, target_dim.2);

        let source = volume.data.view();
        let mut data = Array3::<f32>::zeros(target_dim);
        Zip::indexed(&mut data).par_for_each(|(i, j, k), out| {
            *out = Self::trilinear_interpolate(&source, x_taps[i], y_taps[j], z_taps[k]);
        });

        Ok(Volume::new(data, frame))
    }
}

/// Resample a canonical volume to isotropic `target_spacing`.
pub fn resample_isotropic(volume: &Volume, target_spacing: f32) -> Result<Volume, ResampleError> {
    Interpolator::resample(volume, target_spacing)
}
