use crate::enums::AxisDirection;
use crate::volume::{SpatialFrame, Volume};

use nalgebra::{Matrix3, Vector3};
use ndarray::Axis;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum OrientationError {
    #[error("orientation code {code:?} must have exactly 3 letters")]
    WrongLength { code: String },

    #[error("orientation code {code:?} contains unknown letter {letter:?}")]
    UnknownLetter { code: String, letter: char },

    #[error("orientation code {code:?} names the {axis} axis more than once")]
    RepeatedAxis { code: String, axis: &'static str },

    #[error("affine column {column} has no usable direction: {values:?}")]
    DegenerateAffine { column: usize, values: [f64; 3] },
}

/// Which anatomical direction each array axis points to, e.g. `LPI`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrientationCode(pub [AxisDirection; 3]);

impl OrientationCode {
    pub const RAS: Self = Self([
        AxisDirection::Right,
        AxisDirection::Anterior,
        AxisDirection::Superior,
    ]);

    pub fn is_canonical(&self) -> bool {
        *self == Self::RAS
    }

    /// For every RAS+ axis, the source array axis that lies on it and
    /// whether that source axis runs against the convention.
    fn canonical_plan(&self) -> [(usize, bool); 3] {
        let mut plan = [(0, false); 3];
        for (source_axis, direction) in self.0.iter().enumerate() {
            plan[direction.anatomical_axis()] = (source_axis, !direction.is_positive());
        }
        plan
    }

    /// Derive the code from a voxel-to-world affine, given as its three
    /// rotation/zoom columns.
    ///
    /// Zooms are divided out and the matrix is replaced by its closest
    /// orthogonal matrix. Columns are then assigned greedily, strongest
    /// first, and a world axis that has been taken is not offered again, so
    /// oblique acquisitions always get a valid code.
    pub fn from_affine_columns(columns: [[f64; 3]; 3]) -> Result<Self, OrientationError> {
        let degenerate = |column: usize| OrientationError::DegenerateAffine {
            column,
            values: columns[column],
        };
        for (column, values) in columns.iter().enumerate() {
            let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
            if !(norm.is_finite() && norm > 0.0) {
                return Err(degenerate(column));
            }
        }

        let unit = columns.map(|values| {
            let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
            Vector3::from(values.map(|v| v / norm))
        });
        let (mut rotation, tolerance) =
            closest_orthogonal(Matrix3::from_columns(&unit)).ok_or_else(|| degenerate(0))?;

        let peak = |column: usize| {
            (0..3)
                .map(|row| rotation[(row, column)].abs())
                .fold(0.0_f64, f64::max)
        };
        let mut order = [0, 1, 2];
        order.sort_by(|&a, &b| peak(b).total_cmp(&peak(a)));

        let mut directions = [AxisDirection::Right; 3];
        for column in order {
            let (world_axis, magnitude) = (0..3)
                .map(|row| (row, rotation[(row, column)].abs()))
                .fold((0, 0.0_f64), |best, (row, v)| if v > best.1 { (row, v) } else { best });
            if magnitude <= tolerance {
                return Err(degenerate(column));
            }
            directions[column] =
                AxisDirection::from_world_axis(world_axis, rotation[(world_axis, column)] > 0.0)
                    .ok_or_else(|| degenerate(column))?;
            rotation.row_mut(world_axis).fill(0.0);
        }
        let code: String = directions.iter().map(|d| d.letter()).collect();
        Self::validate(&code, directions)
    }

    fn validate(code: &str, directions: [AxisDirection; 3]) -> Result<Self, OrientationError> {
        const AXIS_NAMES: [&str; 3] = ["left/right", "anterior/posterior", "superior/inferior"];
        let mut seen = [false; 3];
        for direction in directions {
            let axis = direction.anatomical_axis();
            if seen[axis] {
                return Err(OrientationError::RepeatedAxis {
                    code: code.to_owned(),
                    axis: AXIS_NAMES[axis],
                });
            }
            seen[axis] = true;
        }
        Ok(Self(directions))
    }
}

/// Polar factor of `matrix` from its SVD, dropping null directions, and the
/// tolerance below which a component counts as zero.
fn closest_orthogonal(matrix: Matrix3<f64>) -> Option<(Matrix3<f64>, f64)> {
    let svd = matrix.svd(true, true);
    let tolerance = svd.singular_values.max() * 3.0 * f64::EPSILON;
    if !(tolerance > 0.0) {
        return None;
    }
    let keep = svd.singular_values.map(|s| if s > tolerance { 1.0 } else { 0.0 });
    let (u, v_t) = (svd.u?, svd.v_t?);
    Some((u * Matrix3::from_diagonal(&keep) * v_t, tolerance))
}

impl FromStr for OrientationCode {
    type Err = OrientationError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        let letters: Vec<char> = code.chars().collect();
        if letters.len() != 3 {
            return Err(OrientationError::WrongLength {
                code: code.to_owned(),
            });
        }
        let mut directions = [AxisDirection::Right; 3];
        for (slot, &letter) in directions.iter_mut().zip(&letters) {
            *slot = AxisDirection::from_letter(letter).ok_or(OrientationError::UnknownLetter {
                code: code.to_owned(),
                letter,
            })?;
        }
        Self::validate(code, directions)
    }
}

impl fmt::Display for OrientationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for direction in self.0 {
            write!(f, "{direction}")?;
        }
        Ok(())
    }
}

/// Reorder and flip the axes of `volume` so that it is RAS+. Samples are
/// only moved, never interpolated. Spacing follows its axis.
pub fn canonicalize(volume: &Volume) -> Volume {
    let plan = volume.frame.orientation.canonical_plan();
    let order = [plan[0].0, plan[1].0, plan[2].0];

    let mut view = volume.data.view().permuted_axes(order);
    for (axis, &(_, flip)) in plan.iter().enumerate() {
        if flip {
            view.invert_axis(Axis(axis));
        }
    }

    let spacing = [volume.frame.spacing.0, volume.frame.spacing.1, volume.frame.spacing.2];
    Volume::new(
        view.as_standard_layout().into_owned(),
        SpatialFrame {
            spacing: (spacing[order[0]], spacing[order[1]], spacing[order[2]]),
            orientation: OrientationCode::RAS,
        },
    )
}

/// Parse `code` and canonicalize `volume` as if it carried that code.
pub fn canonicalize_with_code(volume: &Volume, code: &str) -> Result<Volume, OrientationError> {
    let orientation: OrientationCode = code.parse()?;
    let relabelled = Volume::new(
        volume.data.clone(),
        SpatialFrame {
            spacing: volume.frame.spacing,
            orientation,
        },
    );
    Ok(canonicalize(&relabelled))
}
