//! Centered crop/pad onto the fixed network cube, and its exact inverse.

use crate::volume::Volume;

use ndarray::{Array3, s};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq)]
pub enum ConformError {
    #[error("cube edge must be positive")]
    EmptyCube,

    #[error("cannot conform an empty volume of shape {shape:?}")]
    EmptyVolume { shape: [usize; 3] },

    #[error("volume has shape {actual:?} but the mapping was recorded for {expected:?}")]
    SourceShapeMismatch {
        actual: [usize; 3],
        expected: [usize; 3],
    },

    #[error("label cube has shape {actual:?} but the mapping was recorded for a {edge}^3 cube")]
    CubeShapeMismatch { actual: [usize; 3], edge: usize },

    #[error(
        "axis {axis} span (source {source_start}+{length}, destination {destination_start}+{length}) \
         exceeds source extent {source_extent} or cube edge {edge}"
    )]
    SpanOutOfBounds {
        axis: usize,
        source_start: usize,
        destination_start: usize,
        length: usize,
        source_extent: usize,
        edge: usize,
    },
}

/// The region copied along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AxisSpan {
    pub source_start: usize,
    pub destination_start: usize,
    pub length: usize,
}

impl AxisSpan {
    /// Center `extent` samples inside `edge`: pad when it fits, crop when
    /// it does not.
    pub fn centered(extent: usize, edge: usize) -> Self {
        let (source_start, destination_start) = if extent <= edge {
            (0, (edge - extent) / 2)
        } else {
            ((extent - edge) / 2, 0)
        };
        let length = extent
            .min(edge)
            .min(edge - destination_start)
            .min(extent - source_start);
        Self {
            source_start,
            destination_start,
            length,
        }
    }

    fn source_end(&self) -> usize {
        self.source_start + self.length
    }

    fn destination_end(&self) -> usize {
        self.destination_start + self.length
    }
}

/// Everything needed to undo a conformation: the pre-conform shape, the
/// cube edge and the span copied along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConformationMapping {
    pub source_shape: [usize; 3],
    pub edge: usize,
    pub axes: [AxisSpan; 3],
}

impl ConformationMapping {
    pub fn new(source_shape: [usize; 3], edge: usize) -> Result<Self, ConformError> {
        if edge == 0 {
            return Err(ConformError::EmptyCube);
        }
        if source_shape.contains(&0) {
            return Err(ConformError::EmptyVolume { shape: source_shape });
        }
        let axes = [
            AxisSpan::centered(source_shape[0], edge),
            AxisSpan::centered(source_shape[1], edge),
            AxisSpan::centered(source_shape[2], edge),
        ];
        let mapping = Self {
            source_shape,
            edge,
            axes,
        };
        mapping.check_bounds()?;
        Ok(mapping)
    }

    /// True when the source already is the cube.
    pub fn is_identity(&self) -> bool {
        self.axes.iter().all(|span| {
            span.source_start == 0 && span.destination_start == 0 && span.length == self.edge
        }) && self.source_shape == [self.edge; 3]
    }

    pub fn source_offsets(&self) -> [usize; 3] {
        self.axes.map(|span| span.source_start)
    }

    pub fn destination_offsets(&self) -> [usize; 3] {
        self.axes.map(|span| span.destination_start)
    }

    fn check_bounds(&self) -> Result<(), ConformError> {
        for (axis, span) in self.axes.iter().enumerate() {
            if span.source_end() > self.source_shape[axis] || span.destination_end() > self.edge {
                return Err(ConformError::SpanOutOfBounds {
                    axis,
                    source_start: span.source_start,
                    destination_start: span.destination_start,
                    length: span.length,
                    source_extent: self.source_shape[axis],
                    edge: self.edge,
                });
            }
        }
        Ok(())
    }

    /// Copy `source` into a zeroed `edge`^3 cube according to this mapping.
    pub fn apply<T: Copy + Default>(&self, source: &Array3<T>) -> Result<Array3<T>, ConformError> {
        let (sx, sy, sz) = source.dim();
        if [sx, sy, sz] != self.source_shape {
            return Err(ConformError::SourceShapeMismatch {
                actual: [sx, sy, sz],
                expected: self.source_shape,
            });
        }
        self.check_bounds()?;

        let [x, y, z] = self.axes;
        let mut cube = Array3::from_elem((self.edge, self.edge, self.edge), T::default());
        cube.slice_mut(s![
            x.destination_start..x.destination_end(),
            y.destination_start..y.destination_end(),
            z.destination_start..z.destination_end()
        ])
        .assign(&source.slice(s![
            x.source_start..x.source_end(),
            y.source_start..y.source_end(),
            z.source_start..z.source_end()
        ]));
        Ok(cube)
    }

    /// Extract the region of `cube` that came from the source, placed back
    /// at its source position. Samples that were cropped away are
    /// `T::default()`.
    pub fn restore<T: Copy + Default>(&self, cube: &Array3<T>) -> Result<Array3<T>, ConformError> {
        let (cx, cy, cz) = cube.dim();
        if [cx, cy, cz] != [self.edge; 3] {
            return Err(ConformError::CubeShapeMismatch {
                actual: [cx, cy, cz],
                edge: self.edge,
            });
        }
        self.check_bounds()?;

        let [x, y, z] = self.axes;
        let shape = (self.source_shape[0], self.source_shape[1], self.source_shape[2]);
        let mut restored = Array3::from_elem(shape, T::default());
        restored
            .slice_mut(s![
                x.source_start..x.source_end(),
                y.source_start..y.source_end(),
                z.source_start..z.source_end()
            ])
            .assign(&cube.slice(s![
                x.destination_start..x.destination_end(),
                y.destination_start..y.destination_end(),
                z.destination_start..z.destination_end()
            ]));
        Ok(restored)
    }
}

/// Crop/pad `volume` onto a centered `edge`^3 cube.
pub fn conform(volume: &Volume, edge: usize) -> Result<(Volume, ConformationMapping), ConformError> {
    let mapping = ConformationMapping::new(volume.shape(), edge)?;
    debug!(
        source_shape = ?mapping.source_shape,
        source_offsets = ?mapping.source_offsets(),
        destination_offsets = ?mapping.destination_offsets(),
        "conformation mapping"
    );
    let cube = mapping.apply(&volume.data)?;
    Ok((Volume::new(cube, volume.frame), mapping))
}
