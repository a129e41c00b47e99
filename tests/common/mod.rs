#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use mri_segment::engine::{EngineError, InferenceEngine};
use ndarray::{Array5, ArrayView5};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Voxel-to-world transform stored in the header.
#[derive(Debug, Clone, Copy)]
pub enum Transform {
    None,
    Qform { quatern: [f32; 3], qfac: f32 },
    Sform([[f32; 4]; 3]),
    Both { quatern: [f32; 3], sform: [[f32; 4]; 3] },
}

/// Single-file NIfTI-1 (`n+1`) float32 image assembled in memory.
pub struct NiftiBuilder {
    dims: Vec<usize>,
    spacing: [f32; 3],
    transform: Transform,
    samples: Vec<f32>,
}

impl NiftiBuilder {
    /// `value(x, y, z)` is stored with x varying fastest.
    pub fn from_fn(shape: [usize; 3], value: impl Fn(usize, usize, usize) -> f32) -> Self {
        let mut samples = Vec::with_capacity(shape.iter().product());
        for z in 0..shape[2] {
            for y in 0..shape[1] {
                for x in 0..shape[0] {
                    samples.push(value(x, y, z));
                }
            }
        }
        Self {
            dims: shape.to_vec(),
            spacing: [1.0; 3],
            transform: Transform::None,
            samples,
        }
    }

    /// A 4D image with `frames` copies of `value` along the fourth axis.
    pub fn series(shape: [usize; 3], frames: usize, value: f32) -> Self {
        let mut dims = shape.to_vec();
        dims.push(frames);
        Self {
            samples: vec![value; dims.iter().product()],
            dims,
            spacing: [1.0; 3],
            transform: Transform::None,
        }
    }

    pub fn spacing(mut self, spacing: [f32; 3]) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0u8; 352];
        put_i32(&mut out, 0, 348);

        put_i16(&mut out, 40, self.dims.len() as i16);
        for (i, &d) in self.dims.iter().enumerate() {
            put_i16(&mut out, 42 + 2 * i, d as i16);
        }
        for i in self.dims.len()..7 {
            put_i16(&mut out, 42 + 2 * i, 1);
        }
        // float32
        put_i16(&mut out, 70, 16);
        put_i16(&mut out, 72, 32);

        let qfac = match self.transform {
            Transform::Qform { qfac, .. } => qfac,
            _ => 1.0,
        };
        put_f32(&mut out, 76, qfac);
        for (i, &s) in self.spacing.iter().enumerate() {
            put_f32(&mut out, 80 + 4 * i, s);
        }
        put_f32(&mut out, 108, 352.0);
        put_f32(&mut out, 112, 1.0);

        let (quatern, sform) = match self.transform {
            Transform::None => (None, None),
            Transform::Qform { quatern, .. } => (Some(quatern), None),
            Transform::Sform(rows) => (None, Some(rows)),
            Transform::Both { quatern, sform } => (Some(quatern), Some(sform)),
        };
        if let Some(q) = quatern {
            put_i16(&mut out, 252, 1);
            for (i, &v) in q.iter().enumerate() {
                put_f32(&mut out, 256 + 4 * i, v);
            }
        }
        if let Some(rows) = sform {
            put_i16(&mut out, 254, 1);
            for (r, row) in rows.iter().enumerate() {
                for (c, &v) in row.iter().enumerate() {
                    put_f32(&mut out, 280 + 16 * r + 4 * c, v);
                }
            }
        }
        out[344..348].copy_from_slice(b"n+1\0");

        for sample in &self.samples {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }

    pub fn build_gz(&self) -> Vec<u8> {
        gzip(&self.build())
    }
}

fn put_i16(out: &mut [u8], at: usize, value: i16) {
    out[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_i32(out: &mut [u8], at: usize, value: i32) {
    out[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_f32(out: &mut [u8], at: usize, value: f32) {
    out[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

/// Diagonal sform with the given signed voxel sizes.
pub fn diagonal_sform(x: f32, y: f32, z: f32) -> [[f32; 4]; 3] {
    [[x, 0.0, 0.0, 0.0], [0.0, y, 0.0, 0.0], [0.0, 0.0, z, 0.0]]
}

/// Two classes: label 1 wherever the normalized input exceeds one half.
/// Counts every predict call.
#[derive(Clone, Default)]
pub struct ThresholdEngine {
    pub calls: Arc<AtomicUsize>,
}

impl ThresholdEngine {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl InferenceEngine for ThresholdEngine {
    fn predict(&self, input: ArrayView5<'_, f32>) -> Result<Array5<f32>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let s = input.shape();
        Ok(Array5::from_shape_fn((1, s[1], s[2], s[3], 2), |(b, x, y, z, c)| {
            if c == 0 { 0.5 } else { input[[b, x, y, z, 0]] }
        }))
    }

    fn describe(&self) -> String {
        "threshold".to_owned()
    }
}

/// Every voxel gets the same label out of `classes`.
pub struct ConstantEngine {
    pub classes: usize,
    pub label: usize,
}

impl InferenceEngine for ConstantEngine {
    fn predict(&self, input: ArrayView5<'_, f32>) -> Result<Array5<f32>, EngineError> {
        let s = input.shape();
        let label = self.label;
        Ok(Array5::from_shape_fn((1, s[1], s[2], s[3], self.classes), |(.., c)| {
            if c == label { 1.0 } else { 0.0 }
        }))
    }

    fn describe(&self) -> String {
        format!("constant {}/{}", self.label, self.classes)
    }
}
