//! Byte packing for label volumes and pre-conformed tensor uploads.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use ndarray::Array3;
use std::io::{Read, Write};
use thiserror::Error;
use tracing::warn;

pub const COMPACT_DTYPE: &str = "uint8";
pub const COMPACT_ENCODING: &str = "base64_gzip";

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("expected {expected} bytes ({edge}^3), got {actual}")]
    TensorLength {
        edge: usize,
        expected: usize,
        actual: usize,
    },

    #[error("expected {expected} bytes for shape {shape:?}, got {actual}")]
    ShapeLength {
        shape: [usize; 3],
        expected: usize,
        actual: usize,
    },

    #[error("data for shape {shape:?} inflates past {limit} bytes")]
    Oversized { shape: [usize; 3], limit: usize },

    #[error("compression failed: {0}")]
    Compression(#[from] std::io::Error),
}

/// Row-major bytes of `labels`, gzip compressed and base64 encoded.
pub fn encode_compact(labels: &Array3<u8>) -> Result<String, EncodingError> {
    let standard = labels.as_standard_layout();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    match standard.as_slice() {
        Some(bytes) => encoder.write_all(bytes)?,
        None => encoder.write_all(&standard.iter().copied().collect::<Vec<u8>>())?,
    }
    Ok(STANDARD.encode(encoder.finish()?))
}

/// Inflate at most `limit` bytes from `reader`. More data than that is an
/// error, without inflating the rest.
fn inflate_bounded<R: Read>(reader: R, limit: usize, shape: [usize; 3]) -> Result<Vec<u8>, EncodingError> {
    let mut bytes = Vec::new();
    reader.take(limit as u64 + 1).read_to_end(&mut bytes)?;
    if bytes.len() > limit {
        return Err(EncodingError::Oversized { shape, limit });
    }
    Ok(bytes)
}

/// Inverse of [`encode_compact`], for clients and tests.
pub fn decode_compact(encoded: &str, shape: [usize; 3]) -> Result<Array3<u8>, EncodingError> {
    let compressed = STANDARD
        .decode(encoded)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let expected = shape.iter().product::<usize>();
    let bytes = inflate_bounded(GzDecoder::new(compressed.as_slice()), expected, shape)?;

    if bytes.len() != expected {
        return Err(EncodingError::ShapeLength {
            shape,
            expected,
            actual: bytes.len(),
        });
    }
    Array3::from_shape_vec((shape[0], shape[1], shape[2]), bytes)
        .map_err(|e| EncodingError::Compression(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

/// Unpack an uploaded `edge`^3 byte cube. Gzip is tried first; content
/// that does not decompress is taken as raw bytes. Decompression stops as
/// soon as the output outgrows the cube.
pub fn decode_tensor_upload(upload: &[u8], edge: usize) -> Result<Array3<u8>, EncodingError> {
    let expected = edge * edge * edge;
    let raw = match inflate_bounded(GzDecoder::new(upload), expected, [edge; 3]) {
        Ok(inflated) => inflated,
        Err(EncodingError::Compression(e)) => {
            warn!(error = %e, len = upload.len(), "tensor upload is not gzip, using raw bytes");
            upload.to_vec()
        }
        Err(e) => return Err(e),
    };

    if raw.len() != expected {
        return Err(EncodingError::TensorLength {
            edge,
            expected,
            actual: raw.len(),
        });
    }
    Array3::from_shape_vec((edge, edge, edge), raw).map_err(|_| EncodingError::TensorLength {
        edge,
        expected,
        actual: expected,
    })
}
