use ndarray::{Array3, Array4, Array5, ArrayView3, Axis};
use thiserror::Error;

/// Axis order the network was trained with, relative to RAS+ (X, Y, Z).
/// Reversal is its own inverse.
pub const NETWORK_AXIS_ORDER: [usize; 3] = [2, 1, 0];

#[derive(Debug, Error, PartialEq)]
pub enum LayoutError {
    #[error("expected a single batch entry, got a batch of {0}")]
    BatchSize(usize),
}

/// Transpose to network order and add the unit batch and channel axes:
/// `(X, Y, Z)` becomes `(1, Z, Y, X, 1)`.
pub fn to_network_input(cube: ArrayView3<'_, f32>) -> Array5<f32> {
    cube.permuted_axes(NETWORK_AXIS_ORDER)
        .as_standard_layout()
        .into_owned()
        .insert_axis(Axis(0))
        .insert_axis(Axis(4))
}

/// Drop the batch axis of a `(1, Z, Y, X)` network-order array and return
/// it in RAS+ order.
pub fn from_network_output<T: Clone>(batch: Array4<T>) -> Result<Array3<T>, LayoutError> {
    let batch_size = batch.len_of(Axis(0));
    if batch_size != 1 {
        return Err(LayoutError::BatchSize(batch_size));
    }
    Ok(batch
        .index_axis_move(Axis(0), 0)
        .permuted_axes(NETWORK_AXIS_ORDER)
        .as_standard_layout()
        .into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_adds_batch_and_channel() {
        let cube = Array3::from_shape_fn((2, 3, 4), |(i, j, k)| (i * 100 + j * 10 + k) as f32);
        let input = to_network_input(cube.view());
        assert_eq!(input.shape(), &[1, 4, 3, 2, 1]);
        assert_eq!(input[[0, 3, 2, 1, 0]], cube[[1, 2, 3]]);
        assert!(input.is_standard_layout());
    }

    #[test]
    fn forward_then_inverse_is_identity() {
        let cube = Array3::from_shape_fn((5, 6, 7), |(i, j, k)| (i * 49 + j * 7 + k) as f32 * 0.5);
        let input = to_network_input(cube.view());
        let restored = from_network_output(input.index_axis_move(Axis(4), 0)).unwrap();
        assert_eq!(restored, cube);
    }

    #[test]
    fn inverse_rejects_larger_batches() {
        let batch = Array4::<u8>::zeros((2, 3, 3, 3));
        assert_eq!(from_network_output(batch), Err(LayoutError::BatchSize(2)));
    }
}
