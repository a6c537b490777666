//! Batch-shape plumbing.
//!
//! Public arrays are `ArrayD` with layout `batch_shape + spatial + channels`,
//! where `batch_shape` may be empty or arbitrarily nested. Kernels internally
//! fold all leading batch axes into one so they only ever deal with
//! `[B, N, C]` sample tensors and `[B, H, W, C]` images, and restore the
//! caller's batch shape on the way out.

use ndarray::{Array3, Array4, ArrayD, IxDyn};

/// Fold `batch_shape + [N, C]` into `[B, N, C]`.
///
/// Returns the flattened array together with the original batch shape.
pub(crate) fn flatten_samples<T: Clone>(a: &ArrayD<T>) -> (Array3<T>, Vec<usize>) {
    let shape = a.shape();
    assert!(
        shape.len() >= 2,
        "sample array needs at least [N, C] trailing axes, got shape {shape:?}"
    );
    let (batch, tail) = shape.split_at(shape.len() - 2);
    let b: usize = batch.iter().product();
    let data: Vec<T> = a.iter().cloned().collect();
    let flat = Array3::from_shape_vec((b, tail[0], tail[1]), data).unwrap();
    (flat, batch.to_vec())
}

/// Fold `batch_shape + [H, W, C]` into `[B, H, W, C]`.
pub(crate) fn flatten_image<T: Clone>(a: &ArrayD<T>) -> (Array4<T>, Vec<usize>) {
    let shape = a.shape();
    assert!(
        shape.len() >= 3,
        "image array needs at least [H, W, C] trailing axes, got shape {shape:?}"
    );
    let (batch, tail) = shape.split_at(shape.len() - 3);
    let b: usize = batch.iter().product();
    let data: Vec<T> = a.iter().cloned().collect();
    let flat = Array4::from_shape_vec((b, tail[0], tail[1], tail[2]), data).unwrap();
    (flat, batch.to_vec())
}

/// Restore a flattened `[B, H, W, C]` image to `batch_shape + [H, W, C]`.
pub(crate) fn restore_image<T: Clone>(img: Array4<T>, batch_shape: &[usize]) -> ArrayD<T> {
    let (_, h, w, c) = img.dim();
    let mut shape = batch_shape.to_vec();
    shape.extend([h, w, c]);
    let data: Vec<T> = img.into_iter().collect();
    ArrayD::from_shape_vec(IxDyn(&shape), data).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    #[test]
    fn test_flatten_and_restore_image_roundtrip() {
        let a = ArrayD::from_shape_vec(
            IxDyn(&[2, 3, 2, 2, 1]),
            (0..24).map(|v| v as f32).collect(),
        )
        .unwrap();
        let (flat, batch) = flatten_image(&a);
        assert_eq!(flat.dim(), (6, 2, 2, 1));
        assert_eq!(batch, vec![2, 3]);
        let restored = restore_image(flat, &batch);
        assert_eq!(restored, a);
    }

    #[test]
    fn test_flatten_samples_unbatched() {
        let a =
            ArrayD::from_shape_vec(IxDyn(&[4, 3]), (0..12).map(|v| v as f32).collect()).unwrap();
        let (flat, batch) = flatten_samples(&a);
        assert!(batch.is_empty());
        assert_eq!(flat.dim(), (1, 4, 3));
        assert_eq!(flat[[0, 2, 1]], 7.0);
    }

    #[test]
    fn test_flatten_image_empty_batch() {
        let a = ArrayD::<f32>::zeros(IxDyn(&[0, 2, 2, 3]));
        let (flat, batch) = flatten_image(&a);
        assert_eq!(flat.dim(), (0, 2, 2, 3));
        assert_eq!(batch, vec![0]);
    }
}
