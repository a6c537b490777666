//! Scatter-with-reduction.
//!
//! Every fusion kernel and the rasterizer funnel their writes through this
//! single primitive: a list of destination cells, a list of per-cell channel
//! updates, and an associative, commutative reduction that folds colliding
//! writes deterministically in one sequential pass. There is no last-write-
//! wins path anywhere in the crate.

use ndarray::{Array2, ArrayD, IxDyn};

/// How colliding writes to the same destination cell are combined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reduction {
    /// Accumulate by summation. Untouched cells hold `0.0`.
    Sum,
    /// Keep the element-wise minimum. Untouched cells hold `+inf`, which is
    /// how callers detect that nothing landed there.
    Min,
}

impl Reduction {
    fn fill(self) -> f32 {
        match self {
            Reduction::Sum => 0.0,
            Reduction::Min => f32::INFINITY,
        }
    }
}

/// Scatter `updates` rows into a zero/inf-initialized array of `shape`.
///
/// `indices` is `n x (rank-1)`: one destination cell (all axes except the
/// trailing channel axis) per update row. `updates` is `n x channels` where
/// `channels == shape.last()`. Rows whose cell collides are folded with
/// `reduction`; row order never affects the result.
pub fn scatter_nd(
    indices: &Array2<usize>,
    updates: &Array2<f32>,
    shape: &[usize],
    reduction: Reduction,
) -> ArrayD<f32> {
    assert!(!shape.is_empty(), "scatter destination needs a shape");
    let channels = *shape.last().unwrap();
    assert_eq!(
        indices.nrows(),
        updates.nrows(),
        "scatter index/update row count mismatch"
    );
    assert_eq!(
        indices.ncols() + 1,
        shape.len(),
        "scatter index rank must cover all non-channel axes"
    );
    assert_eq!(
        updates.ncols(),
        channels,
        "scatter update width must match the channel axis"
    );

    let cell_axes = &shape[..shape.len() - 1];
    let cells: usize = cell_axes.iter().product();

    // Row-major strides over the cell axes.
    let mut strides = vec![1usize; cell_axes.len()];
    for i in (0..cell_axes.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * cell_axes[i + 1];
    }

    let mut flat = vec![reduction.fill(); cells * channels];
    for (row, vals) in indices.rows().into_iter().zip(updates.rows()) {
        let mut cell = 0usize;
        for (axis, &ix) in row.iter().enumerate() {
            assert!(
                ix < cell_axes[axis],
                "scatter index {ix} out of bounds for axis {axis} (dim {})",
                cell_axes[axis]
            );
            cell += ix * strides[axis];
        }
        let base = cell * channels;
        for (c, &v) in vals.iter().enumerate() {
            match reduction {
                Reduction::Sum => flat[base + c] += v,
                Reduction::Min => {
                    if v < flat[base + c] {
                        flat[base + c] = v;
                    }
                }
            }
        }
    }

    ArrayD::from_shape_vec(IxDyn(shape), flat).unwrap()
}
