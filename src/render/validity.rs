//! Validity filtering and scatter-index building.
//!
//! A sample contributes to fusion only if every channel variance is below
//! the threshold ceiling AND its quantized location is admissible: inside
//! the image for bounded (projective) topologies, anywhere for wrap-around
//! (omnidirectional) topologies, where the location is reduced modulo the
//! image dimensions. Samples failing either test are dropped entirely; they
//! neither vote for a pixel nor affect any other pixel.

use ndarray::{Array1, Array2, Array3};

/// What happens to a quantized location outside `[0, dim)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EdgeRule {
    /// Drop the sample (projective images).
    Discard,
    /// Wrap via euclidean modulo (omnidirectional images).
    Wrap,
}

/// Valid samples with their scatter destinations.
pub(crate) struct ValidSamples {
    /// `[B, N]` per-sample validity, for batch-wise statistics.
    pub mask: Array2<bool>,
    /// `(batch, sample)` row of each valid sample, batch-major.
    pub rows: Vec<(usize, usize)>,
    /// `num_valid x 3` destination cells `(batch, row, col)`.
    pub cells: Array2<usize>,
}

impl ValidSamples {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Build the validity mask and flat scatter-index list.
///
/// `quantized_xy` is `[B, N, 2]` holding already-rounded `(x, y)` integer
/// locations, possibly out of bounds.
pub(crate) fn build_valid_samples(
    quantized_xy: &Array3<i64>,
    sample_var: &Array3<f32>,
    ceiling: &Array1<f32>,
    image_dims: (usize, usize),
    edge: EdgeRule,
) -> ValidSamples {
    let (b, n, _) = quantized_xy.dim();
    let c = sample_var.dim().2;
    let (h, w) = image_dims;

    let mut mask = Array2::from_elem((b, n), false);
    let mut rows = Vec::new();
    let mut cells = Vec::new();

    // A zero-sized image admits nothing; the caller falls back to the prior.
    if h > 0 && w > 0 {
        for bi in 0..b {
            for ni in 0..n {
                let var_ok = (0..c).all(|ci| sample_var[[bi, ni, ci]] < ceiling[ci]);
                if !var_ok {
                    continue;
                }
                let x = quantized_xy[[bi, ni, 0]];
                let y = quantized_xy[[bi, ni, 1]];
                let (x, y) = match edge {
                    EdgeRule::Discard => {
                        if x < 0 || y < 0 || x > w as i64 - 1 || y > h as i64 - 1 {
                            continue;
                        }
                        (x as usize, y as usize)
                    }
                    EdgeRule::Wrap => (
                        x.rem_euclid(w as i64) as usize,
                        y.rem_euclid(h as i64) as usize,
                    ),
                };
                mask[[bi, ni]] = true;
                rows.push((bi, ni));
                cells.extend([bi, y, x]);
            }
        }
    }

    let cells = Array2::from_shape_vec((rows.len(), 3), cells).unwrap();
    ValidSamples { mask, rows, cells }
}
