//! Precision-weighted fusion (no depth buffer).
//!
//! Each valid sample is converted to "precision" form: `recip_var =
//! 1/(var+eps)` and `value * recip_var`. Three quantities are scatter-summed
//! per destination pixel: sum of value*recip_var, sum of recip_var, and a
//! contribution counter. The fused value is the classic inverse-variance
//! weighted mean - samples with lower variance pull the estimate more
//! strongly - and the fused variance is the counter-scaled harmonic
//! variance, clamped below by the threshold floor. Pixels nothing landed on
//! keep the prior value and variance unchanged.

use super::validity::{build_valid_samples, EdgeRule, ValidSamples};
use super::{assemble_omni_coords, assemble_projective_coords, prior_fallback, FusionInputs};
use crate::core::{scatter_nd, Reduction, MIN_DENOMINATOR};
use ndarray::{Array2, Array3, Array4, Ix4};

/// Round projective sample locations to integer pixels.
///
/// Locations arrive homogeneous (pre-multiplied by depth, channel 2), so
/// they are de-homogenized before rounding.
pub(crate) fn quantize_projective(samples: &Array3<f32>) -> Array3<i64> {
    let (b, n, _) = samples.dim();
    let mut q = Array3::zeros((b, n, 2));
    for bi in 0..b {
        for ni in 0..n {
            let depth = samples[[bi, ni, 2]];
            for k in 0..2 {
                let coord = samples[[bi, ni, k]] / (depth + MIN_DENOMINATOR);
                q[[bi, ni, k]] = coord.round() as i64;
            }
        }
    }
    q
}

/// Round omnidirectional sample locations to integer pixels (no division;
/// wrap-around happens later in the validity builder).
pub(crate) fn quantize_omni(samples: &Array3<f32>) -> Array3<i64> {
    let (b, n, _) = samples.dim();
    let mut q = Array3::zeros((b, n, 2));
    for bi in 0..b {
        for ni in 0..n {
            for k in 0..2 {
                q[[bi, ni, k]] = samples[[bi, ni, k]].round() as i64;
            }
        }
    }
    q
}

/// Scatter-accumulate valid samples and fuse per pixel.
///
/// Returns `(mean, variance, counter)` images of shape `[B, H, W, C]` /
/// `[B, H, W, 1]`, with the prior substituted wherever the counter is zero.
fn fuse_valid_samples(
    inputs: &FusionInputs,
    valid: &ValidSamples,
) -> (Array4<f32>, Array4<f32>, Array4<f32>) {
    let (b, h, w, c) = inputs.prior.dim();
    let m = valid.rows.len();

    // Per valid sample: value*recip_var (C), recip_var (C), counter (1).
    let mut updates = Array2::<f32>::zeros((m, 2 * c + 1));
    for (i, &(bi, ni)) in valid.rows.iter().enumerate() {
        for ci in 0..c {
            let value = inputs.samples[[bi, ni, 2 + ci]];
            let recip_var = 1.0 / (inputs.sample_var[[bi, ni, ci]] + MIN_DENOMINATOR);
            updates[[i, ci]] = value * recip_var;
            updates[[i, c + ci]] = recip_var;
        }
        updates[[i, 2 * c]] = 1.0;
    }

    let scattered = scatter_nd(&valid.cells, &updates, &[b, h, w, 2 * c + 1], Reduction::Sum)
        .into_dimensionality::<Ix4>()
        .unwrap();

    let mut mean = Array4::zeros((b, h, w, c));
    let mut variance = Array4::zeros((b, h, w, c));
    let mut counter = Array4::zeros((b, h, w, 1));
    for bi in 0..b {
        for y in 0..h {
            for x in 0..w {
                let count = scattered[[bi, y, x, 2 * c]];
                counter[[bi, y, x, 0]] = count;
                if count == 0.0 {
                    for ci in 0..c {
                        mean[[bi, y, x, ci]] = inputs.prior[[bi, y, x, ci]];
                        variance[[bi, y, x, ci]] = inputs.prior_var[[bi, y, x, ci]];
                    }
                    continue;
                }
                for ci in 0..c {
                    let sum_value_x_recip_var = scattered[[bi, y, x, ci]];
                    let sum_recip_var = scattered[[bi, y, x, c + ci]];
                    // Harmonic (precision-weighted) variance, scaled by the
                    // contribution count and clamped by the floor.
                    let var_raw = 1.0 / (sum_recip_var + MIN_DENOMINATOR);
                    variance[[bi, y, x, ci]] = (var_raw * count).max(inputs.floor[ci]);
                    mean[[bi, y, x, ci]] = var_raw * sum_value_x_recip_var;
                }
            }
        }
    }

    (mean, variance, counter)
}

pub(crate) fn render_projective(inputs: &FusionInputs) -> (Array4<f32>, Array4<f32>, Array4<f32>) {
    let quantized = quantize_projective(&inputs.samples);
    let valid = build_valid_samples(
        &quantized,
        &inputs.sample_var,
        &inputs.ceiling,
        inputs.image_dims,
        EdgeRule::Discard,
    );
    if valid.is_empty() {
        return prior_fallback(inputs);
    }

    let (mean, variance, counter) = fuse_valid_samples(inputs, &valid);
    let coords = assemble_projective_coords(&mean, &inputs.uniform);
    (coords, variance, counter)
}

pub(crate) fn render_omni(inputs: &FusionInputs) -> (Array4<f32>, Array4<f32>, Array4<f32>) {
    let quantized = quantize_omni(&inputs.samples);
    let valid = build_valid_samples(
        &quantized,
        &inputs.sample_var,
        &inputs.ceiling,
        inputs.image_dims,
        EdgeRule::Wrap,
    );
    if valid.is_empty() {
        return prior_fallback(inputs);
    }

    let (mean, variance, counter) = fuse_valid_samples(inputs, &valid);
    let coords = assemble_omni_coords(&mean, &inputs.uniform);
    (coords, variance, counter)
}
