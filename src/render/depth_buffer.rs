//! Depth-priority fusion (with depth buffer).
//!
//! Keeps only the sample nearest the camera per destination pixel - for
//! every channel and its variance - with a single element-wise minimum
//! scatter instead of a running comparison loop. Depth and each other
//! quantity are packed into comparable composite keys:
//!
//! `key = normalize_to_unit(value) + scaled_depth`
//!
//! where `scaled_depth = (depth - min) / (range * MIN_DEPTH_DIFF + eps)`.
//! The normalized term is bounded in [0, 1] while `scaled_depth` differs by
//! at least 1 between depth buckets separated by `MIN_DEPTH_DIFF`, so the
//! combined key's ordering is depth-dominant for every channel
//! simultaneously. Near-equal depths tie-break by normalized channel
//! magnitude - an accepted approximation, not exact ties.
//!
//! The encode/decode pair is kept explicit so the round trip is testable
//! independent of the scatter step.

use super::validity::{build_valid_samples, EdgeRule};
use super::{assemble_omni_coords, assemble_projective_coords, prior_fallback, FusionInputs};
use crate::core::{scatter_nd, Reduction, MIN_DENOMINATOR, MIN_DEPTH_DIFF};
use ndarray::{s, Array1, Array2, Array3, Array4, Ix4};

/// Sentinel scattered alongside the keys; a fused pixel whose sentinel
/// channel is not this value received no contribution.
const SENTINEL: f32 = -1.0;

/// Per-batch normalization state needed to invert the key encoding.
#[derive(Clone, Debug)]
pub(crate) struct DepthKeyScale {
    /// `[B]` minimum / range of depth over valid samples.
    pub depth_min: Array1<f32>,
    pub depth_range: Array1<f32>,
    /// `[B, C-1]` per non-depth channel, with the +-1 margins applied.
    pub chan_min: Array2<f32>,
    pub chan_range: Array2<f32>,
    /// `[B, C]` per variance channel, with the +-1 margins applied.
    pub var_min: Array2<f32>,
    pub var_range: Array2<f32>,
}

impl DepthKeyScale {
    fn scaled_depth(&self, b: usize, depth: f32) -> f32 {
        (depth - self.depth_min[b]) / (self.depth_range[b] * MIN_DEPTH_DIFF + MIN_DENOMINATOR)
    }
}

/// Min/max of `values[b, n]` over samples where `mask[b, n]`, or `(0, 0)`
/// when the batch element has no valid sample (its pixels all fall back to
/// the prior, so the scale is never consulted).
fn masked_min_max(
    values: impl Fn(usize, usize) -> f32,
    mask: &Array2<bool>,
    b: usize,
) -> (f32, f32) {
    let n = mask.dim().1;
    let mut lo = f32::INFINITY;
    let mut hi = f32::NEG_INFINITY;
    for ni in 0..n {
        if mask[[b, ni]] {
            let v = values(b, ni);
            lo = lo.min(v);
            hi = hi.max(v);
        }
    }
    if lo.is_finite() {
        (lo, hi)
    } else {
        (0.0, 0.0)
    }
}

/// Encode depth-priority composite keys for every sample.
///
/// `means` is `[B, N, C]` with channel 0 the depth-like priority channel;
/// `vars` is `[B, N, C]`. Channel 0 of the mean keys stays the raw depth;
/// all other mean channels and every variance channel are min/max
/// normalized (margins of +-1 keep the normalized term strictly inside the
/// unit interval) and offset by the scaled depth. Statistics are taken
/// batch-wise over the valid samples only.
pub(crate) fn encode_depth_keys(
    means: &Array3<f32>,
    vars: &Array3<f32>,
    mask: &Array2<bool>,
) -> (Array3<f32>, Array3<f32>, DepthKeyScale) {
    let (b, n, c) = means.dim();

    let mut depth_min = Array1::zeros(b);
    let mut depth_range = Array1::zeros(b);
    let mut chan_min = Array2::zeros((b, c.saturating_sub(1)));
    let mut chan_range = Array2::ones((b, c.saturating_sub(1)));
    let mut var_min = Array2::zeros((b, c));
    let mut var_range = Array2::ones((b, c));

    for bi in 0..b {
        let (lo, hi) = masked_min_max(|bb, nn| means[[bb, nn, 0]], mask, bi);
        depth_min[bi] = lo;
        depth_range[bi] = hi - lo;
        for ci in 1..c {
            let (lo, hi) = masked_min_max(|bb, nn| means[[bb, nn, ci]], mask, bi);
            chan_min[[bi, ci - 1]] = lo - 1.0;
            chan_range[[bi, ci - 1]] = (hi + 1.0) - (lo - 1.0);
        }
        for ci in 0..c {
            let (lo, hi) = masked_min_max(|bb, nn| vars[[bb, nn, ci]], mask, bi);
            var_min[[bi, ci]] = lo - 1.0;
            var_range[[bi, ci]] = (hi + 1.0) - (lo - 1.0);
        }
    }

    let scale = DepthKeyScale {
        depth_min,
        depth_range,
        chan_min,
        chan_range,
        var_min,
        var_range,
    };

    let mut mean_keys = Array3::zeros((b, n, c));
    let mut var_keys = Array3::zeros((b, n, c));
    for bi in 0..b {
        for ni in 0..n {
            let depth = means[[bi, ni, 0]];
            let sd = scale.scaled_depth(bi, depth);
            mean_keys[[bi, ni, 0]] = depth;
            for ci in 1..c {
                let normed = (means[[bi, ni, ci]] - scale.chan_min[[bi, ci - 1]])
                    / (scale.chan_range[[bi, ci - 1]] + MIN_DENOMINATOR);
                mean_keys[[bi, ni, ci]] = normed + sd;
            }
            for ci in 0..c {
                let normed = (vars[[bi, ni, ci]] - scale.var_min[[bi, ci]])
                    / (scale.var_range[[bi, ci]] + MIN_DENOMINATOR);
                var_keys[[bi, ni, ci]] = normed + sd;
            }
        }
    }

    (mean_keys, var_keys, scale)
}

/// Invert the key encoding on fused images.
///
/// Subtracting the scaled-depth term recomputed from the fused depth
/// channel removes exactly the offset contributed by the winning sample,
/// because all channels were keyed with the same offset. Values at invalid
/// pixels are meaningless (the caller substitutes the prior there).
pub(crate) fn decode_depth_keys(
    mean_keys: &Array4<f32>,
    var_keys: &Array4<f32>,
    scale: &DepthKeyScale,
) -> (Array4<f32>, Array4<f32>) {
    let (b, h, w, c) = mean_keys.dim();
    let mut mean = Array4::zeros((b, h, w, c));
    let mut variance = Array4::zeros((b, h, w, c));
    for bi in 0..b {
        for y in 0..h {
            for x in 0..w {
                let depth = mean_keys[[bi, y, x, 0]];
                let sd = scale.scaled_depth(bi, depth);
                mean[[bi, y, x, 0]] = depth;
                for ci in 1..c {
                    mean[[bi, y, x, ci]] = (mean_keys[[bi, y, x, ci]] - sd)
                        * scale.chan_range[[bi, ci - 1]]
                        + scale.chan_min[[bi, ci - 1]];
                }
                for ci in 0..c {
                    variance[[bi, y, x, ci]] = (var_keys[[bi, y, x, ci]] - sd)
                        * scale.var_range[[bi, ci]]
                        + scale.var_min[[bi, ci]];
                }
            }
        }
    }
    (mean, variance)
}

/// Shared depth-buffered fusion once locations are quantized.
fn fuse_with_depth_buffer(
    inputs: &FusionInputs,
    quantized: &Array3<i64>,
    edge: EdgeRule,
) -> Option<(Array4<f32>, Array4<f32>, Array4<f32>)> {
    let (b, h, w, c) = inputs.prior.dim();

    let valid = build_valid_samples(
        quantized,
        &inputs.sample_var,
        &inputs.ceiling,
        inputs.image_dims,
        edge,
    );
    if valid.is_empty() {
        return None;
    }

    let means = inputs.samples.slice(s![.., .., 2..]).to_owned();
    let (mean_keys, var_keys, scale) = encode_depth_keys(&means, &inputs.sample_var, &valid.mask);

    // Per valid sample: mean keys (C), variance keys (C), sentinel (1).
    let m = valid.rows.len();
    let mut updates = Array2::<f32>::zeros((m, 2 * c + 1));
    for (i, &(bi, ni)) in valid.rows.iter().enumerate() {
        for ci in 0..c {
            updates[[i, ci]] = mean_keys[[bi, ni, ci]];
            updates[[i, c + ci]] = var_keys[[bi, ni, ci]];
        }
        updates[[i, 2 * c]] = SENTINEL;
    }

    let scattered = scatter_nd(&valid.cells, &updates, &[b, h, w, 2 * c + 1], Reduction::Min)
        .into_dimensionality::<Ix4>()
        .unwrap();

    let fused_mean_keys = scattered.slice(s![.., .., .., 0..c]).to_owned();
    let fused_var_keys = scattered.slice(s![.., .., .., c..2 * c]).to_owned();
    let (mean_raw, var_raw) = decode_depth_keys(&fused_mean_keys, &fused_var_keys, &scale);

    let mut mean = Array4::zeros((b, h, w, c));
    let mut variance = Array4::zeros((b, h, w, c));
    let mut coverage = Array4::zeros((b, h, w, 1));
    for bi in 0..b {
        for y in 0..h {
            for x in 0..w {
                let hit = scattered[[bi, y, x, 2 * c]] == SENTINEL;
                if hit {
                    coverage[[bi, y, x, 0]] = 1.0;
                    for ci in 0..c {
                        mean[[bi, y, x, ci]] = mean_raw[[bi, y, x, ci]];
                        variance[[bi, y, x, ci]] =
                            var_raw[[bi, y, x, ci]].max(inputs.floor[ci]);
                    }
                } else {
                    for ci in 0..c {
                        mean[[bi, y, x, ci]] = inputs.prior[[bi, y, x, ci]];
                        variance[[bi, y, x, ci]] = inputs.prior_var[[bi, y, x, ci]];
                    }
                }
            }
        }
    }

    Some((mean, variance, coverage))
}

pub(crate) fn render_projective(inputs: &FusionInputs) -> (Array4<f32>, Array4<f32>, Array4<f32>) {
    let quantized = super::fuse::quantize_projective(&inputs.samples);
    match fuse_with_depth_buffer(inputs, &quantized, EdgeRule::Discard) {
        Some((mean, variance, coverage)) => {
            let coords = assemble_projective_coords(&mean, &inputs.uniform);
            (coords, variance, coverage)
        }
        None => prior_fallback(inputs),
    }
}

pub(crate) fn render_omni(inputs: &FusionInputs) -> (Array4<f32>, Array4<f32>, Array4<f32>) {
    let quantized = super::fuse::quantize_omni(&inputs.samples);
    match fuse_with_depth_buffer(inputs, &quantized, EdgeRule::Wrap) {
        Some((mean, variance, coverage)) => {
            let coords = assemble_omni_coords(&mean, &inputs.uniform);
            (coords, variance, coverage)
        }
        None => prior_fallback(inputs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{render_pixel_coords, Fill, RenderOptions};
    use approx::assert_relative_eq;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn test_encode_decode_round_trip() {
        // Three samples, two channels (depth + one value).
        let means = Array3::from_shape_vec(
            (1, 3, 2),
            vec![1.0, 10.0, 3.0, 20.0, 7.0, -5.0],
        )
        .unwrap();
        let vars = Array3::from_shape_vec(
            (1, 3, 2),
            vec![0.1, 0.4, 0.2, 0.3, 0.05, 0.9],
        )
        .unwrap();
        let mask = Array2::from_elem((1, 3), true);

        let (mean_keys, var_keys, scale) = encode_depth_keys(&means, &vars, &mask);

        // Depth channel of the keys is the raw depth.
        assert_eq!(mean_keys[[0, 1, 0]], 3.0);

        // Place each sample's keys on its own pixel and decode: the round
        // trip must recover the original values and variances.
        for ni in 0..3 {
            let mk = Array4::from_shape_vec(
                (1, 1, 1, 2),
                vec![mean_keys[[0, ni, 0]], mean_keys[[0, ni, 1]]],
            )
            .unwrap();
            let vk = Array4::from_shape_vec(
                (1, 1, 1, 2),
                vec![var_keys[[0, ni, 0]], var_keys[[0, ni, 1]]],
            )
            .unwrap();
            let (mean, var) = decode_depth_keys(&mk, &vk, &scale);
            assert_relative_eq!(mean[[0, 0, 0, 0]], means[[0, ni, 0]], epsilon = 1e-3);
            assert_relative_eq!(mean[[0, 0, 0, 1]], means[[0, ni, 1]], epsilon = 1e-3);
            assert_relative_eq!(var[[0, 0, 0, 0]], vars[[0, ni, 0]], epsilon = 1e-3);
            assert_relative_eq!(var[[0, 0, 0, 1]], vars[[0, ni, 1]], epsilon = 1e-3);
        }
    }

    #[test]
    fn test_keys_are_depth_dominant() {
        // The nearer sample must produce the smaller composite key for
        // every channel, even though its channel value is larger.
        let means = Array3::from_shape_vec((1, 2, 2), vec![1.0, 100.0, 1.5, -100.0]).unwrap();
        let vars = Array3::from_shape_vec((1, 2, 2), vec![0.9, 0.1, 0.01, 0.8]).unwrap();
        let mask = Array2::from_elem((1, 2), true);
        let (mean_keys, var_keys, _) = encode_depth_keys(&means, &vars, &mask);

        assert!(mean_keys[[0, 0, 1]] < mean_keys[[0, 1, 1]]);
        assert!(var_keys[[0, 0, 0]] < var_keys[[0, 1, 0]]);
        assert!(var_keys[[0, 0, 1]] < var_keys[[0, 1, 1]]);
    }

    #[test]
    fn test_depth_buffer_selects_nearest_sample() {
        // Two samples on pixel (1, 1): depth 1 with value 10 and depth 5
        // with value 20. The nearer sample must win wholesale.
        let data = vec![
            1.0, 1.0, 1.0, 10.0, // x*d, y*d, depth, value
            5.0, 5.0, 5.0, 20.0,
        ];
        let samples = ArrayD::from_shape_vec(IxDyn(&[2, 4]), data).unwrap();
        let var = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![0.1, 0.3, 0.2, 0.6]).unwrap();
        let options = RenderOptions {
            with_depth_buffer: true,
            sample_var: Fill::Array(var),
            ..Default::default()
        };
        let out = render_pixel_coords(&samples, &Fill::Value(0.0), (3, 3), &options);

        assert_eq!(out.coverage[[1, 1, 0]], 1.0);
        // Selected, not averaged.
        assert_relative_eq!(out.coords[[1, 1, 3]], 10.0, epsilon = 1e-2);
        // Homogeneous coords from the winning depth.
        assert_relative_eq!(out.coords[[1, 1, 2]], 1.0, epsilon = 1e-3);
        // The winner's variances, not a blend.
        assert_relative_eq!(out.variance[[1, 1, 0]], 0.1, epsilon = 1e-2);
        assert_relative_eq!(out.variance[[1, 1, 1]], 0.3, epsilon = 1e-2);
        // Untouched pixels report invalid and keep the prior.
        assert_eq!(out.coverage[[0, 0, 0]], 0.0);
        assert_eq!(out.coords[[0, 0, 3]], 0.0);
    }

    #[test]
    fn test_depth_buffer_fallback_when_nothing_valid() {
        let samples = ArrayD::from_shape_vec(IxDyn(&[1, 4]), vec![0.0, 0.0, 1.0, 5.0]).unwrap();
        let options = RenderOptions {
            with_depth_buffer: true,
            sample_var: Fill::Value(2e12),
            prior_var: Fill::Value(4.0),
            ..Default::default()
        };
        let out = render_pixel_coords(&samples, &Fill::Value(1.0), (2, 2), &options);
        assert!(out.coverage.iter().all(|&v| v == 0.0));
        assert!(out.variance.iter().all(|&v| v == 4.0));
        assert_eq!(out.coords[[0, 0, 2]], 1.0);
    }
}
