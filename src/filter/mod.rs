//! Uncertainty-aware image smoothing.
//!
//! Two smoothers over `batch + [H, W, C]` images, both VALID-mode so the
//! output loses `kernel_dim - 1` pixels per spatial axis:
//!
//! - [`weighted_image_smooth`]: box-kernel weighted average, where each
//!   pixel votes with an explicit weight channel.
//! - [`smooth_image_from_var_image`]: precision-weighted smoothing driven
//!   by a variance image, with a distance-scaled kernel so far-away pixels
//!   are trusted less. Returns a smoothed variance image alongside the
//!   mean, deliberately re-inflated to counter the false independence
//!   assumption between neighbouring measurements.

mod conv;

use crate::core::MIN_DENOMINATOR;
use conv::depthwise_conv2d_valid;
use ndarray::{Array1, Array3, ArrayD};

use crate::core::{flatten_image, restore_image};

/// Smooth `mean` with per-pixel `weights` over a `kernel_dim` square box
/// kernel.
///
/// Returns `(new_mean, new_weights)`, both `batch + [H-K+1, W-K+1, C]`.
/// The new mean is the weight-normalized window average; the new weights
/// are the window-averaged input weights.
pub fn weighted_image_smooth(
    mean: &ArrayD<f32>,
    weights: &ArrayD<f32>,
    kernel_dim: usize,
) -> (ArrayD<f32>, ArrayD<f32>) {
    assert!(kernel_dim >= 1, "kernel_dim must be positive");
    assert_eq!(
        mean.shape(),
        weights.shape(),
        "mean and weight images must share a shape"
    );

    let (mean4, batch) = flatten_image(mean);
    let (weights4, _) = flatten_image(weights);
    let c = mean4.dim().3;

    let kernel = Array3::from_elem((kernel_dim, kernel_dim, c), 1.0f32);
    let kernel_sum = (kernel_dim * kernel_dim) as f32;

    let mean_x_weights = &mean4 * &weights4;
    let mean_x_weights_sum = depthwise_conv2d_valid(&mean_x_weights, &kernel).mapv(f32::abs);
    let sum_of_weights = depthwise_conv2d_valid(&weights4, &kernel);

    let new_mean = &mean_x_weights_sum / &sum_of_weights.mapv(|s| s + MIN_DENOMINATOR);
    let new_weights = sum_of_weights / (kernel_sum + MIN_DENOMINATOR);

    (
        restore_image(new_mean, &batch),
        restore_image(new_weights, &batch),
    )
}

/// Smooth `mean` by fusing each window with inverse-variance weights from
/// `var`, using a kernel that grows with distance from the window centre.
///
/// `kernel_scale` is a per-channel `[C]` factor on the distance term; a
/// scale of zero makes the kernel uniform. Returns `(new_mean, new_var)`,
/// both `batch + [H-K+1, W-K+1, C]`.
pub fn smooth_image_from_var_image(
    mean: &ArrayD<f32>,
    var: &ArrayD<f32>,
    kernel_dim: usize,
    kernel_scale: &Array1<f32>,
) -> (ArrayD<f32>, ArrayD<f32>) {
    assert!(kernel_dim >= 1, "kernel_dim must be positive");
    assert_eq!(
        mean.shape(),
        var.shape(),
        "mean and variance images must share a shape"
    );

    let (mean4, batch) = flatten_image(mean);
    let (var4, _) = flatten_image(var);
    let c = mean4.dim().3;
    assert_eq!(kernel_scale.len(), c, "kernel_scale needs one entry per channel");

    let kernel_size = (kernel_dim * kernel_dim) as f32;
    let centre = (kernel_dim / 2) as f32;

    // Kernel weight rises with euclidean distance from the central pixel,
    // so its reciprocal downweights far neighbours during fusion.
    let kernel = Array3::from_shape_fn((kernel_dim, kernel_dim, c), |(ky, kx, ci)| {
        let dy = centre - ky as f32;
        let dx = centre - kx as f32;
        1.0 + (dx * dx + dy * dy).sqrt() * kernel_scale[ci]
    });
    let recip_kernel = kernel.mapv(|k| 1.0 / (k + MIN_DENOMINATOR));

    let kernel_sum: f32 = kernel.slice(ndarray::s![.., .., 0]).sum();
    let recip_kernel_sum: Array1<f32> =
        Array1::from_shape_fn(c, |ci| recip_kernel.slice(ndarray::s![.., .., ci]).sum());

    let recip_var = var4.mapv(|v| 1.0 / (v + MIN_DENOMINATOR));
    let recip_var_scaled = recip_var.mapv(|rv| rv + 1.0);

    let mut recip_new_var = depthwise_conv2d_valid(&recip_var_scaled, &recip_kernel);
    for ci in 0..c {
        // The 0.99 keeps float32 rounding from producing negative
        // precision; the exact equation would subtract the full sum.
        recip_new_var
            .slice_mut(ndarray::s![.., .., .., ci])
            .mapv_inplace(|r| r - recip_kernel_sum[ci] * 0.99);
    }
    let new_var = recip_new_var.mapv(|r| 1.0 / (r + MIN_DENOMINATOR));

    let mean_x_recip_var = &mean4 * &recip_var;
    let mean_x_recip_var_sum =
        depthwise_conv2d_valid(&mean_x_recip_var, &recip_kernel).mapv(f32::abs);
    let new_mean = &new_var * &mean_x_recip_var_sum;

    // Re-inflate: windowed measurements are not independent, so the fused
    // variance would otherwise be overconfident.
    let new_var = new_var * (kernel_size * kernel_size / (kernel_sum + MIN_DENOMINATOR));

    (
        restore_image(new_mean, &batch),
        restore_image(new_var, &batch),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, ArrayD, IxDyn};

    fn const_image(h: usize, w: usize, c: usize, value: f32) -> ArrayD<f32> {
        ArrayD::from_elem(IxDyn(&[h, w, c]), value)
    }

    #[test]
    fn test_weighted_smooth_constant_image_is_identity() {
        let mean = const_image(4, 4, 2, 3.0);
        let weights = const_image(4, 4, 2, 2.0);
        let (new_mean, new_weights) = weighted_image_smooth(&mean, &weights, 2);
        assert_eq!(new_mean.shape(), &[3, 3, 2]);
        for &m in new_mean.iter() {
            assert_relative_eq!(m, 3.0, epsilon = 1e-5);
        }
        // Uniform weights average to themselves.
        for &w in new_weights.iter() {
            assert_relative_eq!(w, 2.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_weighted_smooth_ignores_zero_weight_pixels() {
        let mut mean = const_image(2, 2, 1, 9.0);
        mean[[0, 0, 0]] = 4.0;
        let mut weights = const_image(2, 2, 1, 0.0);
        weights[[0, 0, 0]] = 1.0;
        let (new_mean, new_weights) = weighted_image_smooth(&mean, &weights, 2);
        assert_eq!(new_mean.shape(), &[1, 1, 1]);
        // Only the weighted pixel votes.
        assert_relative_eq!(new_mean[[0, 0, 0]], 4.0, epsilon = 1e-5);
        assert_relative_eq!(new_weights[[0, 0, 0]], 0.25, epsilon = 1e-6);
    }

    #[test]
    fn test_var_smooth_uniform_inputs() {
        // Constant mean and unit variance with a flat kernel: the smoothed
        // mean stays put and the variance lands just under 1 because of
        // the 0.99 rounding guard and the final re-inflation.
        let mean = const_image(5, 5, 1, 5.0);
        let var = const_image(5, 5, 1, 1.0);
        let (new_mean, new_var) = smooth_image_from_var_image(&mean, &var, 3, &arr1(&[0.0]));
        assert_eq!(new_mean.shape(), &[3, 3, 1]);

        // recip_var = 1, scaled = 2, window sum = 18, minus 0.99 * 9.
        let prerescale = 1.0 / (18.0 - 0.99 * 9.0);
        let expected_mean = prerescale * 9.0 * 5.0;
        let expected_var = prerescale * 81.0 / 9.0;
        for &m in new_mean.iter() {
            assert_relative_eq!(m, expected_mean, epsilon = 1e-4);
        }
        for &v in new_var.iter() {
            assert_relative_eq!(v, expected_var, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_var_smooth_low_variance_pixel_dominates() {
        let mut mean = const_image(3, 3, 1, 10.0);
        mean[[1, 1, 0]] = 2.0;
        let mut var = const_image(3, 3, 1, 1e6);
        var[[1, 1, 0]] = 1e-4;
        let (new_mean, _) = smooth_image_from_var_image(&mean, &var, 3, &arr1(&[0.0]));
        assert_eq!(new_mean.shape(), &[1, 1, 1]);
        // The confident central pixel drags the window mean to itself.
        assert_relative_eq!(new_mean[[0, 0, 0]], 2.0, epsilon = 1e-2);
    }

    #[test]
    fn test_var_smooth_batched_shape() {
        let mean = ArrayD::from_elem(IxDyn(&[2, 4, 4, 3]), 1.0);
        let var = ArrayD::from_elem(IxDyn(&[2, 4, 4, 3]), 0.5);
        let (new_mean, new_var) =
            smooth_image_from_var_image(&mean, &var, 3, &arr1(&[0.1, 0.1, 0.1]));
        assert_eq!(new_mean.shape(), &[2, 2, 2, 3]);
        assert_eq!(new_var.shape(), &[2, 2, 2, 3]);
    }
}
