//! Depthwise 2D convolution, VALID padding.

use ndarray::parallel::prelude::*;
use ndarray::{Array3, Array4, Axis};

/// Convolve each channel of `image` (`[B, H, W, C]`) with its own kernel
/// plane (`[KH, KW, C]`), no padding: output is
/// `[B, H-KH+1, W-KW+1, C]`. A kernel larger than the image yields an
/// empty (zero-sized) output rather than an error, so degenerate shapes
/// stay composable.
pub(crate) fn depthwise_conv2d_valid(image: &Array4<f32>, kernel: &Array3<f32>) -> Array4<f32> {
    let (b, h, w, c) = image.dim();
    let (kh, kw, kc) = kernel.dim();
    assert_eq!(c, kc, "kernel channel count must match the image");

    let oh = (h + 1).saturating_sub(kh);
    let ow = (w + 1).saturating_sub(kw);
    let mut out = Array4::zeros((b, oh, ow, c));

    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(image.axis_iter(Axis(0)).into_par_iter())
        .for_each(|(mut out_img, img)| {
            for oy in 0..oh {
                for ox in 0..ow {
                    for ci in 0..c {
                        let mut acc = 0.0f32;
                        for ky in 0..kh {
                            for kx in 0..kw {
                                acc += img[[oy + ky, ox + kx, ci]] * kernel[[ky, kx, ci]];
                            }
                        }
                        out_img[[oy, ox, ci]] = acc;
                    }
                }
            }
        });

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_box_kernel_sums_window() {
        let image = Array4::from_shape_fn((1, 3, 3, 1), |(_, y, x, _)| (y * 3 + x) as f32);
        let kernel = Array3::from_elem((2, 2, 1), 1.0);
        let out = depthwise_conv2d_valid(&image, &kernel);
        assert_eq!(out.dim(), (1, 2, 2, 1));
        // Window at (0, 0): 0 + 1 + 3 + 4.
        assert_relative_eq!(out[[0, 0, 0, 0]], 8.0);
        // Window at (1, 1): 4 + 5 + 7 + 8.
        assert_relative_eq!(out[[0, 1, 1, 0]], 24.0);
    }

    #[test]
    fn test_channels_convolve_independently() {
        let mut image = Array4::zeros((1, 2, 2, 2));
        image[[0, 0, 0, 0]] = 1.0;
        image[[0, 0, 0, 1]] = 5.0;
        let mut kernel = Array3::zeros((2, 2, 2));
        kernel[[0, 0, 0]] = 2.0;
        kernel[[0, 0, 1]] = 3.0;
        let out = depthwise_conv2d_valid(&image, &kernel);
        assert_relative_eq!(out[[0, 0, 0, 0]], 2.0);
        assert_relative_eq!(out[[0, 0, 0, 1]], 15.0);
    }

    #[test]
    fn test_kernel_larger_than_image_is_empty() {
        let image = Array4::<f32>::zeros((1, 2, 2, 1));
        let kernel = Array3::from_elem((3, 3, 1), 1.0);
        let out = depthwise_conv2d_valid(&image, &kernel);
        assert_eq!(out.dim(), (1, 0, 0, 1));
    }
}
