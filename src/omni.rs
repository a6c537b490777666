//! Border padding for omnidirectional (equirectangular) images.
//!
//! An omni image wraps horizontally, and crossing a pole lands on the
//! opposite half of the same row band. Padding therefore takes the left
//! and right borders from the opposite horizontal edge, and the top and
//! bottom borders from the nearest rows with their halves swapped and the
//! row order reversed.

use ndarray::{concatenate, Array4, ArrayD, Axis};

use crate::core::{flatten_image, restore_image};

/// Rows near a pole, halves swapped at `w / 2` and row order flipped.
fn pole_border(image: &Array4<f32>, rows: std::ops::Range<usize>) -> Array4<f32> {
    let w = image.dim().2;
    let half = w / 2;
    let band = image.slice(ndarray::s![.., rows, .., ..]);
    let left = band.slice(ndarray::s![.., .., half.., ..]);
    let right = band.slice(ndarray::s![.., .., ..half, ..]);
    let swapped = concatenate(Axis(2), &[left, right]).unwrap();
    swapped.slice(ndarray::s![.., ..;-1, .., ..]).to_owned()
}

/// Pad an omni image by `pad_size` pixels on every side with the correct
/// spherical wrapping, growing `batch + [H, W, C]` to
/// `batch + [H + 2P, W + 2P, C]`.
pub fn pad_omni_image(image: &ArrayD<f32>, pad_size: usize) -> ArrayD<f32> {
    if pad_size == 0 {
        return image.clone();
    }

    let (img, batch) = flatten_image(image);
    let (_, h, w, _) = img.dim();
    assert!(
        pad_size <= h && pad_size <= w,
        "pad_size {pad_size} exceeds image dims ({h}, {w})"
    );

    let top_border = pole_border(&img, 0..pad_size);
    let bottom_border = pole_border(&img, h - pad_size..h);
    let expanded = concatenate(
        Axis(1),
        &[top_border.view(), img.view(), bottom_border.view()],
    )
    .unwrap();

    // Horizontal wrap: the left pad shows the far right edge and vice
    // versa.
    let left_border = expanded.slice(ndarray::s![.., .., w - pad_size.., ..]);
    let right_border = expanded.slice(ndarray::s![.., .., ..pad_size, ..]);
    let padded = concatenate(Axis(2), &[left_border, expanded.view(), right_border]).unwrap();

    restore_image(padded, &batch)
}
