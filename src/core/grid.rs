//! Uniform pixel coordinate grids.

use ndarray::{ArrayD, IxDyn};

/// Build a homogeneous integer pixel coordinate image.
///
/// Output shape is `batch_shape + [h, w, 3]` with channels `(x, y, 1)`, i.e.
/// pixel `(row y, col x)` holds `[x, y, 1]`. Fusion kernels multiply this
/// grid by fused depth to reconstruct geometrically consistent homogeneous
/// coordinates, and the rasterizer samples it over bounding boxes.
pub fn uniform_pixel_coords(image_dims: (usize, usize), batch_shape: &[usize]) -> ArrayD<f32> {
    let (h, w) = image_dims;
    let mut base = Vec::with_capacity(h * w * 3);
    for y in 0..h {
        for x in 0..w {
            base.push(x as f32);
            base.push(y as f32);
            base.push(1.0);
        }
    }

    let b: usize = batch_shape.iter().product();
    let mut data = Vec::with_capacity(b * base.len());
    for _ in 0..b {
        data.extend_from_slice(&base);
    }

    let mut shape = batch_shape.to_vec();
    shape.extend([h, w, 3]);
    ArrayD::from_shape_vec(IxDyn(&shape), data).unwrap()
}
