//! Edge-function triangle rasterization.
//!
//! Scan conversion over per-triangle bounding boxes: every integer sample
//! point inside a triangle's clipped bounding box is tested against the
//! three signed edge functions, and covered samples are scatter-summed into
//! a coverage count per pixel. A pixel is reported covered iff its
//! accumulated count is nonzero, so overlapping triangles within one batch
//! element OR-combine. No sub-pixel precision, no anti-aliasing.

use crate::core::{restore_image, scatter_nd, Reduction};
use nalgebra::Vector2;
use ndarray::{Array2, Array4, ArrayD, Ix4};

/// Signed area test: which side of the directed segment `a -> b` the point
/// `p` lies on.
fn edge_function(p: Vector2<f32>, a: Vector2<f32>, b: Vector2<f32>) -> f32 {
    (p - a).perp(&(b - a))
}

/// Rasterize image-projected triangles into a boolean coverage image.
///
/// `triangles` is `batch + [T, 3, V]` with `V >= 2`: three vertices per
/// triangle, `(x, y)` pixel-space positions in the leading two components
/// (any depth component is ignored). Output is `batch + [H, W, 1]`.
///
/// Containment accepts either winding: a sample is inside when all three
/// edge functions share a sign, with points exactly on an edge counting as
/// covered. This is weaker than a strict single-winding inside-test; there
/// is no back-face rejection, and clockwise and counter-clockwise triangles
/// rasterize identically (grid meshes emit both windings). Degenerate
/// triangles collapse their bounding box and contribute zero or negligible
/// coverage.
pub fn rasterize_triangles(triangles: &ArrayD<f32>, image_dims: (usize, usize)) -> ArrayD<bool> {
    let shape = triangles.shape();
    assert!(
        shape.len() >= 3,
        "triangle array needs [T, 3, V] trailing axes, got shape {shape:?}"
    );
    let v = shape[shape.len() - 1];
    assert_eq!(shape[shape.len() - 2], 3, "triangles need exactly 3 vertices");
    assert!(v >= 2, "vertices need at least (x, y) components");

    let (batch, tail) = shape.split_at(shape.len() - 3);
    let t = tail[0];
    let b: usize = batch.iter().product();
    let data: Vec<f32> = triangles.iter().copied().collect();
    let tris = Array4::from_shape_vec((b, t, 3, v), data).unwrap();

    let (h, w) = image_dims;
    let mut indices = Vec::new();
    if h > 0 && w > 0 {
        for bi in 0..b {
            for ti in 0..t {
                let vert = |k: usize| Vector2::new(tris[[bi, ti, k, 0]], tris[[bi, ti, k, 1]]);
                let (v0, v1, v2) = (vert(0), vert(1), vert(2));
                if !(v0.x.is_finite()
                    && v0.y.is_finite()
                    && v1.x.is_finite()
                    && v1.y.is_finite()
                    && v2.x.is_finite()
                    && v2.y.is_finite())
                {
                    log::warn!("skipping triangle {ti} with non-finite vertex");
                    continue;
                }

                // Bounding box clipped to the image; an off-image triangle
                // yields an empty range and is skipped wholesale.
                let lo_x = v0.x.min(v1.x).min(v2.x).floor().max(0.0) as i64;
                let hi_x = v0.x.max(v1.x).max(v2.x).ceil().min(w as f32 - 1.0) as i64;
                let lo_y = v0.y.min(v1.y).min(v2.y).floor().max(0.0) as i64;
                let hi_y = v0.y.max(v1.y).max(v2.y).ceil().min(h as f32 - 1.0) as i64;
                if lo_x > hi_x || lo_y > hi_y {
                    continue;
                }

                for y in lo_y..=hi_y {
                    for x in lo_x..=hi_x {
                        let p = Vector2::new(x as f32, y as f32);
                        let e0 = edge_function(p, v0, v1);
                        let e1 = edge_function(p, v1, v2);
                        let e2 = edge_function(p, v2, v0);
                        let covered = (e0 >= 0.0 && e1 >= 0.0 && e2 >= 0.0)
                            || (e0 <= 0.0 && e1 <= 0.0 && e2 <= 0.0);
                        if covered {
                            indices.extend([bi, y as usize, x as usize]);
                        }
                    }
                }
            }
        }
    }

    let n = indices.len() / 3;
    let cells = Array2::from_shape_vec((n, 3), indices).unwrap();
    let ones = Array2::from_elem((n, 1), 1.0f32);
    let counts = scatter_nd(&cells, &ones, &[b, h, w, 1], Reduction::Sum)
        .into_dimensionality::<Ix4>()
        .unwrap();

    let covered = counts.mapv(|v| v > 0.0);
    restore_image(covered, batch)
}
