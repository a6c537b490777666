//! Triangle mesh extraction from coordinate images.
//!
//! Each pixel of a `batch + [H, W, 3]` coordinate image becomes a mesh
//! vertex, and each grid cell contributes two triangles. The index
//! template depends only on the image dimensions, so meshes without a
//! validity mask share one index buffer across the whole batch; masked
//! meshes prune per batch element and carry their own buffers.

use ndarray::{Array2, ArrayD, IxDyn};

use crate::core::flatten_image;

/// Triangle index buffers for a batched mesh.
#[derive(Clone, Debug)]
pub enum TrimeshIndices {
    /// One `[T, 3]` buffer shared by every batch element.
    Shared(Array2<u32>),
    /// A pruned `[T_b, 3]` buffer per batch element, batch-major.
    PerBatch(Vec<Array2<u32>>),
}

/// Vertices and triangle indices extracted from a coordinate image.
#[derive(Clone, Debug)]
pub struct Trimesh {
    /// `batch + [H * W, 3]` vertex positions.
    pub vertices: ArrayD<f32>,
    pub indices: TrimeshIndices,
}

/// Triangle indices for a regular `(h, w)` pixel grid, `[2(h-1)(w-1), 3]`.
///
/// Vertex ids are row-major pixel ids. The first half of the buffer holds
/// the upper-left triangle of every cell, the second half the lower-right
/// one. Images thinner than two pixels in either dimension yield an empty
/// buffer.
pub fn trimesh_indices(image_dims: (usize, usize)) -> Array2<u32> {
    let (h, w) = image_dims;
    if h < 2 || w < 2 {
        return Array2::zeros((0, 3));
    }

    let cells = (h - 1) * (w - 1);
    let mut flat = Vec::with_capacity(cells * 6);
    for y in 0..h - 1 {
        for x in 0..w - 1 {
            let t00 = (y * w + x) as u32;
            flat.extend([t00, t00 + 1, t00 + w as u32]);
        }
    }
    for y in 0..h - 1 {
        for x in 0..w - 1 {
            let t00 = (y * w + x) as u32;
            flat.extend([t00 + w as u32 + 1, t00 + 1, t00 + w as u32]);
        }
    }
    Array2::from_shape_vec((2 * cells, 3), flat).unwrap()
}

/// Build a triangle mesh from a coordinate image.
///
/// `coord_img` is `batch + [H, W, 3]`. When `validity_mask`
/// (`batch + [H, W, 1]`) is given, a triangle survives only if all three
/// of its vertices are valid, and the indices become per batch element.
pub fn coord_image_to_trimesh(
    coord_img: &ArrayD<f32>,
    validity_mask: Option<&ArrayD<bool>>,
) -> Trimesh {
    let shape = coord_img.shape();
    assert!(
        shape.len() >= 3 && shape[shape.len() - 1] == 3,
        "coordinate image needs [H, W, 3] trailing axes, got shape {shape:?}"
    );
    let (h, w) = (shape[shape.len() - 3], shape[shape.len() - 2]);
    let batch = &shape[..shape.len() - 3];

    let mut vertex_shape: Vec<usize> = batch.to_vec();
    vertex_shape.extend([h * w, 3]);
    let data: Vec<f32> = coord_img.iter().copied().collect();
    let vertices = ArrayD::from_shape_vec(IxDyn(&vertex_shape), data).unwrap();

    let template = trimesh_indices((h, w));
    let indices = match validity_mask {
        None => TrimeshIndices::Shared(template),
        Some(mask) => {
            assert_eq!(
                &mask.shape()[..mask.ndim() - 1],
                &shape[..shape.len() - 1],
                "validity mask must match the image spatially"
            );
            let (mask4, _) = flatten_image(mask);
            let b = mask4.dim().0;
            let mut per_batch = Vec::with_capacity(b);
            for bi in 0..b {
                let flat = mask4.index_axis(ndarray::Axis(0), bi);
                let vertex_valid =
                    |id: u32| flat[[(id as usize) / w, (id as usize) % w, 0]];
                let kept: Vec<u32> = template
                    .rows()
                    .into_iter()
                    .filter(|tri| tri.iter().all(|&id| vertex_valid(id)))
                    .flat_map(|tri| tri.to_vec())
                    .collect();
                per_batch.push(Array2::from_shape_vec((kept.len() / 3, 3), kept).unwrap());
            }
            TrimeshIndices::PerBatch(per_batch)
        }
    };

    Trimesh { vertices, indices }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_index_template_counts_and_layout() {
        let idx = trimesh_indices((3, 4));
        assert_eq!(idx.dim(), (12, 3));
        // First cell, upper-left triangle.
        assert_eq!(idx.row(0).to_vec(), vec![0, 1, 4]);
        // Same cell's lower-right triangle lives in the second half.
        assert_eq!(idx.row(6).to_vec(), vec![5, 1, 4]);
    }

    #[test]
    fn test_degenerate_grids_have_no_triangles() {
        assert_eq!(trimesh_indices((1, 5)).nrows(), 0);
        assert_eq!(trimesh_indices((5, 1)).nrows(), 0);
    }

    #[test]
    fn test_unmasked_mesh_shares_indices() {
        let img = ArrayD::from_shape_fn(IxDyn(&[2, 2, 3]), |ix| ix[2] as f32);
        let mesh = coord_image_to_trimesh(&img, None);
        assert_eq!(mesh.vertices.shape(), &[4, 3]);
        match mesh.indices {
            TrimeshIndices::Shared(idx) => assert_eq!(idx.nrows(), 2),
            TrimeshIndices::PerBatch(_) => panic!("expected shared indices"),
        }
    }

    #[test]
    fn test_invalid_vertex_prunes_incident_triangles() {
        let img = ArrayD::zeros(IxDyn(&[3, 3, 3]));
        let mut mask = ArrayD::from_elem(IxDyn(&[3, 3, 1]), true);
        // Knock out the centre vertex (id 4); it touches 6 of 8 triangles.
        mask[[1, 1, 0]] = false;
        let mesh = coord_image_to_trimesh(&img, Some(&mask));
        match mesh.indices {
            TrimeshIndices::PerBatch(buffers) => {
                assert_eq!(buffers.len(), 1);
                assert_eq!(buffers[0].nrows(), 2);
                for tri in buffers[0].rows() {
                    assert!(tri.iter().all(|&id| id != 4));
                }
            }
            TrimeshIndices::Shared(_) => panic!("expected per-batch indices"),
        }
    }

    #[test]
    fn test_batched_masks_prune_independently() {
        let img = ArrayD::zeros(IxDyn(&[2, 2, 2, 3]));
        let mut mask = ArrayD::from_elem(IxDyn(&[2, 2, 2, 1]), true);
        mask[[1, 0, 0, 0]] = false;
        let mesh = coord_image_to_trimesh(&img, Some(&mask));
        assert_eq!(mesh.vertices.shape(), &[2, 4, 3]);
        match mesh.indices {
            TrimeshIndices::PerBatch(buffers) => {
                assert_eq!(buffers[0].nrows(), 2);
                // Vertex 0 sits in the upper-left triangle only.
                assert_eq!(buffers[1].nrows(), 1);
            }
            TrimeshIndices::Shared(_) => panic!("expected per-batch indices"),
        }
    }
}
