//! # rasterfuse: uncertainty-aware raster fusion primitives
//!
//! This crate fuses many scattered, possibly-duplicate, possibly-uncertain 2D
//! projections of 3D data (depth, color, surface normals, ...) into a single
//! quantized raster image, together with the companion primitives such a
//! pipeline needs:
//!
//! - `core`: shared numeric constants, the scatter-with-reduction primitive,
//!   uniform pixel coordinate grids, and batch-shape plumbing
//! - `render`: the four fusion kernels (projective/omnidirectional, with and
//!   without a depth buffer) and the triangle rasterizer
//! - `filter`: uncertainty-aware image smoothing via depthwise convolution
//! - `omni`: spherical (equirectangular) wrap-around border padding
//! - `mesh`: trimesh extraction from a coordinate image
//!
//! All operations are pure, batch-polymorphic transformations over
//! `ndarray` arrays laid out as `batch_shape + spatial_dims + channels`,
//! where `batch_shape` may be empty. Nothing here performs I/O or keeps
//! state between calls.

// Shared primitives and constants
pub mod core;

// Fusion kernels and rasterization
pub mod render;

// Image smoothing filters
pub mod filter;

// Omni-directional image padding
pub mod omni;

// Trimesh extraction
pub mod mesh;

// Re-export commonly used items at crate root for convenience
pub use crate::core::{uniform_pixel_coords, Reduction, MIN_DENOMINATOR, MIN_DEPTH_DIFF};
pub use crate::filter::{smooth_image_from_var_image, weighted_image_smooth};
pub use crate::mesh::{coord_image_to_trimesh, trimesh_indices, Trimesh, TrimeshIndices};
pub use crate::omni::pad_omni_image;
pub use crate::render::{
    rasterize_triangles, render_pixel_coords, Fill, ModeParseError, RenderMode, RenderOptions,
    Rendered, VarThreshold,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
