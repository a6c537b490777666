//! Shared primitives used by every kernel in the crate:
//! - Numeric guard constants
//! - `scatter_nd`: scatter-with-reduction, the one index-flattening
//!   implementation behind fusion and rasterization
//! - Uniform pixel coordinate grids
//! - Batch-shape flattening/restoring helpers
//!
//! All types here are "pure data" - no rendering logic.

mod batch;
mod grid;
mod scatter;

pub(crate) use batch::{flatten_image, flatten_samples, restore_image};
pub use grid::uniform_pixel_coords;
pub use scatter::{scatter_nd, Reduction};

/// Singularity guard added to every denominator before division.
///
/// Divisions by a variance, a kernel sum or a depth may otherwise hit an
/// exact zero; the guard silently biases the result instead of producing
/// infinities. Documented behavior, not a defect.
pub const MIN_DENOMINATOR: f32 = 1e-12;

/// Minimum depth separation the depth-priority key encoding can resolve.
///
/// Two samples whose depths differ by at least this amount are guaranteed to
/// map to composite keys whose ordering is depth-dominant for every channel;
/// closer samples tie-break by normalized channel magnitude.
pub const MIN_DEPTH_DIFF: f32 = 1e-2;
