//! Fusion rendering pipeline (CPU implementation).
//!
//! This module quantizes scattered, uncertain pixel-coordinate samples into
//! raster images:
//! - Validity filtering + index building (variance ceiling, bounds/wrap)
//! - Precision-weighted accumulate-and-average fusion (no depth buffer)
//! - Depth-priority composite-key fusion (with depth buffer)
//! - Edge-function triangle rasterization
//!
//! Two topologies exist, `projective` (out-of-bounds samples are discarded,
//! channel 0 is depth, locations arrive homogeneous) and `omnidirectional`
//! (locations wrap modulo the image dimensions), each with and without a
//! depth buffer: exactly four fusion kernels.

mod depth_buffer;
mod fuse;
mod raster;
mod validity;

pub use raster::rasterize_triangles;

use crate::core::{flatten_image, flatten_samples, restore_image, uniform_pixel_coords};
use ndarray::{concatenate, Array1, Array4, ArrayD, Axis};
use std::str::FromStr;
use thiserror::Error;

/// The two supported image topologies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderMode {
    /// Pinhole-style images: samples falling outside the image are dropped,
    /// channel 0 is depth and the 2D locations arrive pre-multiplied by it.
    Projective,
    /// Spherical/equirectangular images: locations wrap modulo the image
    /// dimensions and all channels are fused uniformly (channel 0 still acts
    /// as the priority key when the depth buffer is on).
    Omnidirectional,
}

/// Error for unrecognized render mode tags.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid render mode {0:?}: mode must be one of [proj|omni]")]
pub struct ModeParseError(String);

impl FromStr for RenderMode {
    type Err = ModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proj" | "projective" => Ok(RenderMode::Projective),
            "omni" | "omnidirectional" => Ok(RenderMode::Omnidirectional),
            other => Err(ModeParseError(other.to_string())),
        }
    }
}

/// A scalar broadcast or a pre-built array: several pipeline inputs accept
/// either form so callers can omit per-pixel detail.
#[derive(Clone, Debug)]
pub enum Fill {
    Value(f32),
    Array(ArrayD<f32>),
}

impl From<f32> for Fill {
    fn from(v: f32) -> Self {
        Fill::Value(v)
    }
}

impl From<ArrayD<f32>> for Fill {
    fn from(a: ArrayD<f32>) -> Self {
        Fill::Array(a)
    }
}

impl Fill {
    /// Materialize as a flattened `[B, H, W, C]` image.
    fn image(&self, batch_shape: &[usize], dims: (usize, usize, usize)) -> Array4<f32> {
        let b: usize = batch_shape.iter().product();
        let (h, w, c) = dims;
        match self {
            Fill::Value(v) => Array4::from_elem((b, h, w, c), *v),
            Fill::Array(a) => {
                let (img, batch) = flatten_image(a);
                assert_eq!(batch, batch_shape, "image batch shape mismatch");
                assert_eq!(img.dim(), (b, h, w, c), "image dims mismatch");
                img
            }
        }
    }

    /// Materialize as a flattened `[B, N, C]` sample tensor.
    fn samples(&self, batch_shape: &[usize], n: usize, c: usize) -> ndarray::Array3<f32> {
        let b: usize = batch_shape.iter().product();
        match self {
            Fill::Value(v) => ndarray::Array3::from_elem((b, n, c), *v),
            Fill::Array(a) => {
                let (s, batch) = flatten_samples(a);
                assert_eq!(batch, batch_shape, "sample batch shape mismatch");
                assert_eq!(s.dim(), (b, n, c), "sample dims mismatch");
                s
            }
        }
    }
}

/// Per-channel variance threshold pair.
///
/// A sample is invalid if ANY channel variance reaches the ceiling; the
/// floor is clamped onto fused output variance so fused confidence cannot
/// run away.
#[derive(Clone, Debug)]
pub enum VarThreshold {
    Uniform { floor: f32, ceiling: f32 },
    PerChannel { floor: Array1<f32>, ceiling: Array1<f32> },
}

impl Default for VarThreshold {
    fn default() -> Self {
        VarThreshold::Uniform {
            floor: 1e-3,
            ceiling: 1e12,
        }
    }
}

impl VarThreshold {
    fn resolve(&self, channels: usize) -> (Array1<f32>, Array1<f32>) {
        match self {
            VarThreshold::Uniform { floor, ceiling } => (
                Array1::from_elem(channels, *floor),
                Array1::from_elem(channels, *ceiling),
            ),
            VarThreshold::PerChannel { floor, ceiling } => {
                assert_eq!(floor.len(), channels, "threshold floor channel mismatch");
                assert_eq!(ceiling.len(), channels, "threshold ceiling channel mismatch");
                (floor.clone(), ceiling.clone())
            }
        }
    }
}

/// Options for [`render_pixel_coords`]. The defaults mirror the classic
/// pipeline: per-sample variance `1e-3`, prior variance `1e12`, threshold
/// `(1e-3, 1e12)`, no depth buffer, projective topology.
#[derive(Clone, Debug)]
pub struct RenderOptions {
    pub mode: RenderMode,
    pub with_depth_buffer: bool,
    /// Per-sample channel variance, scalar or `batch + [N, C]`.
    pub sample_var: Fill,
    /// Prior variance image, scalar or `batch + [H, W, C]`.
    pub prior_var: Fill,
    pub var_threshold: VarThreshold,
    /// Homogeneous pixel grid `batch + [H, W, 3]`; built on demand if absent.
    pub uniform_pixel_coords: Option<ArrayD<f32>>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            mode: RenderMode::Projective,
            with_depth_buffer: false,
            sample_var: Fill::Value(1e-3),
            prior_var: Fill::Value(1e12),
            var_threshold: VarThreshold::default(),
            uniform_pixel_coords: None,
        }
    }
}

/// Output of [`render_pixel_coords`].
#[derive(Clone, Debug)]
pub struct Rendered {
    /// Fused coordinate + channel image: `batch + [H, W, 3 + D]` in
    /// projective mode (homogeneous pixel coordinates reconstructed from
    /// fused depth), `batch + [H, W, 2 + D]` in omnidirectional mode.
    pub coords: ArrayD<f32>,
    /// Fused per-channel variance image, `batch + [H, W, C]`.
    pub variance: ArrayD<f32>,
    /// `batch + [H, W, 1]`: contribution counter without a depth buffer,
    /// 0/1 validity with one.
    pub coverage: ArrayD<f32>,
}

/// Everything a fusion kernel needs, flattened to a single batch axis.
pub(crate) struct FusionInputs {
    /// `[B, N, 2 + C]`: 2D location channels then `C` value channels.
    pub samples: ndarray::Array3<f32>,
    /// `[B, N, C]`
    pub sample_var: ndarray::Array3<f32>,
    /// `[B, H, W, C]`
    pub prior: Array4<f32>,
    /// `[B, H, W, C]`
    pub prior_var: Array4<f32>,
    /// `[B, H, W, 3]`
    pub uniform: Array4<f32>,
    /// Per-channel threshold floor/ceiling, length `C`.
    pub floor: Array1<f32>,
    pub ceiling: Array1<f32>,
    pub image_dims: (usize, usize),
}

/// Quantize scattered pixel-coordinate samples into a raster image.
///
/// `pixel_coords` is `batch + [N, 2 + C]`: per sample a 2D projected
/// location followed by `C` value channels (projective mode: `C = 1 + D`
/// with channel 0 = depth and the location pre-multiplied by it). `prior`
/// fills pixels where no valid sample lands, `batch + [H, W, C]` or a
/// scalar. Duplicate samples landing on one pixel are precision-weighted
/// mean-averaged, or resolved to the nearest-depth sample when
/// `with_depth_buffer` is set.
pub fn render_pixel_coords(
    pixel_coords: &ArrayD<f32>,
    prior: &Fill,
    final_image_dims: (usize, usize),
    options: &RenderOptions,
) -> Rendered {
    let (samples, batch_shape) = flatten_samples(pixel_coords);
    let (b, n, total_c) = samples.dim();
    assert!(
        total_c >= 3,
        "pixel_coords needs at least one value channel after the 2D location"
    );
    let c = total_c - 2;
    let (h, w) = final_image_dims;

    let prior_img = prior.image(&batch_shape, (h, w, c));
    let prior_var = options.prior_var.image(&batch_shape, (h, w, c));
    let sample_var = options.sample_var.samples(&batch_shape, n, c);
    let (floor, ceiling) = options.var_threshold.resolve(c);

    let uniform = match &options.uniform_pixel_coords {
        Some(grid) => {
            let (g, batch) = flatten_image(grid);
            assert_eq!(batch, batch_shape, "uniform grid batch shape mismatch");
            assert_eq!(g.dim(), (b, h, w, 3), "uniform grid dims mismatch");
            g
        }
        None => {
            let (g, _) = flatten_image(&uniform_pixel_coords((h, w), &batch_shape));
            g
        }
    };

    let inputs = FusionInputs {
        samples,
        sample_var,
        prior: prior_img,
        prior_var,
        uniform,
        floor,
        ceiling,
        image_dims: (h, w),
    };

    let (coords, variance, coverage) = match (options.mode, options.with_depth_buffer) {
        (RenderMode::Projective, false) => fuse::render_projective(&inputs),
        (RenderMode::Projective, true) => depth_buffer::render_projective(&inputs),
        (RenderMode::Omnidirectional, false) => fuse::render_omni(&inputs),
        (RenderMode::Omnidirectional, true) => depth_buffer::render_omni(&inputs),
    };

    Rendered {
        coords: restore_image(coords, &batch_shape),
        variance: restore_image(variance, &batch_shape),
        coverage: restore_image(coverage, &batch_shape),
    }
}

/// Fallback when not a single sample validates: the prior behind the uniform
/// xy grid, the prior variance, and an all-zero coverage image.
pub(crate) fn prior_fallback(inputs: &FusionInputs) -> (Array4<f32>, Array4<f32>, Array4<f32>) {
    let (b, h, w, _) = inputs.prior.dim();
    log::debug!("no valid samples landed; returning prior image");
    let uniform_xy = inputs.uniform.slice(ndarray::s![.., .., .., 0..2]);
    let coords = concatenate(Axis(3), &[uniform_xy, inputs.prior.view()]).unwrap();
    let coverage = Array4::zeros((b, h, w, 1));
    (coords, inputs.prior_var.clone(), coverage)
}

/// Projective coordinate assembly: homogeneous pixel coordinates from fused
/// depth (`uniform * depth`), then the non-depth channels.
pub(crate) fn assemble_projective_coords(
    mean: &Array4<f32>,
    uniform: &Array4<f32>,
) -> Array4<f32> {
    let (b, h, w, c) = mean.dim();
    let mut coords = Array4::zeros((b, h, w, 2 + c));
    for bi in 0..b {
        for y in 0..h {
            for x in 0..w {
                let depth = mean[[bi, y, x, 0]];
                for k in 0..3 {
                    coords[[bi, y, x, k]] = uniform[[bi, y, x, k]] * depth;
                }
                for ci in 1..c {
                    coords[[bi, y, x, 2 + ci]] = mean[[bi, y, x, ci]];
                }
            }
        }
    }
    coords
}

/// Omnidirectional coordinate assembly: the uniform xy grid ahead of all
/// fused channels.
pub(crate) fn assemble_omni_coords(mean: &Array4<f32>, uniform: &Array4<f32>) -> Array4<f32> {
    let uniform_xy = uniform.slice(ndarray::s![.., .., .., 0..2]);
    concatenate(Axis(3), &[uniform_xy, mean.view()]).unwrap()
}
