//! This library reslices 3d scalar images: it resamples a voxel volume
//! onto a new grid whose pose, spacing, direction cosines, extent and
//! dimensionality may all differ from those of the input.
//!
//! The mapping from output voxels to input voxels composes the output
//! index-to-world transform, a rigid "reslice axes" placement, an
//! optional (possibly nonlinear) point transform, and the input
//! world-to-index transform. Sampling goes through a pluggable
//! interpolation kernel, optionally composites a slab of parallel
//! samples, converts to the output scalar kind, and falls back to a
//! configurable background color outside the input.
//!
//! [`Reslice`] is the full-surface filter; [`resample_to_output`] and
//! [`resample_from_to`] are shortcuts for the common axis-aligned cases.

mod convert;
mod error;
mod exec;
mod geometry;
pub mod image;
pub mod interp;
mod matrix;
mod reslice;
pub mod stencil;
pub mod transform;
mod slab;

pub use error::{Error, Result};
pub use exec::SplitMode;
pub use image::{Extent, Image, ImageInfo, Scalar, ScalarKind, VoxelData};
pub use interp::{
    BorderMode, InterpolationMode, Interpolator, InterpolatorFactory, NearestNeighbor,
    SeparableInterpolator, TriCubic, TriLinear, WeightsTable,
};
pub use matrix::{AxisMap, IndexMatrix, MatrixClass, Residual};
pub use reslice::{resample_from_to, resample_to_output, Reslice, ResliceOutput};
pub use slab::SlabMode;
pub use stencil::Stencil;
pub use transform::{MatrixTransform, PointTransform};
