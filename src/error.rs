use std::collections::TryReserveError;

use thiserror::Error;

use crate::image::ScalarKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("image has {0} components, expected {1}")]
    MismatchedComponents(usize, usize),
    #[error("no valid matrix inverse found")]
    SingularMatrix,
    #[error("voxel buffer length {0} does not match extent ({1} voxels x {2} components)")]
    BufferLength(usize, usize, usize),
    #[error("inverted extent [{0}, {1}] on axis {2}")]
    InvertedExtent(i64, i64, usize),
    #[error("scalar kind {0:?} not usable here: {1}")]
    UnsupportedScalarType(ScalarKind, String),
    #[error("out of memory: {0}")]
    OutOfMemory(#[from] TryReserveError),
}
