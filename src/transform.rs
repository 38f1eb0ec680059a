//! Point transforms mapping world-space positions, applied between the
//! reslice axes and the input grid. Homogeneous transforms fold into the
//! index matrix; anything else is applied per voxel.

use nalgebra::{Matrix4, Vector4};

use crate::error::{Error, Result};
use crate::image::next_mtime;

/// An arbitrary (possibly nonlinear) warp of world-space points.
///
/// Implementations that are affine should report `is_homogeneous` and
/// expose their matrix, which lets the engine fold them into the
/// index matrix instead of calling `forward` for every voxel.
pub trait PointTransform: Send + Sync {
    fn forward(&self, p: [f64; 3]) -> [f64; 3];
    fn inverse(&self, p: [f64; 3]) -> [f64; 3];

    fn is_homogeneous(&self) -> bool {
        false
    }

    /// The 4x4 matrix of a homogeneous transform.
    fn matrix(&self) -> Option<Matrix4<f64>> {
        None
    }

    fn mtime(&self) -> u64 {
        0
    }
}

/// A matrix-backed homogeneous transform.
pub struct MatrixTransform {
    matrix: Matrix4<f64>,
    inverse: Matrix4<f64>,
    mtime: u64,
}

impl MatrixTransform {
    pub fn new(matrix: Matrix4<f64>) -> Result<MatrixTransform> {
        let inverse = matrix.try_inverse().ok_or(Error::SingularMatrix)?;
        Ok(MatrixTransform {
            matrix,
            inverse,
            mtime: next_mtime(),
        })
    }
}

fn apply_homogeneous(m: &Matrix4<f64>, p: [f64; 3]) -> [f64; 3] {
    let q = m * Vector4::new(p[0], p[1], p[2], 1.0);
    let w = if q.w != 0.0 { 1.0 / q.w } else { 1.0 };
    [q.x * w, q.y * w, q.z * w]
}

impl PointTransform for MatrixTransform {
    fn forward(&self, p: [f64; 3]) -> [f64; 3] {
        apply_homogeneous(&self.matrix, p)
    }

    fn inverse(&self, p: [f64; 3]) -> [f64; 3] {
        apply_homogeneous(&self.inverse, p)
    }

    fn is_homogeneous(&self) -> bool {
        true
    }

    fn matrix(&self) -> Option<Matrix4<f64>> {
        Some(self.matrix)
    }

    fn mtime(&self) -> u64 {
        self.mtime
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_matrix_transform_roundtrip() {
        let mut m = Matrix4::identity();
        m[(0, 3)] = 4.0;
        m[(1, 1)] = 2.0;
        let t = MatrixTransform::new(m).unwrap();
        let p = t.forward([1.0, 3.0, -2.0]);
        assert_relative_eq!(p[0], 5.0);
        assert_relative_eq!(p[1], 6.0);
        assert_relative_eq!(p[2], -2.0);
        let q = t.inverse(p);
        assert_relative_eq!(q[0], 1.0);
        assert_relative_eq!(q[1], 3.0);
        assert_relative_eq!(q[2], -2.0);
        assert!(t.is_homogeneous());
    }

    #[test]
    fn test_singular_matrix_rejected() {
        let m = Matrix4::zeros();
        assert!(MatrixTransform::new(m).is_err());
    }
}
