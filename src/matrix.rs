//! Builds the combined output-index -> input-index matrix and classifies
//! it so the driver can pick the cheapest execution path.

use std::sync::Arc;

use nalgebra::{Matrix4, Vector4};

use crate::error::Result;
use crate::image::ImageInfo;
use crate::transform::PointTransform;

/// Tolerance for the zero/integer tests used when classifying the matrix.
pub(crate) const MATRIX_TOL: f64 = 1e-12;

fn near(a: f64, b: f64) -> bool {
    (a - b).abs() < MATRIX_TOL
}

fn near_integer(a: f64) -> bool {
    (a - (a + 0.5).floor()).abs() < MATRIX_TOL && a.abs() < i64::MAX as f64
}

/// Structural class of the index matrix.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MatrixClass {
    /// Unit diagonal, no translation: iteration order is the mapping.
    Identity,
    /// Exactly one non-zero per row and column of the upper 3x3 with a
    /// `(0,0,0,1)` bottom row: eligible for the permute path.
    Permutation,
    General,
}

/// What remains to be applied per voxel after the fused matrix.
pub enum Residual {
    /// Everything folded into the matrix.
    Fused,
    /// The point transform is not homogeneous: the fused matrix stops at
    /// world space, then `transform.forward` and `world_to_index` apply.
    Nonlinear {
        transform: Arc<dyn PointTransform>,
        world_to_index: Matrix4<f64>,
    },
}

impl Residual {
    pub fn is_nonlinear(&self) -> bool {
        matches!(self, Residual::Nonlinear { .. })
    }

    /// Map a point produced by the fused matrix to input index space.
    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        match self {
            Residual::Fused => p,
            Residual::Nonlinear {
                transform,
                world_to_index,
            } => {
                let w = transform.forward(p);
                let q = world_to_index * Vector4::new(w[0], w[1], w[2], 1.0);
                [q.x, q.y, q.z]
            }
        }
    }
}

/// Axis mapping of a permutation matrix: for output axis `i`, the input
/// axis it feeds, and the scale/translation along that input axis.
#[derive(Copy, Clone, Debug)]
pub struct AxisMap {
    pub in_axis: [usize; 3],
    pub scale: [f64; 3],
    pub trans: [f64; 3],
}

impl AxisMap {
    /// Extract the axis mapping of a permutation+scale+translation matrix.
    pub(crate) fn from_matrix(m: &Matrix4<f64>) -> Option<AxisMap> {
        let mut map = AxisMap {
            in_axis: [usize::MAX; 3],
            scale: [0.0; 3],
            trans: [0.0; 3],
        };
        let mut row_used = [false; 3];
        for i in 0..3 {
            for j in 0..3 {
                if !near(m[(j, i)], 0.0) {
                    if map.in_axis[i] != usize::MAX || row_used[j] {
                        return None;
                    }
                    map.in_axis[i] = j;
                    map.scale[i] = m[(j, i)];
                    map.trans[i] = m[(j, 3)];
                    row_used[j] = true;
                }
            }
            if map.in_axis[i] == usize::MAX {
                return None;
            }
        }
        if !(m[(3, 0)] == 0.0 && m[(3, 1)] == 0.0 && m[(3, 2)] == 0.0 && m[(3, 3)] == 1.0) {
            return None;
        }
        Some(map)
    }
}

/// The composed output-index -> input-index mapping for one pass.
pub struct IndexMatrix {
    /// Output index -> input index (or -> world when the residual is
    /// nonlinear), homogeneous.
    pub matrix: Matrix4<f64>,
    pub residual: Residual,
    pub class: MatrixClass,
    /// Permutation and nearest-safe classification require a fused matrix.
    pub nearest_safe: bool,
    /// Bottom row differs from `(0,0,0,1)`: divide by w after mapping.
    pub perspective: bool,
}

impl IndexMatrix {
    /// Compose the four stages: output index -> world, reslice axes,
    /// optional homogeneous transform, world -> input index.
    pub fn build(
        input: &ImageInfo,
        output: &ImageInfo,
        reslice_axes: &Matrix4<f64>,
        transform: Option<&Arc<dyn PointTransform>>,
    ) -> Result<IndexMatrix> {
        let to_world = reslice_axes * output.index_to_world();
        let world_to_index = input.world_to_index()?;

        let (matrix, residual) = match transform {
            Some(t) if !t.is_homogeneous() => (
                to_world,
                Residual::Nonlinear {
                    transform: Arc::clone(t),
                    world_to_index,
                },
            ),
            Some(t) => {
                let tm = t.matrix().unwrap_or_else(Matrix4::identity);
                (world_to_index * tm * to_world, Residual::Fused)
            }
            None => (world_to_index * to_world, Residual::Fused),
        };

        let perspective = !(matrix[(3, 0)] == 0.0
            && matrix[(3, 1)] == 0.0
            && matrix[(3, 2)] == 0.0
            && matrix[(3, 3)] == 1.0);

        let (class, nearest_safe) = if residual.is_nonlinear() || perspective {
            (MatrixClass::General, false)
        } else {
            classify(&matrix)
        };

        Ok(IndexMatrix {
            matrix,
            residual,
            class,
            nearest_safe,
            perspective,
        })
    }

    /// Map one output index through the fused matrix and the residual.
    pub fn map(&self, i: f64, j: f64, k: f64) -> [f64; 3] {
        let q = self.matrix * Vector4::new(i, j, k, 1.0);
        let w = if self.perspective && q.w != 0.0 { 1.0 / q.w } else { 1.0 };
        self.residual.apply([q.x * w, q.y * w, q.z * w])
    }

    /// Axis mapping, present when the matrix classifies as a permutation
    /// (or identity).
    pub fn axis_map(&self) -> Option<AxisMap> {
        if self.class == MatrixClass::General {
            return None;
        }
        AxisMap::from_matrix(&self.matrix)
    }
}

fn classify(m: &Matrix4<f64>) -> (MatrixClass, bool) {
    let mut identity = true;
    for i in 0..4 {
        for j in 0..4 {
            let expect = if i == j { 1.0 } else { 0.0 };
            if !near(m[(i, j)], expect) {
                identity = false;
            }
        }
    }
    if identity {
        return (MatrixClass::Identity, true);
    }

    // one non-zero per row and per column of the upper 3x3
    let mut col_count = [0usize; 3];
    let mut row_count = [0usize; 3];
    for i in 0..3 {
        for j in 0..3 {
            if !near(m[(j, i)], 0.0) {
                col_count[i] += 1;
                row_count[j] += 1;
            }
        }
    }
    if col_count != [1, 1, 1] || row_count != [1, 1, 1] {
        return (MatrixClass::General, false);
    }

    let mut nearest_safe = true;
    for i in 0..3 {
        for j in 0..3 {
            if !near(m[(j, i)], 0.0) && !near_integer(m[(j, i)]) {
                nearest_safe = false;
            }
        }
        if !near_integer(m[(i, 3)]) {
            nearest_safe = false;
        }
    }
    (MatrixClass::Permutation, nearest_safe)
}
