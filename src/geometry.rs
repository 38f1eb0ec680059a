//! Output-grid derivation, auto-crop bounds, and the input update-extent
//! pre-pass. The rounding helpers here are the ones the execute paths use,
//! so extent analysis and execution always agree on which voxels a sample
//! touches.

use itertools::iproduct;
use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};

use crate::error::{Error, Result};
use crate::image::{Extent, ImageInfo};
use crate::interp::BorderMode;
use crate::matrix::IndexMatrix;
use crate::transform::PointTransform;

/// Split `x` into floor and fractional part.
pub(crate) fn floor_frac(x: f64) -> (i64, f64) {
    let f = x.floor();
    (f as i64, x - f)
}

/// Round to the nearest index, halves up.
pub(crate) fn round_index(x: f64) -> i64 {
    floor_frac(x + 0.5).0
}

/// The eight integer corners of an extent.
pub(crate) fn extent_corners(e: &Extent) -> impl Iterator<Item = Vector3<f64>> + '_ {
    iproduct!([e[4], e[5]], [e[2], e[3]], [e[0], e[1]])
        .map(|(z, y, x)| Vector3::new(x as f64, y as f64, z as f64))
}

/// User overrides consumed by [`derive_output_info`]. `None` means derive
/// the value from the input geometry.
pub(crate) struct DeriveParams<'a> {
    pub spacing: Option<[f64; 3]>,
    pub origin: Option<[f64; 3]>,
    pub direction: Option<Matrix3<f64>>,
    pub extent: Option<Extent>,
    pub dimensionality: usize,
    pub reslice_axes: Matrix4<f64>,
    pub transform: Option<&'a dyn PointTransform>,
    pub transform_input_sampling: bool,
    pub auto_crop: bool,
}

/// Squared direction-cosine weights of output axis `i` against the input
/// axes, for the rotation `in_dir^T * out_dir * reslice_rot`.
fn axis_weights(rot: &Matrix3<f64>, i: usize) -> ([f64; 3], f64) {
    let mut r = [0.0; 3];
    let mut sum = 0.0;
    for j in 0..3 {
        r[j] = rot[(j, i)] * rot[(j, i)];
        sum += r[j];
    }
    (r, sum)
}

/// Compute the output grid implied by the input geometry and the user
/// parameters: spacing and extent from the direction-cosine-weighted
/// projection onto the input axes, origin from bounding-box centering
/// (or the auto-crop lower corner).
pub(crate) fn derive_output_info(input: &ImageInfo, p: &DeriveParams) -> Result<ImageInfo> {
    let out_dir = p.direction.unwrap_or(input.direction);

    let mut rot = input.direction.transpose() * out_dir;
    if p.transform_input_sampling {
        rot *= p.reslice_axes.fixed_slice::<3, 3>(0, 0).into_owned();
    }

    let e = &input.extent;
    let mut spacing = [0.0; 3];
    let mut extent: Extent = [0; 6];
    for i in 0..3 {
        let (r, sum) = axis_weights(&rot, i);
        spacing[i] = match p.spacing {
            Some(s) => s[i],
            None => {
                let mut s = 0.0;
                for j in 0..3 {
                    s += r[j] * input.spacing[j].abs();
                }
                s / sum
            }
        };

        // linear size of the input projected onto this output axis
        let mut d = 0.0;
        let mut lo = 0.0;
        for j in 0..3 {
            d += r[j] * (e[2 * j + 1] - e[2 * j]) as f64 * input.spacing[j].abs();
            lo += r[j] * e[2 * j] as f64;
        }
        d /= sum * sum.sqrt();

        let e0 = round_index(lo / sum);
        extent[2 * i] = e0;
        extent[2 * i + 1] = e0 + round_index(d / spacing[i].abs());
    }

    if let Some(user) = p.extent {
        extent = user;
    }
    for i in p.dimensionality..3 {
        extent[2 * i] = 0;
        extent[2 * i + 1] = 0;
    }

    let bounds = if p.auto_crop {
        Some(autocrop_bounds(input, &out_dir, &p.reslice_axes, p.transform)?)
    } else {
        None
    };
    if let (Some(b), None) = (&bounds, p.extent) {
        for i in 0..p.dimensionality.min(3) {
            extent[2 * i] = 0;
            extent[2 * i + 1] = round_index((b[2 * i + 1] - b[2 * i]) / spacing[i].abs());
        }
    }

    let origin = match p.origin {
        Some(o) => o,
        None => {
            // coordinates of the origin in the output direction frame
            let mut od: Vector3<f64> = if let Some(b) = &bounds {
                let lower = Vector3::new(b[0], b[2], b[4]);
                let mut od = lower;
                for i in 0..3 {
                    od[i] -= spacing[i] * extent[2 * i] as f64;
                }
                od
            } else {
                // place the center of the input bounding box at the center
                // of the output extent
                let center = Vector3::new(
                    0.5 * (e[0] + e[1]) as f64,
                    0.5 * (e[2] + e[3]) as f64,
                    0.5 * (e[4] + e[5]) as f64,
                );
                let c_world = apply_point(&input.index_to_world(), &center);
                let c_world = match p.transform {
                    Some(t) => {
                        let q = t.inverse([c_world.x, c_world.y, c_world.z]);
                        Vector3::new(q[0], q[1], q[2])
                    }
                    None => c_world,
                };
                let inv_axes = p.reslice_axes.try_inverse().ok_or(Error::SingularMatrix)?;
                let q = apply_point(&inv_axes, &c_world);
                let mut od = out_dir.transpose() * q;
                for i in 0..3 {
                    od[i] -= spacing[i] * 0.5 * (extent[2 * i] + extent[2 * i + 1]) as f64;
                }
                od
            };
            for i in p.dimensionality..3 {
                od[i] = 0.0;
            }
            let o = out_dir * od;
            [o.x, o.y, o.z]
        }
    };

    Ok(ImageInfo {
        extent,
        spacing,
        origin,
        direction: out_dir,
    })
}

fn apply_point(m: &Matrix4<f64>, p: &Vector3<f64>) -> Vector3<f64> {
    let q = m * Vector4::new(p.x, p.y, p.z, 1.0);
    let w = if q.w != 0.0 { 1.0 / q.w } else { 1.0 };
    Vector3::new(q.x * w, q.y * w, q.z * w)
}

/// Bounding box of the input volume mapped into the output frame,
/// expressed along the output direction axes.
pub(crate) fn autocrop_bounds(
    input: &ImageInfo,
    out_dir: &Matrix3<f64>,
    reslice_axes: &Matrix4<f64>,
    transform: Option<&dyn PointTransform>,
) -> Result<[f64; 6]> {
    let inv_axes = reslice_axes.try_inverse().ok_or(Error::SingularMatrix)?;
    let to_world = input.index_to_world();
    let mut bounds = [f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY];
    for corner in extent_corners(&input.extent) {
        let mut w = apply_point(&to_world, &corner);
        if let Some(t) = transform {
            let q = t.inverse([w.x, w.y, w.z]);
            w = Vector3::new(q[0], q[1], q[2]);
        }
        let q = apply_point(&inv_axes, &w);
        let b = out_dir.transpose() * q;
        for i in 0..3 {
            bounds[2 * i] = bounds[2 * i].min(b[i]);
            bounds[2 * i + 1] = bounds[2 * i + 1].max(b[i]);
        }
    }
    Ok(bounds)
}

/// The input sub-extent a pass over `output_request` will sample, given
/// the per-axis kernel support. Returns the clipped extent and whether
/// any sample can land inside the input at all.
pub(crate) fn input_update_extent(
    input_whole: &Extent,
    output_request: &Extent,
    matrix: &IndexMatrix,
    support: [usize; 3],
    border_mode: BorderMode,
) -> (Extent, bool) {
    // a nonlinear warp can send any output voxel anywhere
    if matrix.residual.is_nonlinear() {
        return (*input_whole, true);
    }

    let mut lo = [i64::MAX; 3];
    let mut hi = [i64::MIN; 3];
    for corner in extent_corners(output_request) {
        let p = matrix.map(corner.x, corner.y, corner.z);
        for j in 0..3 {
            let k = support[j].max(1) as i64;
            let (a, b) = if k % 2 == 1 {
                let c = round_index(p[j]);
                (c - (k - 1) / 2, c + (k - 1) / 2)
            } else {
                // the upper tap stays included when the fraction is zero
                let (f, _) = floor_frac(p[j]);
                (f - (k / 2 - 1), f + k / 2)
            };
            lo[j] = lo[j].min(a);
            hi[j] = hi[j].max(b);
        }
    }

    let mut hit = true;
    let mut update: Extent = [0; 6];
    for j in 0..3 {
        let (wl, wh) = (input_whole[2 * j], input_whole[2 * j + 1]);
        if matches!(border_mode, BorderMode::Repeat | BorderMode::Mirror) {
            update[2 * j] = wl;
            update[2 * j + 1] = wh;
            continue;
        }
        let (mut a, mut b) = (lo[j].max(wl), hi[j].min(wh));
        if a > b {
            hit = false;
            // keep a degenerate, non-inverted extent
            let edge = if hi[j] < wl { wl } else { wh };
            a = edge;
            b = edge;
        }
        update[2 * j] = a;
        update[2 * j + 1] = b;
    }
    (update, hit)
}
