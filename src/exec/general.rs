//! General execute path: full per-voxel mapping through the index matrix
//! (projective if needed), optional nonlinear residual, slab sampling and
//! compositing, conversion, stencil gating and background fill. Handles
//! every interpolation and border mode.

use nalgebra::Vector4;

use super::{copy_pixel, fill_background, Pass};
use crate::error::Result;
use crate::image::Scalar;
use crate::slab::composite;
use crate::stencil::Stencil;

/// Bounds state while walking a row: emits background for runs of misses
/// and stencil runs for runs of hits, each exactly once.
#[derive(Copy, Clone, PartialEq)]
enum RowState {
    Initial,
    WasIn,
    WasOut,
}

pub(super) fn execute_tile<Out: Scalar>(
    pass: &Pass<'_>,
    tile: &crate::image::Extent,
    mut rows: Vec<&mut [Out]>,
    bg: &[Out],
) -> Result<Option<Stencil>> {
    let nc = pass.num_components;
    let ns = pass.ns;
    let m = &pass.matrix.matrix;
    let col_x = m.column(0).into_owned();
    let col_z = m.column(2).into_owned();
    let perspective = pass.matrix.perspective;

    let mut samples = vec![0.0f64; ns * nc];
    let mut pixel = vec![0.0f64; nc];
    let mut out_stencil = if pass.generate_stencil {
        Some(Stencil::new(pass.output_info.extent)?)
    } else {
        None
    };

    // nearest same-type fast sub-path reads the input directly
    let direct_src: Option<&[Out]> = if pass.direct_copy {
        Out::slice(pass.input.data())
    } else {
        None
    };
    let in_ext = pass.input.info().extent;
    let [in_nx, in_ny, _] = pass.input.info().dims();

    let ny_t = (tile[3] - tile[2] + 1) as usize;
    for (i, row) in rows.iter_mut().enumerate() {
        let z = tile[4] + (i / ny_t) as i64;
        let y = tile[2] + (i % ny_t) as i64;
        let p_yz = m * Vector4::new(0.0, y as f64, z as f64, 1.0);

        let mut cursor = tile[0];
        let spans: Vec<[i64; 2]> = match pass.stencil {
            Some(s) => s.clipped_runs(y, z, tile[0], tile[1]).collect(),
            None => vec![[tile[0], tile[1]]],
        };
        for span in spans {
            if span[0] > cursor {
                let a = ((cursor - tile[0]) as usize) * nc;
                let b = ((span[0] - tile[0]) as usize) * nc;
                fill_background(&mut row[a..b], bg);
            }
            let mut state = RowState::Initial;
            let mut seg_start = span[0];
            for x in span[0]..=span[1] {
                let p = p_yz + x as f64 * col_x;

                let hit = if let Some(src) = direct_src {
                    nearest_copy(pass, src, &p, &in_ext, in_nx, in_ny, {
                        let o = ((x - tile[0]) as usize) * nc;
                        &mut row[o..o + nc]
                    })
                } else {
                    let mut count = 0usize;
                    for s in 0..ns {
                        let off = (s as f64 - 0.5 * (ns - 1) as f64) * pass.slab_spacing;
                        let q = p + off * col_z;
                        let w = if perspective && q.w != 0.0 { 1.0 / q.w } else { 1.0 };
                        let pt = pass.matrix.residual.apply([q.x * w, q.y * w, q.z * w]);
                        if pass.interp.check_bounds(pt)
                            && pass
                                .interp
                                .interpolate(pt, &mut samples[count * nc..(count + 1) * nc])
                        {
                            count += 1;
                        }
                    }
                    if count > 0 {
                        composite(pass.slab_mode, pass.trapezoid, &samples, nc, count, &mut pixel);
                        let o = ((x - tile[0]) as usize) * nc;
                        for (c, v) in pixel.iter().enumerate() {
                            row[o + c] = pass.converter.convert(*v);
                        }
                        true
                    } else {
                        false
                    }
                };

                // emit the finished segment on each in/out transition
                match (state, hit) {
                    (RowState::Initial, _) => {
                        state = if hit { RowState::WasIn } else { RowState::WasOut };
                        seg_start = x;
                    }
                    (RowState::WasIn, false) => {
                        if let Some(st) = out_stencil.as_mut() {
                            st.insert_run(seg_start, x - 1, y, z);
                        }
                        state = RowState::WasOut;
                        seg_start = x;
                    }
                    (RowState::WasOut, true) => {
                        let a = ((seg_start - tile[0]) as usize) * nc;
                        let b = ((x - tile[0]) as usize) * nc;
                        fill_background(&mut row[a..b], bg);
                        state = RowState::WasIn;
                        seg_start = x;
                    }
                    _ => {}
                }
            }
            match state {
                RowState::WasIn => {
                    if let Some(st) = out_stencil.as_mut() {
                        st.insert_run(seg_start, span[1], y, z);
                    }
                }
                RowState::WasOut => {
                    let a = ((seg_start - tile[0]) as usize) * nc;
                    let b = ((span[1] - tile[0] + 1) as usize) * nc;
                    fill_background(&mut row[a..b], bg);
                }
                RowState::Initial => {}
            }
            cursor = span[1] + 1;
        }
        if cursor <= tile[1] {
            let a = ((cursor - tile[0]) as usize) * nc;
            fill_background(&mut row[a..], bg);
        }
    }
    Ok(out_stencil)
}

/// Copy the nearest input voxel without conversion. Preconditions: clamp
/// border, fused matrix, no perspective, matching scalar kinds, no slab.
#[inline]
fn nearest_copy<Out: Scalar>(
    pass: &Pass<'_>,
    src: &[Out],
    p: &Vector4<f64>,
    in_ext: &crate::image::Extent,
    in_nx: usize,
    in_ny: usize,
    dst: &mut [Out],
) -> bool {
    let pt = [p.x, p.y, p.z];
    if !pass.interp.check_bounds(pt) {
        return false;
    }
    let ix = crate::geometry::round_index(pt[0]).clamp(in_ext[0], in_ext[1]);
    let iy = crate::geometry::round_index(pt[1]).clamp(in_ext[2], in_ext[3]);
    let iz = crate::geometry::round_index(pt[2]).clamp(in_ext[4], in_ext[5]);
    let offset = (((iz - in_ext[4]) as usize * in_ny + (iy - in_ext[2]) as usize) * in_nx
        + (ix - in_ext[0]) as usize)
        * dst.len();
    copy_pixel(dst, &src[offset..offset + dst.len()]);
    true
}
