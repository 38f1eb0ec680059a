//! Permute execute path: for axis-aligned index matrices and separable
//! interpolators, per-axis weights are tabulated once per tile and rows
//! are evaluated by table lookup.

use super::{copy_pixel, fill_background, Pass};
use crate::error::{Error, Result};
use crate::image::Scalar;
use crate::matrix::AxisMap;
use crate::slab::RowCompositor;
use crate::stencil::Stencil;

pub(super) fn execute_tile<Out: Scalar>(
    pass: &Pass<'_>,
    tile: &crate::image::Extent,
    mut rows: Vec<&mut [Out]>,
    bg: &[Out],
) -> Result<Option<Stencil>> {
    let nc = pass.num_components;
    let ns = pass.ns;
    let sep = pass.interp.as_separable().ok_or_else(|| {
        Error::InvalidParameter("permute path requires a separable interpolator".into())
    })?;

    // fold the slab into the table: shift the z translation back by half
    // the slab and extend the tabulated z range so sample `s` of output
    // row `z` is table row `z + s`
    let mut m = pass.matrix.matrix;
    let mut ext = *tile;
    if ns > 1 {
        let map = AxisMap::from_matrix(&m).ok_or_else(|| {
            Error::InvalidParameter("permute path requires a permutation matrix".into())
        })?;
        let j = map.in_axis[2];
        m[(j, 3)] -= (ns as i64 / 2) as f64 * map.scale[2];
        ext[5] += ns as i64 - 1;
    }
    let (clip, table) = sep.precompute_weights(&m, &ext)?;
    // only output rows whose whole slab is tabulated in bounds
    let zclip = [clip[4], clip[5] - (ns as i64 - 1)];

    let mut out_stencil = if pass.generate_stencil {
        Some(Stencil::new(pass.output_info.extent)?)
    } else {
        None
    };

    let direct_src: Option<&[Out]> = if pass.direct_lookup {
        Out::slice(pass.input.data())
    } else {
        None
    };

    let width = (clip[1] - clip[0] + 1).max(0) as usize;
    let mut acc = vec![0.0f64; width * nc];
    let mut buf = vec![0.0f64; if ns > 1 { width * nc } else { 0 }];
    let compositor = RowCompositor {
        mode: pass.slab_mode,
        trapezoid: pass.trapezoid,
        n: ns,
    };

    let ny_t = (tile[3] - tile[2] + 1) as usize;
    for (i, row) in rows.iter_mut().enumerate() {
        let z = tile[4] + (i / ny_t) as i64;
        let y = tile[2] + (i % ny_t) as i64;

        let row_in_clip = z >= zclip[0]
            && z <= zclip[1]
            && y >= clip[2]
            && y <= clip[3]
            && clip[0] <= clip[1];
        if !row_in_clip {
            fill_background(row, bg);
            continue;
        }

        // background outside the clipped x range
        let a = ((clip[0] - tile[0]) as usize) * nc;
        fill_background(&mut row[..a], bg);
        let b = ((clip[1] - tile[0] + 1) as usize) * nc;
        fill_background(&mut row[b..], bg);

        let mut cursor = clip[0];
        let spans: Vec<[i64; 2]> = match pass.stencil {
            Some(s) => s.clipped_runs(y, z, clip[0], clip[1]).collect(),
            None => vec![[clip[0], clip[1]]],
        };
        for span in spans {
            if span[0] > cursor {
                let a = ((cursor - tile[0]) as usize) * nc;
                let b = ((span[0] - tile[0]) as usize) * nc;
                fill_background(&mut row[a..b], bg);
            }
            let n = (span[1] - span[0] + 1) as usize;
            let o = ((span[0] - tile[0]) as usize) * nc;

            if let Some(src) = direct_src {
                // type-specialized lookup, no float scratch
                let [sx, sy, sz] = table.support;
                debug_assert_eq!([sx, sy, sz], [1, 1, 1]);
                let oy = table.positions[1][(y - table.extent[2]) as usize * sy];
                let oz = table.positions[2][(z - table.extent[4]) as usize * sz];
                for (k, dst) in row[o..o + n * nc].chunks_exact_mut(nc).enumerate() {
                    let ex = (span[0] - table.extent[0]) as usize + k;
                    let ox = table.positions[0][ex * sx];
                    let offset = (oy + oz + ox) as usize;
                    copy_pixel(dst, &src[offset..offset + nc]);
                }
            } else {
                let acc = &mut acc[..n * nc];
                if ns == 1 {
                    sep.interpolate_row(&table, span[0], y, z, acc);
                } else {
                    for s in 0..ns {
                        let buf = &mut buf[..n * nc];
                        sep.interpolate_row(&table, span[0], y, z + s as i64, buf);
                        compositor.accumulate(acc, buf, s);
                    }
                    compositor.finish(acc);
                }
                pass.converter.convert_row(acc, &mut row[o..o + n * nc]);
            }

            if let Some(st) = out_stencil.as_mut() {
                st.insert_run(span[0], span[1], y, z);
            }
            cursor = span[1] + 1;
        }
        if cursor <= clip[1] {
            let a = ((cursor - tile[0]) as usize) * nc;
            let b = ((clip[1] - tile[0] + 1) as usize) * nc;
            fill_background(&mut row[a..b], bg);
        }
    }
    Ok(out_stencil)
}
