//! Tile driver: splits the output extent across worker threads, hands
//! each tile disjoint row slices of the output buffer, and dispatches to
//! the general or permute execute path.

mod general;
mod permute;

use log::warn;
use rayon::prelude::*;

use crate::convert::Converter;
use crate::error::Result;
use crate::image::{Extent, Image, ImageInfo, Scalar};
use crate::interp::Interpolator;
use crate::matrix::IndexMatrix;
use crate::slab::SlabMode;
use crate::stencil::Stencil;

/// How the output extent is decomposed into tiles.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum SplitMode {
    /// Split along z only.
    #[default]
    Slice,
    /// Split along z, then y.
    Beam,
    /// Split along z, y and x. Downgraded to `Beam` while a stencil
    /// output is generated, because run insertion must not split rows.
    Block,
}

/// Everything shared read-only across the tiles of one pass.
pub(crate) struct Pass<'a> {
    pub input: &'a Image,
    pub output_info: &'a ImageInfo,
    pub num_components: usize,
    pub matrix: &'a IndexMatrix,
    pub interp: &'a (dyn Interpolator + 'a),
    pub stencil: Option<&'a Stencil>,
    /// Background color, one value per component.
    pub background: &'a [f64],
    pub converter: Converter,
    pub ns: usize,
    pub slab_mode: SlabMode,
    pub trapezoid: bool,
    /// Inter-sample slab spacing in output z index units.
    pub slab_spacing: f64,
    /// False when no sampled position can land inside the input.
    pub hit: bool,
    pub use_permute: bool,
    /// Nearest same-type copy: no conversion, no residual, clamp border.
    pub direct_copy: bool,
    /// Permute-path table lookup without float scratch: nearest, same
    /// scalar kind, no conversion, single slab sample.
    pub direct_lookup: bool,
    pub generate_stencil: bool,
    pub split_mode: SplitMode,
}

/// Split `extent` into at most `pieces` tiles along z, then y, then
/// (for `Block`) x.
pub(crate) fn split_extent(
    extent: &Extent,
    pieces: usize,
    mode: SplitMode,
    no_split_x: bool,
) -> Vec<Extent> {
    let mode = if no_split_x && mode == SplitMode::Block {
        warn!("block splitting cannot be used while generating a stencil output, using beam splitting");
        SplitMode::Beam
    } else {
        mode
    };

    let [nx, ny, nz] = crate::image::extent_dims(extent);
    let pieces = pieces.max(1);
    let nsplit_z = pieces.min(nz.max(1));
    let mut nsplit_y = 1;
    let mut nsplit_x = 1;
    if mode != SplitMode::Slice && nsplit_z < pieces {
        nsplit_y = (pieces / nsplit_z).min(ny.max(1));
        if mode == SplitMode::Block && nsplit_z * nsplit_y < pieces {
            nsplit_x = (pieces / (nsplit_z * nsplit_y)).min(nx.max(1));
        }
    }

    let ranges = |lo: i64, n: usize, k: usize| -> Vec<[i64; 2]> {
        (0..k)
            .map(|i| {
                let a = lo + (n * i / k) as i64;
                let b = lo + (n * (i + 1) / k) as i64 - 1;
                [a, b]
            })
            .collect()
    };

    let zs = ranges(extent[4], nz, nsplit_z);
    let ys = ranges(extent[2], ny, nsplit_y);
    let xs = ranges(extent[0], nx, nsplit_x);
    let mut tiles = Vec::with_capacity(zs.len() * ys.len() * xs.len());
    for z in &zs {
        for y in &ys {
            for x in &xs {
                tiles.push([x[0], x[1], y[0], y[1], z[0], z[1]]);
            }
        }
    }
    tiles
}

/// Carve the output buffer into per-tile lists of row slices. Tiles form
/// a partition of the extent, so every scalar lands in exactly one list.
fn partition_rows<'o, T: Scalar>(
    mut buf: &'o mut [T],
    extent: &Extent,
    nc: usize,
    tiles: &[Extent],
) -> Vec<Vec<&'o mut [T]>> {
    let [nx, _, _] = crate::image::extent_dims(extent);
    let mut parts: Vec<Vec<&'o mut [T]>> = tiles.iter().map(|_| Vec::new()).collect();
    for z in extent[4]..=extent[5] {
        for y in extent[2]..=extent[3] {
            let (mut row, rest) = std::mem::take(&mut buf).split_at_mut(nx * nc);
            buf = rest;
            let mut ids: Vec<usize> = tiles
                .iter()
                .enumerate()
                .filter(|(_, t)| y >= t[2] && y <= t[3] && z >= t[4] && z <= t[5])
                .map(|(i, _)| i)
                .collect();
            ids.sort_by_key(|&i| tiles[i][0]);
            for id in ids {
                let t = &tiles[id];
                let len = ((t[1] - t[0] + 1) as usize) * nc;
                let (piece, rest_row) = std::mem::take(&mut row).split_at_mut(len);
                row = rest_row;
                parts[id].push(piece);
            }
        }
    }
    parts
}

/// Write the background pixel over every voxel of `slice`.
pub(crate) fn fill_background<T: Scalar>(slice: &mut [T], bg: &[T]) {
    for chunk in slice.chunks_exact_mut(bg.len()) {
        chunk.copy_from_slice(bg);
    }
}

/// Component-count-specialized pixel copy for the nearest same-type
/// paths; constant sizes let the compiler fold the copy.
#[inline]
pub(super) fn copy_pixel<T: Copy>(dst: &mut [T], src: &[T]) {
    match dst.len() {
        1 => dst[0] = src[0],
        2 => {
            dst[0] = src[0];
            dst[1] = src[1];
        }
        3 => {
            dst[0] = src[0];
            dst[1] = src[1];
            dst[2] = src[2];
        }
        4 => dst[..4].copy_from_slice(&src[..4]),
        _ => dst.copy_from_slice(src),
    }
}

/// Run one pass over the whole output extent, in parallel over tiles.
/// Returns the generated stencil when requested.
pub(crate) fn run<Out: Scalar>(
    pass: &Pass<'_>,
    out: &mut [Out],
) -> Result<Option<Stencil>> {
    let out_extent = pass.output_info.extent;
    let nc = pass.num_components;

    // background converted once per pass (clamped, but never rescaled)
    let bg_conv = Converter::new(Out::KIND, 0.0, 1.0, true);
    let bg: Vec<Out> = pass.background.iter().map(|&v| bg_conv.convert(v)).collect();

    let tiles = split_extent(
        &out_extent,
        rayon::current_num_threads(),
        pass.split_mode,
        pass.generate_stencil,
    );
    let parts = partition_rows(out, &out_extent, nc, &tiles);

    let results: Vec<Result<Option<Stencil>>> = tiles
        .par_iter()
        .zip(parts)
        .enumerate()
        .map(|(thread_id, (tile, rows))| execute_tile(pass, tile, rows, &bg, thread_id))
        .collect();

    let mut generated = if pass.generate_stencil {
        Some(Stencil::new(out_extent)?)
    } else {
        None
    };
    for r in results {
        if let (Some(g), Some(s)) = (generated.as_mut(), r?) {
            g.absorb(s);
        }
    }
    Ok(generated)
}

/// Execute one tile: entirely-miss tiles fill with background, the rest
/// dispatch to the permute or general path.
fn execute_tile<Out: Scalar>(
    pass: &Pass<'_>,
    tile: &Extent,
    mut rows: Vec<&mut [Out]>,
    bg: &[Out],
    _thread_id: usize,
) -> Result<Option<Stencil>> {
    if !pass.hit {
        for row in rows.iter_mut() {
            fill_background(row, bg);
        }
        return Ok(if pass.generate_stencil {
            Some(Stencil::new(pass.output_info.extent)?)
        } else {
            None
        });
    }
    if pass.use_permute {
        permute::execute_tile(pass, tile, rows, bg)
    } else {
        general::execute_tile(pass, tile, rows, bg)
    }
}
