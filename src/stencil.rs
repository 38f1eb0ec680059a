//! Run-length binary voxel mask. Each (y, z) row holds an ordered list of
//! inclusive `[x0, x1]` runs marking the voxels inside the mask.

use crate::error::Result;
use crate::image::{check_extent, Extent};

#[derive(Clone, Debug)]
pub struct Stencil {
    extent: Extent,
    rows: Vec<Vec<[i64; 2]>>,
}

impl Stencil {
    pub fn new(extent: Extent) -> Result<Stencil> {
        check_extent(&extent)?;
        let ny = (extent[3] - extent[2] + 1) as usize;
        let nz = (extent[5] - extent[4] + 1) as usize;
        Ok(Stencil {
            extent,
            rows: vec![Vec::new(); ny * nz],
        })
    }

    /// Build a mask from a per-voxel predicate.
    pub fn from_fn<F>(extent: Extent, mut f: F) -> Result<Stencil>
    where
        F: FnMut(i64, i64, i64) -> bool,
    {
        let mut stencil = Stencil::new(extent)?;
        for z in extent[4]..=extent[5] {
            for y in extent[2]..=extent[3] {
                let mut start = None;
                for x in extent[0]..=extent[1] {
                    match (f(x, y, z), start) {
                        (true, None) => start = Some(x),
                        (false, Some(x0)) => {
                            stencil.insert_run(x0, x - 1, y, z);
                            start = None;
                        }
                        _ => {}
                    }
                }
                if let Some(x0) = start {
                    stencil.insert_run(x0, extent[1], y, z);
                }
            }
        }
        Ok(stencil)
    }

    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    fn row_index(&self, y: i64, z: i64) -> Option<usize> {
        if y < self.extent[2] || y > self.extent[3] || z < self.extent[4] || z > self.extent[5] {
            return None;
        }
        let ny = (self.extent[3] - self.extent[2] + 1) as usize;
        Some((z - self.extent[4]) as usize * ny + (y - self.extent[2]) as usize)
    }

    /// Append a run at the tail of its row. Runs for a row must be
    /// inserted in ascending, non-overlapping x order.
    pub fn insert_run(&mut self, x0: i64, x1: i64, y: i64, z: i64) {
        if x1 < x0 {
            return;
        }
        if let Some(i) = self.row_index(y, z) {
            let row = &mut self.rows[i];
            debug_assert!(row.last().map_or(true, |r| r[1] < x0));
            row.push([x0, x1]);
        }
    }

    /// The runs of row (y, z), in ascending x order. Rows outside the
    /// stencil extent are empty.
    pub fn runs(&self, y: i64, z: i64) -> &[[i64; 2]] {
        match self.row_index(y, z) {
            Some(i) => &self.rows[i],
            None => &[],
        }
    }

    /// The runs of row (y, z) intersected with the span `[x0, x1]`.
    pub fn clipped_runs(
        &self,
        y: i64,
        z: i64,
        x0: i64,
        x1: i64,
    ) -> impl Iterator<Item = [i64; 2]> + '_ {
        self.runs(y, z)
            .iter()
            .filter(move |r| r[1] >= x0 && r[0] <= x1)
            .map(move |r| [r[0].max(x0), r[1].min(x1)])
    }

    pub fn contains(&self, x: i64, y: i64, z: i64) -> bool {
        self.runs(y, z).iter().any(|r| x >= r[0] && x <= r[1])
    }

    /// Total number of masked voxels.
    pub fn num_voxels(&self) -> usize {
        self.rows
            .iter()
            .flatten()
            .map(|r| (r[1] - r[0] + 1) as usize)
            .sum()
    }

    /// Merge rows produced by another stencil covering a disjoint set of
    /// rows of the same extent. Used to stitch per-tile results.
    pub(crate) fn absorb(&mut self, other: Stencil) {
        for (dst, src) in self.rows.iter_mut().zip(other.rows) {
            if !src.is_empty() {
                debug_assert!(dst.is_empty());
                *dst = src;
            }
        }
    }
}
