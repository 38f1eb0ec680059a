//! Slab compositing: several parallel samples along the output z axis
//! reduced to one value per voxel.

/// Reduction applied across the slab samples.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum SlabMode {
    Min,
    Max,
    #[default]
    Mean,
    Sum,
}

/// Endpoint weight: half for the first and last sample under trapezoid
/// integration, when there is more than one sample.
fn endpoint_weight(trapezoid: bool, i: usize, n: usize) -> f64 {
    if trapezoid && n > 1 && (i == 0 || i == n - 1) {
        0.5
    } else {
        1.0
    }
}

/// Composite `n` collected sample vectors (sample-major, `nc` components
/// each) into `out`. Only in-bounds samples are collected, so `n` may be
/// smaller than the configured slab thickness.
pub(crate) fn composite(
    mode: SlabMode,
    trapezoid: bool,
    samples: &[f64],
    nc: usize,
    n: usize,
    out: &mut [f64],
) {
    debug_assert!(n >= 1 && samples.len() >= n * nc);
    match mode {
        SlabMode::Min => {
            out.copy_from_slice(&samples[..nc]);
            for s in 1..n {
                for c in 0..nc {
                    out[c] = out[c].min(samples[s * nc + c]);
                }
            }
        }
        SlabMode::Max => {
            out.copy_from_slice(&samples[..nc]);
            for s in 1..n {
                for c in 0..nc {
                    out[c] = out[c].max(samples[s * nc + c]);
                }
            }
        }
        SlabMode::Mean | SlabMode::Sum => {
            out.fill(0.0);
            let mut total = 0.0;
            for s in 0..n {
                let w = endpoint_weight(trapezoid, s, n);
                total += w;
                for c in 0..nc {
                    out[c] += w * samples[s * nc + c];
                }
            }
            if mode == SlabMode::Mean {
                let inv = 1.0 / total;
                for o in out.iter_mut() {
                    *o *= inv;
                }
            }
        }
    }
}

/// The permute path's fused variant: samples arrive one row at a time and
/// are folded straight into the accumulator row.
#[derive(Copy, Clone, Debug)]
pub(crate) struct RowCompositor {
    pub mode: SlabMode,
    pub trapezoid: bool,
    pub n: usize,
}

impl RowCompositor {
    /// Fold sample `i` of the slab into `acc`.
    pub fn accumulate(&self, acc: &mut [f64], row: &[f64], i: usize) {
        if i == 0 {
            match self.mode {
                SlabMode::Min | SlabMode::Max => acc.copy_from_slice(row),
                SlabMode::Mean | SlabMode::Sum => {
                    let w = endpoint_weight(self.trapezoid, 0, self.n);
                    for (a, r) in acc.iter_mut().zip(row) {
                        *a = w * r;
                    }
                }
            }
            return;
        }
        match self.mode {
            SlabMode::Min => {
                for (a, r) in acc.iter_mut().zip(row) {
                    *a = a.min(*r);
                }
            }
            SlabMode::Max => {
                for (a, r) in acc.iter_mut().zip(row) {
                    *a = a.max(*r);
                }
            }
            SlabMode::Mean | SlabMode::Sum => {
                let w = endpoint_weight(self.trapezoid, i, self.n);
                for (a, r) in acc.iter_mut().zip(row) {
                    *a += w * r;
                }
            }
        }
    }

    /// Finalize the accumulator after the last sample.
    pub fn finish(&self, acc: &mut [f64]) {
        if self.mode == SlabMode::Mean {
            let total: f64 = (0..self.n)
                .map(|i| endpoint_weight(self.trapezoid, i, self.n))
                .sum();
            let inv = 1.0 / total;
            for a in acc.iter_mut() {
                *a *= inv;
            }
        }
    }
}
