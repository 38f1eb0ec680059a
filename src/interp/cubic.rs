use nalgebra::Matrix4;

use super::{Interpolator, InterpolationMode, SeparableInterpolator, Source, WeightsTable};
use crate::error::Result;
use crate::geometry::floor_frac;
use crate::image::{Extent, Scalar};

/// Catmull-Rom weights for the four taps around a sample with fractional
/// offset `f` from the second tap.
pub(crate) fn cubic_weights(f: f64) -> [f64; 4] {
    let f2 = f * f;
    let f3 = f2 * f;
    [
        0.5 * (-f3 + 2.0 * f2 - f),
        0.5 * (3.0 * f3 - 5.0 * f2 + 2.0),
        0.5 * (-3.0 * f3 + 4.0 * f2 + f),
        0.5 * (f3 - f2),
    ]
}

/// A sampler employing a tricubic (Catmull-Rom) interpolation strategy.
pub struct TriCubic<'a, T: Scalar> {
    pub(crate) src: Source<'a, T>,
}

impl<T: Scalar> Interpolator for TriCubic<'_, T> {
    fn support_size(&self, _matrix: &Matrix4<f64>) -> [usize; 3] {
        [4; 3]
    }

    fn num_components(&self) -> usize {
        self.src.comp_count
    }

    fn component_offset(&self) -> usize {
        self.src.comp_offset
    }

    fn is_separable(&self) -> bool {
        true
    }

    fn check_bounds(&self, point: [f64; 3]) -> bool {
        self.src.check_bounds(point)
    }

    fn interpolate(&self, point: [f64; 3], out: &mut [f64]) -> bool {
        if !self.src.check_bounds(point) {
            return false;
        }
        let mut taps = [[(0isize, 0.0f64); 4]; 3];
        for j in 0..3 {
            let (f, r) = floor_frac(point[j]);
            let w = cubic_weights(r);
            for t in 0..4 {
                taps[j][t] = (self.src.resolve(f - 1 + t as i64, j), w[t]);
            }
        }
        out.fill(0.0);
        for (oz, wz) in taps[2] {
            for (oy, wy) in taps[1] {
                let w_zy = wz * wy;
                let base_zy = oz + oy;
                for (ox, wx) in taps[0] {
                    self.src.accumulate(base_zy + ox, w_zy * wx, out);
                }
            }
        }
        true
    }

    fn as_separable(&self) -> Option<&dyn SeparableInterpolator> {
        Some(self)
    }
}

impl<T: Scalar> SeparableInterpolator for TriCubic<'_, T> {
    fn precompute_weights(
        &self,
        matrix: &Matrix4<f64>,
        extent: &Extent,
    ) -> Result<(Extent, WeightsTable)> {
        self.src.precompute(InterpolationMode::Cubic, matrix, extent)
    }

    fn interpolate_row(&self, table: &WeightsTable, x0: i64, y: i64, z: i64, out: &mut [f64]) {
        self.src.interpolate_row(table, x0, y, z, out);
    }
}
