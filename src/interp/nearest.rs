use nalgebra::Matrix4;

use super::{Interpolator, InterpolationMode, SeparableInterpolator, Source, WeightsTable};
use crate::error::Result;
use crate::geometry::round_index;
use crate::image::{Extent, Scalar};

/// A sampler employing a nearest neighbor strategy.
pub struct NearestNeighbor<'a, T: Scalar> {
    pub(crate) src: Source<'a, T>,
}

impl<T: Scalar> Interpolator for NearestNeighbor<'_, T> {
    fn support_size(&self, _matrix: &Matrix4<f64>) -> [usize; 3] {
        [1; 3]
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
        let mut offset = 0;
        for j in 0..3 {
            offset += self.src.resolve(round_index(point[j]), j);
        }
        out.fill(0.0);
        self.src.accumulate(offset, 1.0, out);
        true
    }

    fn as_separable(&self) -> Option<&dyn SeparableInterpolator> {
        Some(self)
    }
}

impl<T: Scalar> SeparableInterpolator for NearestNeighbor<'_, T> {
    fn precompute_weights(
        &self,
        matrix: &Matrix4<f64>,
        extent: &Extent,
    ) -> Result<(Extent, WeightsTable)> {
        self.src.precompute(InterpolationMode::Nearest, matrix, extent)
    }

    fn interpolate_row(&self, table: &WeightsTable, x0: i64, y: i64, z: i64, out: &mut [f64]) {
        self.src.interpolate_row(table, x0, y, z, out);
    }
}
