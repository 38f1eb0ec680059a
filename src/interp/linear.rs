use nalgebra::Matrix4;

use super::{Interpolator, InterpolationMode, SeparableInterpolator, Source, WeightsTable};
use crate::error::Result;
use crate::geometry::floor_frac;
use crate::image::{Extent, Scalar};

/// A sampler employing a trilinear interpolation strategy.
pub struct TriLinear<'a, T: Scalar> {
    pub(crate) src: Source<'a, T>,
}

impl<T: Scalar> Interpolator for TriLinear<'_, T> {
    fn support_size(&self, _matrix: &Matrix4<f64>) -> [usize; 3] {
        [2; 3]
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
        let (fx, rx) = floor_frac(point[0]);
        let (fy, ry) = floor_frac(point[1]);
        let (fz, rz) = floor_frac(point[2]);
        let taps_x = [(self.src.resolve(fx, 0), 1.0 - rx), (self.src.resolve(fx + 1, 0), rx)];
        let taps_y = [(self.src.resolve(fy, 1), 1.0 - ry), (self.src.resolve(fy + 1, 1), ry)];
        let taps_z = [(self.src.resolve(fz, 2), 1.0 - rz), (self.src.resolve(fz + 1, 2), rz)];
        out.fill(0.0);
        for (oz, wz) in taps_z {
            for (oy, wy) in taps_y {
                let w_zy = wz * wy;
                for (ox, wx) in taps_x {
                    self.src.accumulate(oz + oy + ox, w_zy * wx, out);
                }
            }
        }
        true
    }

    fn as_separable(&self) -> Option<&dyn SeparableInterpolator> {
        Some(self)
    }
}

impl<T: Scalar> SeparableInterpolator for TriLinear<'_, T> {
    fn precompute_weights(
        &self,
        matrix: &Matrix4<f64>,
        extent: &Extent,
    ) -> Result<(Extent, WeightsTable)> {
        self.src.precompute(InterpolationMode::Linear, matrix, extent)
    }

    fn interpolate_row(&self, table: &WeightsTable, x0: i64, y: i64, z: i64, out: &mut [f64]) {
        self.src.interpolate_row(table, x0, y, z, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Image, ImageInfo};
    use crate::interp::BorderMode;
    use approx::assert_relative_eq;

    fn gradient_image() -> Image {
        let info = ImageInfo::new([0, 3, 0, 3, 0, 3]);
        Image::from_fn(info, 1, |x, y, z, _| (100 * z + 10 * y + x) as f32).unwrap()
    }

    #[test]
    fn test_exact_on_voxel_centers() {
        let im = gradient_image();
        let tri = TriLinear {
            src: Source::<f32>::new(&im, BorderMode::Clamp, 0.5).unwrap(),
        };
        let mut out = [0.0];
        assert!(tri.interpolate([2.0, 1.0, 3.0], &mut out));
        assert_relative_eq!(out[0], 312.0);
    }

    #[test]
    fn test_linear_gradient_midpoints() {
        let im = gradient_image();
        let tri = TriLinear {
            src: Source::<f32>::new(&im, BorderMode::Clamp, 0.5).unwrap(),
        };
        let mut out = [0.0];
        assert!(tri.interpolate([1.5, 0.0, 0.0], &mut out));
        assert_relative_eq!(out[0], 1.5);
        assert!(tri.interpolate([0.25, 1.5, 2.0], &mut out));
        assert_relative_eq!(out[0], 215.25);
    }

    #[test]
    fn test_multi_component() {
        let info = ImageInfo::new([0, 1, 0, 0, 0, 0]);
        let im = Image::from_fn(info, 2, |x, _, _, c| (10 * x + c as i64) as f64).unwrap();
        let tri = TriLinear {
            src: Source::<f64>::new(&im, BorderMode::Clamp, 0.5).unwrap(),
        };
        let mut out = [0.0, 0.0];
        assert!(tri.interpolate([0.5, 0.0, 0.0], &mut out));
        assert_relative_eq!(out[0], 5.0);
        assert_relative_eq!(out[1], 6.0);
    }

    #[test]
    fn test_row_matches_pointwise() {
        let im = gradient_image();
        let tri = TriLinear {
            src: Source::<f32>::new(&im, BorderMode::Clamp, 0.5).unwrap(),
        };
        // half-voxel shift along x
        let mut matrix = Matrix4::identity();
        matrix[(0, 3)] = 0.5;
        let extent: Extent = [0, 2, 0, 2, 0, 2];
        let (clip, table) = tri.precompute_weights(&matrix, &extent).unwrap();
        assert_eq!(&clip[0..2], &[0, 2]);
        let mut row = [0.0; 3];
        tri.interpolate_row(&table, 0, 1, 2, &mut row);
        for (i, v) in row.iter().enumerate() {
            let mut single = [0.0];
            assert!(tri.interpolate([i as f64 + 0.5, 1.0, 2.0], &mut single));
            assert_relative_eq!(*v, single[0]);
        }
    }
}
