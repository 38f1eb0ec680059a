//! Interpolation kernels. Every kernel implements [`Interpolator`];
//! separable kernels additionally implement [`SeparableInterpolator`],
//! which is what makes them eligible for the permute execute path.

pub mod cubic;
pub mod linear;
pub mod nearest;

pub use cubic::TriCubic;
pub use linear::TriLinear;
pub use nearest::NearestNeighbor;

use nalgebra::Matrix4;

use crate::error::{Error, Result};
use crate::geometry::{floor_frac, round_index};
use crate::image::{dispatch_kind, Extent, Image, Scalar};
use crate::matrix::AxisMap;

/// Kernel selection when no explicit interpolator is supplied.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Debug, Default)]
pub enum InterpolationMode {
    #[default]
    Nearest,
    Linear,
    Cubic,
}

impl InterpolationMode {
    /// Kernel footprint in input voxels along one axis.
    pub fn support(self) -> usize {
        match self {
            InterpolationMode::Nearest => 1,
            InterpolationMode::Linear => 2,
            InterpolationMode::Cubic => 4,
        }
    }
}

/// How samples outside the input extent are resolved.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum BorderMode {
    #[default]
    Clamp,
    Repeat,
    Mirror,
}

/// Precomputed separable weights over an output extent: for each output
/// index along each axis, `support` stride-premultiplied input offsets
/// and their coefficients.
pub struct WeightsTable {
    pub support: [usize; 3],
    pub extent: Extent,
    pub positions: [Vec<isize>; 3],
    pub weights: [Vec<f64>; 3],
}

/// A polymorphic sampler over one input image.
pub trait Interpolator: Send + Sync {
    /// Nominal kernel footprint per axis. The index matrix is provided so
    /// non-separable kernels can oversample anisotropically.
    fn support_size(&self, matrix: &Matrix4<f64>) -> [usize; 3];

    fn num_components(&self) -> usize;

    /// First input component sampled; components before it are skipped.
    fn component_offset(&self) -> usize {
        0
    }

    fn is_separable(&self) -> bool;

    /// Whether `point` (input index space) is close enough to the extent
    /// to be sampled, given the border mode and tolerance.
    fn check_bounds(&self, point: [f64; 3]) -> bool;

    /// Interpolate all components at `point` into `out`. Returns false
    /// and leaves `out` untouched when the point is out of bounds.
    fn interpolate(&self, point: [f64; 3], out: &mut [f64]) -> bool;

    fn as_separable(&self) -> Option<&dyn SeparableInterpolator> {
        None
    }
}

/// The capability the permute path needs: per-axis weight tables and row
/// evaluation by table lookup.
pub trait SeparableInterpolator: Interpolator {
    /// Build weight tables covering `extent` for a permutation matrix.
    /// Also returns the sub-extent over which every sampled position is
    /// in bounds; outside it the caller must write background.
    fn precompute_weights(
        &self,
        matrix: &Matrix4<f64>,
        extent: &Extent,
    ) -> Result<(Extent, WeightsTable)>;

    /// Evaluate `out.len() / num_components` consecutive voxels starting
    /// at output `(x0, y, z)` from the precomputed tables.
    fn interpolate_row(&self, table: &WeightsTable, x0: i64, y: i64, z: i64, out: &mut [f64]);
}

/// Supplies a bound interpolator for each pass, letting callers plug in
/// kernels beyond the built-in modes.
pub trait InterpolatorFactory: Send + Sync {
    fn bind<'a>(
        &self,
        image: &'a Image,
        border: BorderMode,
        tolerance: f64,
    ) -> Result<Box<dyn Interpolator + 'a>>;

    /// Support bound usable before an image is available, for update
    /// extent analysis.
    fn nominal_support(&self) -> [usize; 3] {
        [4; 3]
    }

    fn mtime(&self) -> u64 {
        0
    }
}

impl InterpolatorFactory for InterpolationMode {
    fn bind<'a>(
        &self,
        image: &'a Image,
        border: BorderMode,
        tolerance: f64,
    ) -> Result<Box<dyn Interpolator + 'a>> {
        dispatch_kind!(image.kind(), T => {
            let src = Source::<T>::new(image, border, tolerance)?;
            let boxed: Box<dyn Interpolator + 'a> = match self {
                InterpolationMode::Nearest => Box::new(NearestNeighbor { src }),
                InterpolationMode::Linear => Box::new(TriLinear { src }),
                InterpolationMode::Cubic => Box::new(TriCubic { src }),
            };
            Ok(boxed)
        })
    }

    fn nominal_support(&self) -> [usize; 3] {
        [self.support(); 3]
    }
}

/// Mirror-reflects `v` into `[0, s)`.
fn mirror(mut v: i64, s: i64) -> i64 {
    loop {
        if v < 0 {
            v = -v - 1;
        } else if v >= s {
            v = 2 * s - v - 1;
        } else {
            return v;
        }
    }
}

/// Shared sampling core: a typed view of the input buffer plus border
/// resolution and bounds testing.
pub(crate) struct Source<'a, T: Scalar> {
    pub data: &'a [T],
    pub extent: Extent,
    pub strides: [isize; 3],
    pub comp_offset: usize,
    pub comp_count: usize,
    pub border: BorderMode,
    pub tolerance: f64,
}

impl<'a, T: Scalar> Source<'a, T> {
    pub fn new(image: &'a Image, border: BorderMode, tolerance: f64) -> Result<Source<'a, T>> {
        let data = image.scalars::<T>().ok_or_else(|| {
            Error::UnsupportedScalarType(image.kind(), "kernel bound to a different scalar kind".into())
        })?;
        let [nx, ny, _] = image.info().dims();
        let nc = image.num_components();
        Ok(Source {
            data,
            extent: image.info().extent,
            strides: [nc as isize, (nx * nc) as isize, (nx * ny * nc) as isize],
            comp_offset: 0,
            comp_count: nc,
            border,
            tolerance,
        })
    }

    pub fn check_bounds(&self, point: [f64; 3]) -> bool {
        match self.border {
            // repeat and mirror can resolve any position
            BorderMode::Repeat | BorderMode::Mirror => true,
            BorderMode::Clamp => (0..3).all(|j| {
                point[j] >= self.extent[2 * j] as f64 - self.tolerance
                    && point[j] <= self.extent[2 * j + 1] as f64 + self.tolerance
            }),
        }
    }

    /// Resolve a tap index along `axis` to a stride-premultiplied offset.
    pub fn resolve(&self, t: i64, axis: usize) -> isize {
        let n = self.extent[2 * axis + 1] - self.extent[2 * axis] + 1;
        let rel = t - self.extent[2 * axis];
        let rel = match self.border {
            BorderMode::Clamp => rel.clamp(0, n - 1),
            BorderMode::Repeat => rel.rem_euclid(n),
            BorderMode::Mirror => mirror(rel, n),
        };
        rel as isize * self.strides[axis]
    }

    /// Accumulate `w * voxel[offset]` into `out` for each component.
    pub fn accumulate(&self, offset: isize, w: f64, out: &mut [f64]) {
        let base = offset as usize + self.comp_offset;
        for (c, o) in out.iter_mut().enumerate() {
            *o += w * self.data[base + c].to_f64();
        }
    }

    /// In-bounds test for a position along a single input axis.
    fn axis_in_bounds(&self, pos: f64, axis: usize) -> bool {
        match self.border {
            BorderMode::Repeat | BorderMode::Mirror => true,
            BorderMode::Clamp => {
                pos >= self.extent[2 * axis] as f64 - self.tolerance
                    && pos <= self.extent[2 * axis + 1] as f64 + self.tolerance
            }
        }
    }

    /// Shared weight-table construction for the separable kernels.
    pub fn precompute(
        &self,
        mode: InterpolationMode,
        matrix: &Matrix4<f64>,
        extent: &Extent,
    ) -> Result<(Extent, WeightsTable)> {
        let map = AxisMap::from_matrix(matrix).ok_or_else(|| {
            Error::InvalidParameter("weight tables require a permutation matrix".into())
        })?;
        let k = mode.support();
        let mut table = WeightsTable {
            support: [k; 3],
            extent: *extent,
            positions: [Vec::new(), Vec::new(), Vec::new()],
            weights: [Vec::new(), Vec::new(), Vec::new()],
        };
        let mut clip: Extent = [0; 6];
        for i in 0..3 {
            let j = map.in_axis[i];
            let (mut lo, mut hi) = (extent[2 * i], extent[2 * i] - 1);
            let mut seen = false;
            for o in extent[2 * i]..=extent[2 * i + 1] {
                let pos = map.scale[i] * o as f64 + map.trans[i];
                if self.axis_in_bounds(pos, j) {
                    if !seen {
                        lo = o;
                        seen = true;
                    }
                    hi = o;
                }
                match mode {
                    InterpolationMode::Nearest => {
                        table.positions[i].push(self.resolve(round_index(pos), j));
                        table.weights[i].push(1.0);
                    }
                    InterpolationMode::Linear => {
                        let (f, r) = floor_frac(pos);
                        table.positions[i].push(self.resolve(f, j));
                        table.positions[i].push(self.resolve(f + 1, j));
                        table.weights[i].push(1.0 - r);
                        table.weights[i].push(r);
                    }
                    InterpolationMode::Cubic => {
                        let (f, r) = floor_frac(pos);
                        let w = cubic::cubic_weights(r);
                        for t in 0..4 {
                            table.positions[i].push(self.resolve(f - 1 + t as i64, j));
                            table.weights[i].push(w[t]);
                        }
                    }
                }
            }
            clip[2 * i] = lo;
            clip[2 * i + 1] = hi;
        }
        Ok((clip, table))
    }

    /// Row evaluation from precomputed tables, shared by the kernels.
    pub fn interpolate_row(
        &self,
        table: &WeightsTable,
        x0: i64,
        y: i64,
        z: i64,
        out: &mut [f64],
    ) {
        let [sx, sy, sz] = table.support;
        let nc = self.comp_count;
        let ey = (y - table.extent[2]) as usize;
        let ez = (z - table.extent[4]) as usize;
        let py = &table.positions[1][ey * sy..(ey + 1) * sy];
        let wy = &table.weights[1][ey * sy..(ey + 1) * sy];
        let pz = &table.positions[2][ez * sz..(ez + 1) * sz];
        let wz = &table.weights[2][ez * sz..(ez + 1) * sz];
        for (i, pix) in out.chunks_exact_mut(nc).enumerate() {
            let ex = (x0 - table.extent[0]) as usize + i;
            let px = &table.positions[0][ex * sx..(ex + 1) * sx];
            let wx = &table.weights[0][ex * sx..(ex + 1) * sx];
            pix.fill(0.0);
            for (oz, cz) in pz.iter().zip(wz) {
                for (oy, cy) in py.iter().zip(wy) {
                    let w_zy = cz * cy;
                    let base_zy = oz + oy;
                    for (ox, cx) in px.iter().zip(wx) {
                        self.accumulate(base_zy + ox, w_zy * cx, pix);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageInfo;

    #[test]
    fn test_mirror() {
        assert_eq!(mirror(-1, 4), 0);
        assert_eq!(mirror(-2, 4), 1);
        assert_eq!(mirror(4, 4), 3);
        assert_eq!(mirror(5, 4), 2);
        assert_eq!(mirror(2, 4), 2);
    }

    #[test]
    fn test_source_resolve_border_modes() {
        let info = ImageInfo::new([0, 3, 0, 0, 0, 0]);
        let im = Image::from_fn(info, 1, |x, _, _, _| x as u8).unwrap();

        let clamp = Source::<u8>::new(&im, BorderMode::Clamp, 0.5).unwrap();
        assert_eq!(clamp.resolve(-2, 0), 0);
        assert_eq!(clamp.resolve(5, 0), 3);

        let repeat = Source::<u8>::new(&im, BorderMode::Repeat, 0.5).unwrap();
        assert_eq!(repeat.resolve(-1, 0), 3);
        assert_eq!(repeat.resolve(4, 0), 0);

        let mirrored = Source::<u8>::new(&im, BorderMode::Mirror, 0.5).unwrap();
        assert_eq!(mirrored.resolve(-1, 0), 0);
        assert_eq!(mirrored.resolve(4, 0), 3);
    }

    #[test]
    fn test_check_bounds_tolerance() {
        let info = ImageInfo::new([0, 3, 0, 3, 0, 3]);
        let im = Image::new(info, crate::image::ScalarKind::UInt8, 1).unwrap();
        let src = Source::<u8>::new(&im, BorderMode::Clamp, 0.5).unwrap();
        assert!(src.check_bounds([-0.5, 0.0, 0.0]));
        assert!(!src.check_bounds([-0.51, 0.0, 0.0]));
        assert!(src.check_bounds([3.5, 3.5, 3.5]));
        let src = Source::<u8>::new(&im, BorderMode::Repeat, 0.0).unwrap();
        assert!(src.check_bounds([100.0, 0.0, 0.0]));
    }

    #[test]
    fn test_mode_support() {
        assert_eq!(InterpolationMode::Nearest.support(), 1);
        assert_eq!(InterpolationMode::Linear.support(), 2);
        assert_eq!(InterpolationMode::Cubic.support(), 4);
        assert!(InterpolationMode::Nearest < InterpolationMode::Cubic);
    }
}
