//! The reslicing filter: user parameters, validation, geometry hooks for
//! a streaming host, and the threaded execute entry point.

use std::sync::Arc;

use log::debug;
use nalgebra::{Matrix3, Matrix4};

use crate::convert::{needs_clamp, Converter};
use crate::error::{Error, Result};
use crate::exec::{self, Pass, SplitMode};
use crate::geometry::{self, DeriveParams};
use crate::image::{dispatch_kind, next_mtime, Extent, Image, ImageInfo, Scalar, ScalarKind};
use crate::interp::{BorderMode, InterpolationMode, InterpolatorFactory};
use crate::matrix::IndexMatrix;
use crate::slab::SlabMode;
use crate::stencil::Stencil;
use crate::transform::PointTransform;

/// The resliced image plus the generated written-voxel mask, populated
/// when `set_generate_stencil_output(true)` was requested.
pub struct ResliceOutput {
    pub image: Image,
    pub stencil: Option<Stencil>,
}

/// Resamples a voxel image onto a new grid whose pose, spacing,
/// direction, extent and dimensionality may all differ from the input.
///
/// The mapping applied to every output voxel is the composition of the
/// output index-to-world transform, the reslice axes, an optional point
/// transform, and the input world-to-index transform.
pub struct Reslice {
    reslice_axes: Matrix4<f64>,
    transform: Option<Arc<dyn PointTransform>>,
    information_input: Option<(ImageInfo, u64)>,
    output_spacing: Option<[f64; 3]>,
    output_origin: Option<[f64; 3]>,
    output_direction: Option<Matrix3<f64>>,
    output_extent: Option<Extent>,
    output_dimensionality: usize,
    output_scalar_kind: Option<ScalarKind>,
    interpolation: InterpolationMode,
    interpolator: Option<Box<dyn InterpolatorFactory>>,
    wrap: bool,
    mirror: bool,
    border: bool,
    border_thickness: f64,
    slab_slices: usize,
    slab_mode: SlabMode,
    slab_trapezoid: bool,
    slab_spacing_fraction: f64,
    scalar_shift: f64,
    scalar_scale: f64,
    background: [f64; 4],
    auto_crop: bool,
    transform_input_sampling: bool,
    optimization: bool,
    generate_stencil: bool,
    split_mode: SplitMode,
    mtime: u64,
}

impl Default for Reslice {
    fn default() -> Reslice {
        Reslice {
            reslice_axes: Matrix4::identity(),
            transform: None,
            information_input: None,
            output_spacing: None,
            output_origin: None,
            output_direction: None,
            output_extent: None,
            output_dimensionality: 3,
            output_scalar_kind: None,
            interpolation: InterpolationMode::Nearest,
            interpolator: None,
            wrap: false,
            mirror: false,
            border: true,
            border_thickness: 0.5,
            slab_slices: 1,
            slab_mode: SlabMode::Mean,
            slab_trapezoid: false,
            slab_spacing_fraction: 1.0,
            scalar_shift: 0.0,
            scalar_scale: 1.0,
            background: [0.0; 4],
            auto_crop: false,
            transform_input_sampling: true,
            optimization: true,
            generate_stencil: false,
            split_mode: SplitMode::default(),
            mtime: next_mtime(),
        }
    }
}

impl Reslice {
    pub fn new() -> Reslice {
        Reslice::default()
    }

    fn touch(&mut self) {
        self.mtime = next_mtime();
    }

    pub fn set_reslice_axes(&mut self, axes: Matrix4<f64>) {
        self.reslice_axes = axes;
        self.touch();
    }

    pub fn reslice_axes(&self) -> &Matrix4<f64> {
        &self.reslice_axes
    }

    /// Set only the rotation part of the reslice axes, given as rows.
    pub fn set_reslice_axes_direction_cosines(&mut self, cosines: &Matrix3<f64>) {
        for i in 0..3 {
            for j in 0..3 {
                self.reslice_axes[(i, j)] = cosines[(i, j)];
            }
        }
        self.touch();
    }

    /// Set only the translation column of the reslice axes.
    pub fn set_reslice_axes_origin(&mut self, origin: [f64; 3]) {
        for i in 0..3 {
            self.reslice_axes[(i, 3)] = origin[i];
        }
        self.touch();
    }

    pub fn set_reslice_transform(&mut self, transform: Option<Arc<dyn PointTransform>>) {
        self.transform = transform;
        self.touch();
    }

    /// Borrow output geometry defaults from this image instead of the
    /// execute input.
    pub fn set_information_input(&mut self, input: Option<&Image>) {
        self.information_input = input.map(|im| (im.info().clone(), im.mtime()));
        self.touch();
    }

    pub fn set_output_spacing(&mut self, spacing: Option<[f64; 3]>) -> Result<()> {
        if let Some(s) = spacing {
            if s.iter().any(|v| *v == 0.0) {
                return Err(Error::InvalidParameter("output spacing must be non-zero".into()));
            }
        }
        self.output_spacing = spacing;
        self.touch();
        Ok(())
    }

    pub fn set_output_origin(&mut self, origin: Option<[f64; 3]>) {
        self.output_origin = origin;
        self.touch();
    }

    pub fn set_output_direction(&mut self, direction: Option<Matrix3<f64>>) {
        self.output_direction = direction;
        self.touch();
    }

    pub fn set_output_extent(&mut self, extent: Option<Extent>) -> Result<()> {
        if let Some(e) = &extent {
            crate::image::check_extent(e)?;
        }
        self.output_extent = extent;
        self.touch();
        Ok(())
    }

    pub fn set_output_dimensionality(&mut self, dim: usize) -> Result<()> {
        if !(1..=3).contains(&dim) {
            return Err(Error::InvalidParameter(format!(
                "output dimensionality must be 1, 2 or 3, got {dim}"
            )));
        }
        self.output_dimensionality = dim;
        self.touch();
        Ok(())
    }

    /// Output scalar kind; `None` keeps the input kind.
    pub fn set_output_scalar_kind(&mut self, kind: Option<ScalarKind>) {
        self.output_scalar_kind = kind;
        self.touch();
    }

    pub fn set_interpolation_mode(&mut self, mode: InterpolationMode) {
        self.interpolation = mode;
        self.touch();
    }

    /// Plug in a caller-supplied kernel; `None` falls back to the
    /// configured interpolation mode.
    pub fn set_interpolator_factory(&mut self, factory: Option<Box<dyn InterpolatorFactory>>) {
        self.interpolator = factory;
        self.touch();
    }

    pub fn set_wrap(&mut self, wrap: bool) {
        self.wrap = wrap;
        self.touch();
    }

    pub fn set_mirror(&mut self, mirror: bool) {
        self.mirror = mirror;
        self.touch();
    }

    pub fn border_mode(&self) -> BorderMode {
        if self.wrap {
            BorderMode::Repeat
        } else if self.mirror {
            BorderMode::Mirror
        } else {
            BorderMode::Clamp
        }
    }

    /// Whether sampling may reach up to `border_thickness` voxels outside
    /// the strict input extent.
    pub fn set_border(&mut self, border: bool) {
        self.border = border;
        self.touch();
    }

    pub fn set_border_thickness(&mut self, thickness: f64) -> Result<()> {
        if !(thickness >= 0.0) {
            return Err(Error::InvalidParameter(format!(
                "border thickness must be non-negative, got {thickness}"
            )));
        }
        self.border_thickness = thickness;
        self.touch();
        Ok(())
    }

    pub fn set_slab_number_of_slices(&mut self, n: usize) -> Result<()> {
        if n < 1 {
            return Err(Error::InvalidParameter("slab needs at least one slice".into()));
        }
        self.slab_slices = n;
        self.touch();
        Ok(())
    }

    pub fn set_slab_mode(&mut self, mode: SlabMode) {
        self.slab_mode = mode;
        self.touch();
    }

    pub fn set_slab_trapezoid_integration(&mut self, trapezoid: bool) {
        self.slab_trapezoid = trapezoid;
        self.touch();
    }

    pub fn set_slab_slice_spacing_fraction(&mut self, fraction: f64) -> Result<()> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(Error::InvalidParameter(format!(
                "slab slice spacing fraction must be in (0, 1], got {fraction}"
            )));
        }
        self.slab_spacing_fraction = fraction;
        self.touch();
        Ok(())
    }

    pub fn set_scalar_shift(&mut self, shift: f64) {
        self.scalar_shift = shift;
        self.touch();
    }

    pub fn set_scalar_scale(&mut self, scale: f64) {
        self.scalar_scale = scale;
        self.touch();
    }

    /// Written to out-of-bounds and stencil-masked voxels. Components
    /// beyond the output's component count are ignored.
    pub fn set_background_color(&mut self, color: [f64; 4]) {
        self.background = color;
        self.touch();
    }

    /// Fit the output extent to the bounding box of the mapped input.
    pub fn set_auto_crop_output(&mut self, auto_crop: bool) {
        self.auto_crop = auto_crop;
        self.touch();
    }

    /// Whether geometry derivation accounts for the reslice rotation.
    pub fn set_transform_input_sampling(&mut self, on: bool) {
        self.transform_input_sampling = on;
        self.touch();
    }

    /// Enables the permute fast path and the nearest-neighbor downgrade.
    pub fn set_optimization(&mut self, on: bool) {
        self.optimization = on;
        self.touch();
    }

    /// Emit a mask of the voxels written from in-bounds samples.
    pub fn set_generate_stencil_output(&mut self, on: bool) {
        self.generate_stencil = on;
        self.touch();
    }

    pub fn set_split_mode(&mut self, mode: SplitMode) {
        self.split_mode = mode;
        self.touch();
    }

    /// Effective modification time: the filter's own and those of the
    /// transform, the interpolator factory and the information input.
    pub fn mtime(&self) -> u64 {
        let mut t = self.mtime;
        if let Some(tr) = &self.transform {
            t = t.max(tr.mtime());
        }
        if let Some(f) = &self.interpolator {
            t = t.max(f.mtime());
        }
        if let Some((_, m)) = &self.information_input {
            t = t.max(*m);
        }
        t
    }

    fn derive_params(&self) -> DeriveParams<'_> {
        DeriveParams {
            spacing: self.output_spacing,
            origin: self.output_origin,
            direction: self.output_direction,
            extent: self.output_extent,
            dimensionality: self.output_dimensionality,
            reslice_axes: self.reslice_axes,
            transform: self.transform.as_deref(),
            transform_input_sampling: self.transform_input_sampling,
            auto_crop: self.auto_crop,
        }
    }

    /// The output grid this filter will produce for `input` (or for the
    /// information input, when one is set).
    pub fn output_info(&self, input: &ImageInfo) -> Result<ImageInfo> {
        let base = match &self.information_input {
            Some((info, _)) => info,
            None => input,
        };
        geometry::derive_output_info(base, &self.derive_params())
    }

    /// The input sub-extent a pass over `output_request` will read, and
    /// whether any sample can land inside the input. Streaming hosts use
    /// this to crop the input they provide to [`Reslice::execute`].
    pub fn input_update_extent(
        &self,
        input: &ImageInfo,
        output_request: &Extent,
    ) -> Result<(Extent, bool)> {
        let output = self.output_info(input)?;
        let matrix = IndexMatrix::build(input, &output, &self.reslice_axes, self.transform.as_ref())?;
        let support = match &self.interpolator {
            Some(f) => f.nominal_support(),
            None => self.interpolation.nominal_support(),
        };
        Ok(geometry::input_update_extent(
            &input.extent,
            output_request,
            &matrix,
            support,
            self.border_mode(),
        ))
    }

    /// Run one pass: derive the output grid, build the index matrix, and
    /// resample every output voxel in parallel over tiles.
    pub fn execute(&self, input: &Image, stencil: Option<&Stencil>) -> Result<ResliceOutput> {
        let out_info = self.output_info(input.info())?;
        let out_kind = self.output_scalar_kind.unwrap_or(input.kind());
        let nc = input.num_components();

        let matrix =
            IndexMatrix::build(input.info(), &out_info, &self.reslice_axes, self.transform.as_ref())?;

        let mut mode = self.interpolation;
        if self.optimization
            && self.interpolator.is_none()
            && matrix.nearest_safe
            && mode != InterpolationMode::Nearest
        {
            debug!("index matrix maps voxel centers onto voxel centers, downgrading to nearest neighbor");
            mode = InterpolationMode::Nearest;
        }

        let border_mode = self.border_mode();
        let tolerance = if self.border { self.border_thickness } else { 0.0 };
        let factory: &dyn InterpolatorFactory = match &self.interpolator {
            Some(f) => f.as_ref(),
            None => &mode,
        };
        let interp = factory.bind(input, border_mode, tolerance)?;
        if interp.num_components() != nc {
            return Err(Error::MismatchedComponents(interp.num_components(), nc));
        }

        let support = interp.support_size(&matrix.matrix);
        let (_, hit) = geometry::input_update_extent(
            &input.info().extent,
            &out_info.extent,
            &matrix,
            support,
            border_mode,
        );

        let fused_axis_aligned = !matrix.residual.is_nonlinear()
            && !matrix.perspective
            && matrix.axis_map().is_some();
        let use_permute = self.optimization
            && fused_axis_aligned
            && interp.is_separable()
            && self.slab_spacing_fraction == 1.0;

        let no_rescale = self.scalar_shift == 0.0 && self.scalar_scale == 1.0;
        let direct_copy = mode == InterpolationMode::Nearest
            && self.interpolator.is_none()
            && border_mode == BorderMode::Clamp
            && !matrix.residual.is_nonlinear()
            && !matrix.perspective
            && no_rescale
            && input.kind() == out_kind
            && tolerance == 0.5
            && self.slab_slices <= 1;
        let direct_lookup = mode == InterpolationMode::Nearest
            && self.interpolator.is_none()
            && no_rescale
            && input.kind() == out_kind
            && self.slab_slices == 1;

        let mut background = vec![0.0f64; nc];
        for (c, b) in background.iter_mut().zip(self.background) {
            *c = b;
        }

        let clamp = needs_clamp(input.kind(), out_kind, mode, self.slab_mode, !no_rescale);
        let converter = Converter::new(out_kind, self.scalar_shift, self.scalar_scale, clamp);

        let mut output = Image::new(out_info.clone(), out_kind, nc)?;
        let pass = Pass {
            input,
            output_info: &out_info,
            num_components: nc,
            matrix: &matrix,
            interp: interp.as_ref(),
            stencil,
            background: &background,
            converter,
            ns: self.slab_slices,
            slab_mode: self.slab_mode,
            trapezoid: self.slab_trapezoid,
            slab_spacing: self.slab_spacing_fraction,
            hit,
            use_permute,
            direct_copy,
            direct_lookup,
            generate_stencil: self.generate_stencil,
            split_mode: self.split_mode,
        };

        let generated = dispatch_kind!(out_kind, Out => {
            let buf = <Out as Scalar>::slice_mut(output.data_mut()).ok_or_else(|| {
                Error::UnsupportedScalarType(out_kind, "output buffer kind mismatch".into())
            })?;
            exec::run::<Out>(&pass, buf)?
        });

        Ok(ResliceOutput {
            image: output,
            stencil: generated,
        })
    }
}

/// Resample `input` onto an axis-aligned grid with the given voxel sizes,
/// covering the whole input.
pub fn resample_to_output(
    input: &Image,
    voxel_sizes: [f64; 3],
    mode: InterpolationMode,
) -> Result<ResliceOutput> {
    let mut filter = Reslice::new();
    filter.set_interpolation_mode(mode);
    filter.set_output_spacing(Some(voxel_sizes))?;
    filter.set_output_direction(Some(Matrix3::identity()));
    filter.set_auto_crop_output(true);
    filter.execute(input, None)
}

/// Resample `input` onto the grid described by `target`.
pub fn resample_from_to(
    input: &Image,
    target: &ImageInfo,
    mode: InterpolationMode,
) -> Result<ResliceOutput> {
    let mut filter = Reslice::new();
    filter.set_interpolation_mode(mode);
    filter.set_output_spacing(Some(target.spacing))?;
    filter.set_output_origin(Some(target.origin));
    filter.set_output_direction(Some(target.direction));
    filter.set_output_extent(Some(target.extent))?;
    filter.execute(input, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::extent_corners;
    use crate::transform::MatrixTransform;
    use approx::assert_relative_eq;
    use nalgebra::Vector4;

    fn gradient_u16() -> Image {
        let info = ImageInfo::new([0, 3, 0, 3, 0, 3]);
        Image::from_fn(info, 1, |x, y, z, _| (100 * z + 10 * y + x) as u16).unwrap()
    }

    #[test]
    fn test_identity_copy_is_bitwise() {
        let input = gradient_u16();
        let out = Reslice::new().execute(&input, None).unwrap();
        assert_eq!(out.image.info(), input.info());
        assert_eq!(out.image.kind(), input.kind());
        assert_eq!(out.image.scalars::<u16>(), input.scalars::<u16>());
        // general path agrees
        let mut f = Reslice::new();
        f.set_optimization(false);
        let general = f.execute(&input, None).unwrap();
        assert_eq!(general.image.scalars::<u16>(), input.scalars::<u16>());
    }

    #[test]
    fn test_identity_copy_float_multicomponent() {
        let info = ImageInfo::new([0, 2, 0, 2, 0, 2]);
        let input =
            Image::from_fn(info, 3, |x, y, z, c| (9 * z + 3 * y + x) as f32 + 0.25 * c as f32)
                .unwrap();
        let out = Reslice::new().execute(&input, None).unwrap();
        assert_eq!(out.image.scalars::<f32>(), input.scalars::<f32>());
    }

    #[test]
    fn test_axis_swap_transposes() {
        let info = ImageInfo::new([0, 1, 0, 2, 0, 0]);
        let input = Image::from_fn(info, 1, |x, y, _, _| (10 * y + x) as f32).unwrap();
        #[rustfmt::skip]
        let axes = Matrix4::from_row_slice(&[
            0.0, 1.0, 0.0, 0.0,
            1.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ]);
        let mut f = Reslice::new();
        f.set_reslice_axes(axes);
        f.set_interpolation_mode(InterpolationMode::Linear);
        let out = f.execute(&input, None).unwrap();
        assert_eq!(out.image.info().extent, [0, 2, 0, 1, 0, 0]);
        for j in 0..2i64 {
            for i in 0..3i64 {
                assert_eq!(out.image.value(i, j, 0, 0), Some((10 * i + j) as f64));
            }
        }
        // permute and general agree byte for byte
        f.set_optimization(false);
        let general = f.execute(&input, None).unwrap();
        assert_eq!(general.image.scalars::<f32>(), out.image.scalars::<f32>());
    }

    #[test]
    fn test_permutation_round_trip() {
        let input = gradient_u16();
        #[rustfmt::skip]
        let axes = Matrix4::from_row_slice(&[
            0.0, 0.0, 1.0, 0.0,
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ]);
        let mut forward = Reslice::new();
        forward.set_reslice_axes(axes);
        let mid = forward.execute(&input, None).unwrap();
        let mut back = Reslice::new();
        back.set_reslice_axes(axes.try_inverse().unwrap());
        let out = back.execute(&mid.image, None).unwrap();
        assert_eq!(out.image.scalars::<u16>(), input.scalars::<u16>());
    }

    #[test]
    fn test_all_out_of_bounds_gets_background() {
        let info = ImageInfo::new([0, 3, 0, 3, 0, 3]);
        let input = Image::from_fn(info, 4, |x, _, _, c| (x + c as i64) as u8).unwrap();
        let mut f = Reslice::new();
        f.set_reslice_axes_origin([10.0, 0.0, 0.0]);
        f.set_background_color([42.0, 0.0, 0.0, 0.0]);
        let out = f.execute(&input, None).unwrap();
        for px in out.image.scalars::<u8>().unwrap().chunks_exact(4) {
            assert_eq!(px, &[42, 0, 0, 0]);
        }
    }

    fn slab_input() -> Image {
        let info = ImageInfo::new([0, 1, 0, 1, 0, 4]);
        Image::from_fn(info, 1, |_, _, z, _| [0u8, 100, 200, 100, 0][z as usize]).unwrap()
    }

    #[test]
    fn test_slab_mean() {
        let mut f = Reslice::new();
        f.set_slab_number_of_slices(3).unwrap();
        f.set_output_extent(Some([0, 1, 0, 1, 2, 2])).unwrap();
        let out = f.execute(&slab_input(), None).unwrap();
        for x in 0..2i64 {
            for y in 0..2i64 {
                assert_eq!(out.image.value(x, y, 2, 0), Some(133.0));
            }
        }
        // same through the general path
        f.set_optimization(false);
        let general = f.execute(&slab_input(), None).unwrap();
        assert_eq!(general.image.value(0, 0, 2, 0), Some(133.0));
    }

    #[test]
    fn test_slab_mean_equals_sum_over_n() {
        let input = slab_input();
        let mut f = Reslice::new();
        f.set_slab_number_of_slices(3).unwrap();
        f.set_output_extent(Some([0, 1, 0, 1, 2, 2])).unwrap();
        f.set_output_scalar_kind(Some(ScalarKind::UInt16));
        let mean = f.execute(&input, None).unwrap();
        f.set_slab_mode(SlabMode::Sum);
        let sum = f.execute(&input, None).unwrap();
        let s = sum.image.value(0, 0, 2, 0).unwrap();
        assert_eq!(s, 400.0);
        assert_eq!(mean.image.value(0, 0, 2, 0), Some((s / 3.0 + 0.5).floor()));
    }

    #[test]
    fn test_slab_min_max() {
        let input = slab_input();
        let mut f = Reslice::new();
        f.set_slab_number_of_slices(3).unwrap();
        f.set_output_extent(Some([0, 1, 0, 1, 2, 2])).unwrap();
        f.set_slab_mode(SlabMode::Max);
        let out = f.execute(&input, None).unwrap();
        assert_eq!(out.image.value(0, 0, 2, 0), Some(200.0));
        f.set_slab_mode(SlabMode::Min);
        let out = f.execute(&input, None).unwrap();
        assert_eq!(out.image.value(0, 0, 2, 0), Some(100.0));
    }

    #[test]
    fn test_nearest_downgrade_bit_exact() {
        let input = gradient_u16();
        let mut cubic = Reslice::new();
        cubic.set_interpolation_mode(InterpolationMode::Cubic);
        cubic.set_reslice_axes_origin([1.0, 0.0, 0.0]);
        let downgraded = cubic.execute(&input, None).unwrap();

        let mut nearest = Reslice::new();
        nearest.set_reslice_axes_origin([1.0, 0.0, 0.0]);
        let reference = nearest.execute(&input, None).unwrap();
        assert_eq!(
            downgraded.image.scalars::<u16>(),
            reference.image.scalars::<u16>()
        );

        // the downgrade changes nothing: full cubic agrees on the grid
        cubic.set_optimization(false);
        let full = cubic.execute(&input, None).unwrap();
        assert_eq!(full.image.scalars::<u16>(), reference.image.scalars::<u16>());
    }

    #[test]
    fn test_auto_crop_flush_bounds() {
        let c = 30f64.to_radians().cos();
        let s = 30f64.to_radians().sin();
        #[rustfmt::skip]
        let dir = Matrix3::from_row_slice(&[
            c,  -s,  0.0,
            s,   c,  0.0,
            0.0, 0.0, 1.0,
        ]);
        let info = ImageInfo::new([0, 9, 0, 9, 0, 9])
            .with_direction(dir)
            .with_origin([5.0, -3.0, 2.0]);
        let mut f = Reslice::new();
        f.set_auto_crop_output(true);
        f.set_output_direction(Some(Matrix3::identity()));
        let out = f.output_info(&info).unwrap();

        let to_world = info.index_to_world();
        let mut lo = [f64::INFINITY; 3];
        for corner in extent_corners(&info.extent) {
            let w = to_world * Vector4::new(corner.x, corner.y, corner.z, 1.0);
            for i in 0..3 {
                lo[i] = lo[i].min(w[i]);
                // every mapped corner lies inside the output bounds
                assert!(w[i] >= out.origin[i] - 1e-9);
                assert!(
                    w[i] <= out.origin[i]
                        + out.spacing[i] * (out.extent[2 * i + 1] - out.extent[2 * i]) as f64
                        + out.spacing[i]
                );
            }
        }
        // and the box sits flush against the lower corner
        for i in 0..3 {
            assert_relative_eq!(lo[i], out.origin[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_input_stencil_gates_output() {
        let input = gradient_u16();
        let stencil =
            Stencil::from_fn([0, 3, 0, 3, 0, 3], |x, y, z| (x + y + z) % 2 == 0).unwrap();
        for optimization in [true, false] {
            let mut f = Reslice::new();
            f.set_optimization(optimization);
            f.set_background_color([9.0, 0.0, 0.0, 0.0]);
            let masked = f.execute(&input, Some(&stencil)).unwrap();
            let unmasked = f.execute(&input, None).unwrap();
            for z in 0..4i64 {
                for y in 0..4i64 {
                    for x in 0..4i64 {
                        let expect = if stencil.contains(x, y, z) {
                            unmasked.image.value(x, y, z, 0)
                        } else {
                            Some(9.0)
                        };
                        assert_eq!(masked.image.value(x, y, z, 0), expect);
                    }
                }
            }
        }
    }

    #[test]
    fn test_generated_stencil_marks_in_bounds_voxels() {
        let input = gradient_u16();
        for optimization in [true, false] {
            let mut f = Reslice::new();
            f.set_optimization(optimization);
            f.set_interpolation_mode(InterpolationMode::Linear);
            f.set_reslice_axes_origin([2.2, 0.0, 0.0]);
            f.set_generate_stencil_output(true);
            let out = f.execute(&input, None).unwrap();
            let st = out.stencil.unwrap();
            for z in 0..4i64 {
                for y in 0..4i64 {
                    for x in 0..4i64 {
                        // x + 2.2 stays within the bordered extent up to x = 1
                        assert_eq!(st.contains(x, y, z), x <= 1, "at ({x},{y},{z})");
                    }
                }
            }
        }
    }

    #[test]
    fn test_path_equivalence_fractional_shift() {
        let input = gradient_u16();
        for mode in [
            InterpolationMode::Nearest,
            InterpolationMode::Linear,
            InterpolationMode::Cubic,
        ] {
            let mut f = Reslice::new();
            f.set_interpolation_mode(mode);
            f.set_reslice_axes_origin([0.5, 0.25, 0.0]);
            let permute = f.execute(&input, None).unwrap();
            f.set_optimization(false);
            let general = f.execute(&input, None).unwrap();
            assert_eq!(
                permute.image.scalars::<u16>(),
                general.image.scalars::<u16>(),
                "paths disagree for {mode:?}"
            );
        }
    }

    #[test]
    fn test_split_modes_are_byte_identical() {
        let c = 10f64.to_radians().cos();
        let s = 10f64.to_radians().sin();
        #[rustfmt::skip]
        let axes = Matrix4::from_row_slice(&[
            c,  -s,  0.0, 0.3,
            s,   c,  0.0, 0.0,
            0.0, 0.0, 1.0, 0.1,
            0.0, 0.0, 0.0, 1.0,
        ]);
        let info = ImageInfo::new([0, 7, 0, 7, 0, 7]);
        let input = Image::from_fn(info, 1, |x, y, z, _| (64 * z + 8 * y + x) as f32).unwrap();
        let mut outputs = Vec::new();
        for split in [SplitMode::Slice, SplitMode::Beam, SplitMode::Block] {
            let mut f = Reslice::new();
            f.set_interpolation_mode(InterpolationMode::Linear);
            f.set_reslice_axes(axes);
            f.set_split_mode(split);
            let out = f.execute(&input, None).unwrap();
            outputs.push(out.image.scalars::<f32>().unwrap().to_vec());
        }
        assert_eq!(outputs[0], outputs[1]);
        assert_eq!(outputs[0], outputs[2]);
    }

    #[test]
    fn test_wrap_border() {
        let info = ImageInfo::new([0, 3, 0, 0, 0, 0]);
        let input = Image::from_fn(info, 1, |x, _, _, _| x as u8).unwrap();
        let mut f = Reslice::new();
        f.set_wrap(true);
        f.set_reslice_axes_origin([-1.0, 0.0, 0.0]);
        let out = f.execute(&input, None).unwrap();
        assert_eq!(out.image.value(0, 0, 0, 0), Some(3.0));
        assert_eq!(out.image.value(1, 0, 0, 0), Some(0.0));
        assert_eq!(out.image.value(3, 0, 0, 0), Some(2.0));
    }

    #[test]
    fn test_mirror_border() {
        let info = ImageInfo::new([0, 3, 0, 0, 0, 0]);
        let input = Image::from_fn(info, 1, |x, _, _, _| x as u8).unwrap();
        let mut f = Reslice::new();
        f.set_mirror(true);
        f.set_reslice_axes_origin([-2.0, 0.0, 0.0]);
        let out = f.execute(&input, None).unwrap();
        // indices -2, -1 reflect to 1, 0
        assert_eq!(out.image.value(0, 0, 0, 0), Some(1.0));
        assert_eq!(out.image.value(1, 0, 0, 0), Some(0.0));
        assert_eq!(out.image.value(2, 0, 0, 0), Some(0.0));
    }

    #[test]
    fn test_nonlinear_transform_residual() {
        struct ShiftX;
        impl PointTransform for ShiftX {
            fn forward(&self, p: [f64; 3]) -> [f64; 3] {
                [p[0] + 1.0, p[1], p[2]]
            }
            fn inverse(&self, p: [f64; 3]) -> [f64; 3] {
                [p[0] - 1.0, p[1], p[2]]
            }
        }
        let input = gradient_u16();
        let mut f = Reslice::new();
        f.set_reslice_transform(Some(Arc::new(ShiftX)));
        f.set_background_color([7.0, 0.0, 0.0, 0.0]);
        let out = f.execute(&input, None).unwrap();
        for x in 0..3i64 {
            assert_eq!(out.image.value(x, 1, 1, 0), input.value(x + 1, 1, 1, 0));
        }
        assert_eq!(out.image.value(3, 1, 1, 0), Some(7.0));
    }

    #[test]
    fn test_scalar_shift_scale() {
        let info = ImageInfo::new([0, 3, 0, 0, 0, 0]);
        let input = Image::from_fn(info, 1, |x, _, _, _| x as u8).unwrap();
        let mut f = Reslice::new();
        f.set_scalar_shift(10.0);
        f.set_scalar_scale(2.0);
        let out = f.execute(&input, None).unwrap();
        for x in 0..4i64 {
            assert_eq!(out.image.value(x, 0, 0, 0), Some(((x + 10) * 2) as f64));
        }
    }

    #[test]
    fn test_output_kind_conversion_clamps() {
        let input = gradient_u16();
        let mut f = Reslice::new();
        f.set_output_scalar_kind(Some(ScalarKind::UInt8));
        let out = f.execute(&input, None).unwrap();
        assert_eq!(out.image.kind(), ScalarKind::UInt8);
        assert_eq!(out.image.value(3, 3, 0, 0), Some(33.0));
        // 100*3 + 10*3 + 3 saturates
        assert_eq!(out.image.value(3, 3, 3, 0), Some(255.0));
    }

    #[test]
    fn test_border_off_rejects_outside_samples() {
        let info = ImageInfo::new([0, 3, 0, 0, 0, 0]);
        let input = Image::from_fn(info, 1, |x, _, _, _| (x + 1) as u8).unwrap();
        let mut f = Reslice::new();
        f.set_reslice_axes_origin([0.4, 0.0, 0.0]);
        f.set_background_color([99.0, 0.0, 0.0, 0.0]);
        let with_border = f.execute(&input, None).unwrap();
        assert_eq!(with_border.image.value(3, 0, 0, 0), Some(4.0));
        f.set_border(false);
        let without = f.execute(&input, None).unwrap();
        assert_eq!(without.image.value(3, 0, 0, 0), Some(99.0));
    }

    #[test]
    fn test_output_dimensionality_collapse() {
        let input = gradient_u16();
        let mut f = Reslice::new();
        f.set_output_dimensionality(2).unwrap();
        let out = f.execute(&input, None).unwrap();
        assert_eq!(&out.image.info().extent[4..6], &[0, 0]);
        assert_eq!(out.image.value(2, 1, 0, 0), input.value(2, 1, 0, 0));
    }

    #[test]
    fn test_information_input_borrows_geometry() {
        let input = gradient_u16();
        let template = Image::new(
            ImageInfo::new([0, 1, 0, 1, 0, 1]).with_spacing([2.0, 2.0, 2.0]),
            ScalarKind::UInt8,
            1,
        )
        .unwrap();
        let mut f = Reslice::new();
        f.set_information_input(Some(&template));
        let out = f.execute(&input, None).unwrap();
        assert_eq!(out.image.info().extent, [0, 1, 0, 1, 0, 1]);
        assert_eq!(out.image.info().spacing, [2.0, 2.0, 2.0]);
        // output voxel (1,0,0) sits at world x=2 and samples input index 2
        assert_eq!(out.image.value(1, 0, 0, 0), input.value(2, 0, 0, 0));
    }

    #[test]
    fn test_parameter_validation() {
        let mut f = Reslice::new();
        assert!(f.set_output_dimensionality(4).is_err());
        assert!(f.set_output_dimensionality(0).is_err());
        assert!(f.set_slab_number_of_slices(0).is_err());
        assert!(f.set_slab_slice_spacing_fraction(0.0).is_err());
        assert!(f.set_slab_slice_spacing_fraction(1.5).is_err());
        assert!(f.set_output_spacing(Some([0.0, 1.0, 1.0])).is_err());
        assert!(f.set_border_thickness(-1.0).is_err());
        assert!(f.set_output_extent(Some([3, 0, 0, 0, 0, 0])).is_err());
        // the filter still works after refused settings
        assert!(f.execute(&gradient_u16(), None).is_ok());
    }

    #[test]
    fn test_mtime_tracks_parameters_and_collaborators() {
        let mut f = Reslice::new();
        let t0 = f.mtime();
        f.set_scalar_shift(1.0);
        let t1 = f.mtime();
        assert!(t1 > t0);
        let transform = Arc::new(MatrixTransform::new(Matrix4::identity()).unwrap());
        let tt = transform.mtime();
        f.set_reslice_transform(Some(transform));
        assert!(f.mtime() >= tt);
        let template = gradient_u16();
        let tm = template.mtime();
        f.set_information_input(Some(&template));
        assert!(f.mtime() >= tm);
    }

    #[test]
    fn test_resample_to_output_covers_input() {
        let info = ImageInfo::new([0, 7, 0, 7, 0, 7]).with_spacing([1.0, 1.0, 1.0]);
        let input = Image::from_fn(info, 1, |x, y, z, _| (x + y + z) as f32).unwrap();
        let out = resample_to_output(&input, [2.0, 2.0, 2.0], InterpolationMode::Linear).unwrap();
        assert_eq!(out.image.info().spacing, [2.0, 2.0, 2.0]);
        // voxel count shrinks roughly by 8
        assert!(crate::image::extent_num_voxels(&out.image.info().extent) <= 5 * 5 * 5);
    }

    #[test]
    fn test_resample_from_to_matches_manual_filter() {
        let input = gradient_u16();
        let target = ImageInfo::new([0, 1, 0, 1, 0, 1]).with_origin([1.0, 1.0, 1.0]);
        let out = resample_from_to(&input, &target, InterpolationMode::Nearest).unwrap();
        assert_eq!(out.image.value(0, 0, 0, 0), input.value(1, 1, 1, 0));
        assert_eq!(out.image.value(1, 1, 1, 0), input.value(2, 2, 2, 0));
    }

    #[test]
    fn test_generated_stencil_with_input_stencil() {
        let input = gradient_u16();
        let mask = Stencil::from_fn([0, 3, 0, 3, 0, 3], |x, _, _| x >= 1).unwrap();
        let mut f = Reslice::new();
        f.set_generate_stencil_output(true);
        let out = f.execute(&input, Some(&mask)).unwrap();
        let st = out.stencil.unwrap();
        // marked voxels are exactly the in-bounds voxels inside the mask
        for z in 0..4i64 {
            for y in 0..4i64 {
                for x in 0..4i64 {
                    assert_eq!(st.contains(x, y, z), x >= 1);
                }
            }
        }
    }
}
