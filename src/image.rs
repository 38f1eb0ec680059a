//! Voxel image container: a regularly spaced grid carrying one or more
//! numeric components per voxel, stored X-fastest with components
//! interleaved, plus the geometry (extent, spacing, origin, direction
//! cosines) that places it in world space.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use nalgebra::{Matrix3, Matrix4};
use ndarray::{Array4, ArrayView4};

use crate::error::{Error, Result};

/// Closed integer voxel range per axis: `[x0, x1, y0, y1, z0, z1]`.
pub type Extent = [i64; 6];

/// Number of voxels along each axis of `extent`.
pub fn extent_dims(extent: &Extent) -> [usize; 3] {
    [
        (extent[1] - extent[0] + 1).max(0) as usize,
        (extent[3] - extent[2] + 1).max(0) as usize,
        (extent[5] - extent[4] + 1).max(0) as usize,
    ]
}

pub fn extent_num_voxels(extent: &Extent) -> usize {
    let d = extent_dims(extent);
    d[0] * d[1] * d[2]
}

pub fn extent_contains(extent: &Extent, x: i64, y: i64, z: i64) -> bool {
    x >= extent[0] && x <= extent[1] && y >= extent[2] && y <= extent[3] && z >= extent[4] && z <= extent[5]
}

pub(crate) fn check_extent(extent: &Extent) -> Result<()> {
    for axis in 0..3 {
        if extent[2 * axis + 1] < extent[2 * axis] {
            return Err(Error::InvertedExtent(extent[2 * axis], extent[2 * axis + 1], axis));
        }
    }
    Ok(())
}

static MTIME: AtomicU64 = AtomicU64::new(1);

/// Monotonic modification counter shared by images, transforms and filters.
pub fn next_mtime() -> u64 {
    MTIME.fetch_add(1, Ordering::Relaxed)
}

mod private {
    pub trait Sealed {}
}

/// Runtime tag for the numeric kinds a voxel buffer may carry.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ScalarKind {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
}

impl ScalarKind {
    pub fn size(self) -> usize {
        match self {
            ScalarKind::Int8 | ScalarKind::UInt8 => 1,
            ScalarKind::Int16 | ScalarKind::UInt16 => 2,
            ScalarKind::Int32 | ScalarKind::UInt32 | ScalarKind::Float32 => 4,
            ScalarKind::Float64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarKind::Float32 | ScalarKind::Float64)
    }

    /// Representable value range, as f64. Unbounded for the float kinds.
    pub fn range(self) -> (f64, f64) {
        match self {
            ScalarKind::Int8 => (i8::MIN as f64, i8::MAX as f64),
            ScalarKind::UInt8 => (u8::MIN as f64, u8::MAX as f64),
            ScalarKind::Int16 => (i16::MIN as f64, i16::MAX as f64),
            ScalarKind::UInt16 => (u16::MIN as f64, u16::MAX as f64),
            ScalarKind::Int32 => (i32::MIN as f64, i32::MAX as f64),
            ScalarKind::UInt32 => (u32::MIN as f64, u32::MAX as f64),
            ScalarKind::Float32 | ScalarKind::Float64 => (f64::NEG_INFINITY, f64::INFINITY),
        }
    }
}

/// The numeric kinds a voxel may be stored as. Sealed: the engine
/// dispatches over `ScalarKind` and the set must stay in sync.
pub trait Scalar:
    private::Sealed + Copy + Default + PartialOrd + Send + Sync + Debug + 'static
{
    const KIND: ScalarKind;

    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;

    fn slice(data: &VoxelData) -> Option<&[Self]>;
    fn slice_mut(data: &mut VoxelData) -> Option<&mut [Self]>;
    fn into_data(v: Vec<Self>) -> VoxelData;
}

macro_rules! impl_scalar {
    ($ty:ty, $kind:ident) => {
        impl private::Sealed for $ty {}
        impl Scalar for $ty {
            const KIND: ScalarKind = ScalarKind::$kind;

            fn from_f64(v: f64) -> $ty {
                v as $ty
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn slice(data: &VoxelData) -> Option<&[$ty]> {
                match data {
                    VoxelData::$kind(v) => Some(v),
                    _ => None,
                }
            }

            fn slice_mut(data: &mut VoxelData) -> Option<&mut [$ty]> {
                match data {
                    VoxelData::$kind(v) => Some(v),
                    _ => None,
                }
            }

            fn into_data(v: Vec<$ty>) -> VoxelData {
                VoxelData::$kind(v)
            }
        }
    };
}

impl_scalar!(i8, Int8);
impl_scalar!(u8, UInt8);
impl_scalar!(i16, Int16);
impl_scalar!(u16, UInt16);
impl_scalar!(i32, Int32);
impl_scalar!(u32, UInt32);
impl_scalar!(f32, Float32);
impl_scalar!(f64, Float64);

/// Expands to a `match` over a [`ScalarKind`], binding the corresponding
/// concrete type to `$T` in each arm.
macro_rules! dispatch_kind {
    ($kind:expr, $T:ident => $body:expr) => {
        match $kind {
            $crate::image::ScalarKind::Int8 => {
                type $T = i8;
                $body
            }
            $crate::image::ScalarKind::UInt8 => {
                type $T = u8;
                $body
            }
            $crate::image::ScalarKind::Int16 => {
                type $T = i16;
                $body
            }
            $crate::image::ScalarKind::UInt16 => {
                type $T = u16;
                $body
            }
            $crate::image::ScalarKind::Int32 => {
                type $T = i32;
                $body
            }
            $crate::image::ScalarKind::UInt32 => {
                type $T = u32;
                $body
            }
            $crate::image::ScalarKind::Float32 => {
                type $T = f32;
                $body
            }
            $crate::image::ScalarKind::Float64 => {
                type $T = f64;
                $body
            }
        }
    };
}
pub(crate) use dispatch_kind;

/// Flat voxel storage tagged by scalar kind. Layout is X-fastest with
/// components interleaved: `(((z*ny + y)*nx + x)*nc + c)`.
#[derive(Clone, Debug)]
pub enum VoxelData {
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

impl VoxelData {
    /// A zero-filled buffer of `len` scalars. Allocation failure is
    /// reported instead of aborting.
    pub fn zeros(kind: ScalarKind, len: usize) -> Result<VoxelData> {
        dispatch_kind!(kind, T => {
            let mut v: Vec<T> = Vec::new();
            v.try_reserve_exact(len)?;
            v.resize(len, T::default());
            Ok(T::into_data(v))
        })
    }

    pub fn kind(&self) -> ScalarKind {
        match self {
            VoxelData::Int8(_) => ScalarKind::Int8,
            VoxelData::UInt8(_) => ScalarKind::UInt8,
            VoxelData::Int16(_) => ScalarKind::Int16,
            VoxelData::UInt16(_) => ScalarKind::UInt16,
            VoxelData::Int32(_) => ScalarKind::Int32,
            VoxelData::UInt32(_) => ScalarKind::UInt32,
            VoxelData::Float32(_) => ScalarKind::Float32,
            VoxelData::Float64(_) => ScalarKind::Float64,
        }
    }

    pub fn len(&self) -> usize {
        dispatch_kind!(self.kind(), T => <T as Scalar>::slice(self).map_or(0, |s| s.len()))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Grid geometry: which voxels exist and where they sit in world space.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageInfo {
    pub extent: Extent,
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
    /// Direction cosines mapping index axes to world axes; orthonormal,
    /// not required to be identity.
    pub direction: Matrix3<f64>,
}

impl ImageInfo {
    pub fn new(extent: Extent) -> ImageInfo {
        ImageInfo {
            extent,
            spacing: [1.0; 3],
            origin: [0.0; 3],
            direction: Matrix3::identity(),
        }
    }

    pub fn with_spacing(mut self, spacing: [f64; 3]) -> ImageInfo {
        self.spacing = spacing;
        self
    }

    pub fn with_origin(mut self, origin: [f64; 3]) -> ImageInfo {
        self.origin = origin;
        self
    }

    pub fn with_direction(mut self, direction: Matrix3<f64>) -> ImageInfo {
        self.direction = direction;
        self
    }

    pub fn dims(&self) -> [usize; 3] {
        extent_dims(&self.extent)
    }

    pub fn num_voxels(&self) -> usize {
        extent_num_voxels(&self.extent)
    }

    /// Homogeneous index -> world transform: `direction * diag(spacing)`
    /// plus the origin translation.
    pub fn index_to_world(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        for i in 0..3 {
            for j in 0..3 {
                m[(i, j)] = self.direction[(i, j)] * self.spacing[j];
            }
            m[(i, 3)] = self.origin[i];
        }
        m
    }

    pub fn world_to_index(&self) -> Result<Matrix4<f64>> {
        self.index_to_world().try_inverse().ok_or(Error::SingularMatrix)
    }
}

/// A voxel image: geometry plus an interleaved scalar buffer.
#[derive(Clone, Debug)]
pub struct Image {
    info: ImageInfo,
    num_components: usize,
    data: VoxelData,
    mtime: u64,
}

impl Image {
    /// A zero-filled image covering `info.extent`.
    pub fn new(info: ImageInfo, kind: ScalarKind, num_components: usize) -> Result<Image> {
        check_extent(&info.extent)?;
        let len = info.num_voxels() * num_components;
        Ok(Image {
            data: VoxelData::zeros(kind, len)?,
            info,
            num_components,
            mtime: next_mtime(),
        })
    }

    pub fn from_vec<T: Scalar>(info: ImageInfo, num_components: usize, v: Vec<T>) -> Result<Image> {
        check_extent(&info.extent)?;
        let nvox = info.num_voxels();
        if v.len() != nvox * num_components {
            return Err(Error::BufferLength(v.len(), nvox, num_components));
        }
        Ok(Image {
            info,
            num_components,
            data: T::into_data(v),
            mtime: next_mtime(),
        })
    }

    /// Build an image by evaluating `f(x, y, z, component)` over the extent,
    /// with `x`, `y`, `z` in extent coordinates.
    pub fn from_fn<T, F>(info: ImageInfo, num_components: usize, mut f: F) -> Result<Image>
    where
        T: Scalar,
        F: FnMut(i64, i64, i64, usize) -> T,
    {
        check_extent(&info.extent)?;
        let e = info.extent;
        let mut v = Vec::new();
        v.try_reserve_exact(info.num_voxels() * num_components)?;
        for z in e[4]..=e[5] {
            for y in e[2]..=e[3] {
                for x in e[0]..=e[1] {
                    for c in 0..num_components {
                        v.push(f(x, y, z, c));
                    }
                }
            }
        }
        Image::from_vec(info, num_components, v)
    }

    /// Adopt an ndarray volume with axes `[z, y, x, component]`.
    pub fn from_array<T: Scalar>(info: ImageInfo, array: Array4<T>) -> Result<Image> {
        let num_components = array.shape()[3];
        let array = if array.is_standard_layout() {
            array
        } else {
            array.as_standard_layout().to_owned()
        };
        Image::from_vec(info, num_components, array.into_raw_vec())
    }

    /// View the buffer as an ndarray with axes `[z, y, x, component]`.
    pub fn view<T: Scalar>(&self) -> Option<ArrayView4<'_, T>> {
        let [nx, ny, nz] = self.info.dims();
        let s = T::slice(&self.data)?;
        ArrayView4::from_shape((nz, ny, nx, self.num_components), s).ok()
    }

    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    pub fn kind(&self) -> ScalarKind {
        self.data.kind()
    }

    pub fn num_components(&self) -> usize {
        self.num_components
    }

    pub fn data(&self) -> &VoxelData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut VoxelData {
        self.mtime = next_mtime();
        &mut self.data
    }

    pub fn scalars<T: Scalar>(&self) -> Option<&[T]> {
        T::slice(&self.data)
    }

    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    /// Scalar value at an extent coordinate, as f64.
    pub fn value(&self, x: i64, y: i64, z: i64, component: usize) -> Option<f64> {
        if !extent_contains(&self.info.extent, x, y, z) || component >= self.num_components {
            return None;
        }
        let [nx, ny, _] = self.info.dims();
        let e = &self.info.extent;
        let idx = ((((z - e[4]) as usize * ny + (y - e[2]) as usize) * nx
            + (x - e[0]) as usize)
            * self.num_components)
            + component;
        dispatch_kind!(self.kind(), T => <T as Scalar>::slice(&self.data).map(|s| s[idx].to_f64()))
    }
}
