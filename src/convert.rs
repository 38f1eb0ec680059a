//! Conversion from the engine's f64 working values to the output scalar
//! kind: optional shift/scale rescale, saturating clamp, and half-up
//! rounding for the integer kinds.

use crate::image::{Scalar, ScalarKind};
use crate::interp::InterpolationMode;
use crate::slab::SlabMode;

/// Converts interpolated values to one output kind for a whole pass.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Converter {
    shift: f64,
    scale: f64,
    clamp: Option<(f64, f64)>,
    round: bool,
}

impl Converter {
    pub fn new(out_kind: ScalarKind, shift: f64, scale: f64, clamp: bool) -> Converter {
        Converter {
            shift,
            scale,
            clamp: if clamp && !out_kind.is_float() {
                Some(out_kind.range())
            } else {
                None
            },
            round: !out_kind.is_float(),
        }
    }

    pub fn convert<T: Scalar>(&self, v: f64) -> T {
        let mut v = (v + self.shift) * self.scale;
        if let Some((lo, hi)) = self.clamp {
            v = v.clamp(lo, hi);
        }
        if self.round {
            v = (v + 0.5).floor();
        }
        T::from_f64(v)
    }

    pub fn convert_row<T: Scalar>(&self, src: &[f64], dst: &mut [T]) {
        for (d, s) in dst.iter_mut().zip(src) {
            *d = self.convert(*s);
        }
    }
}

/// Whether conversion must clamp. Clamping is skipped when the kernel
/// cannot produce values outside the input range and that range fits the
/// output type, and always for floating-point outputs.
pub(crate) fn needs_clamp(
    in_kind: ScalarKind,
    out_kind: ScalarKind,
    mode: InterpolationMode,
    slab_mode: SlabMode,
    has_rescale: bool,
) -> bool {
    if out_kind.is_float() {
        return false;
    }
    if has_rescale {
        return true;
    }
    let (in_lo, in_hi) = in_kind.range();
    let (out_lo, out_hi) = out_kind.range();
    let fits = in_lo >= out_lo && in_hi <= out_hi;
    // nearest and linear stay within the convex hull of the inputs;
    // cubic overshoots and slab sums grow beyond the input range
    !(fits && mode <= InterpolationMode::Linear && slab_mode != SlabMode::Sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_up() {
        let c = Converter::new(ScalarKind::Int16, 0.0, 1.0, true);
        assert_eq!(c.convert::<i16>(1.5), 2);
        assert_eq!(c.convert::<i16>(2.49), 2);
        assert_eq!(c.convert::<i16>(-0.5), 0);
        assert_eq!(c.convert::<i16>(-0.51), -1);
    }

    #[test]
    fn test_clamp_saturates() {
        let c = Converter::new(ScalarKind::UInt8, 0.0, 1.0, true);
        assert_eq!(c.convert::<u8>(300.0), 255);
        assert_eq!(c.convert::<u8>(-7.0), 0);
        let c = Converter::new(ScalarKind::Int8, 0.0, 1.0, true);
        assert_eq!(c.convert::<i8>(-1000.0), -128);
    }

    #[test]
    fn test_shift_scale_order() {
        let c = Converter::new(ScalarKind::Float64, 10.0, 2.0, false);
        assert_eq!(c.convert::<f64>(5.0), 30.0);
    }

    #[test]
    fn test_float_output_not_rounded() {
        let c = Converter::new(ScalarKind::Float32, 0.0, 1.0, false);
        assert_eq!(c.convert::<f32>(1.25), 1.25);
    }

    #[test]
    fn test_needs_clamp_rules() {
        use InterpolationMode::*;
        use SlabMode::*;
        // same type, linear: convex combination always fits
        assert!(!needs_clamp(ScalarKind::UInt8, ScalarKind::UInt8, Linear, Mean, false));
        // cubic overshoots
        assert!(needs_clamp(ScalarKind::UInt8, ScalarKind::UInt8, Cubic, Mean, false));
        // sum grows past the range
        assert!(needs_clamp(ScalarKind::UInt8, ScalarKind::UInt8, Nearest, Sum, false));
        // narrowing conversion
        assert!(needs_clamp(ScalarKind::Int16, ScalarKind::UInt8, Nearest, Mean, false));
        // float output never clamps
        assert!(!needs_clamp(ScalarKind::Int16, ScalarKind::Float32, Cubic, Sum, true));
        // rescale can push anything out of range
        assert!(needs_clamp(ScalarKind::UInt8, ScalarKind::UInt8, Nearest, Mean, true));
    }

    #[test]
    fn test_convert_row() {
        let c = Converter::new(ScalarKind::UInt8, 0.0, 1.0, true);
        let src = [0.4, 0.6, 255.9, -3.0];
        let mut dst = [0u8; 4];
        c.convert_row(&src, &mut dst);
        assert_eq!(dst, [0, 1, 255, 0]);
    }
}
