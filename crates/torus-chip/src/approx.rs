//! 16-bit reduced-precision scalar encoding.
//!
//! Every per-PE word is one [`Approx`] value: an IEEE binary16 stored as
//! its raw bit pattern. Host matrices are full-precision `f32`; they are
//! narrowed on upload and widened on download.
//!
//! Arithmetic semantics match the PE datapath: each operation computes in
//! f32 and re-quantizes the result to 16 bits. A chain of K operations
//! therefore rounds exactly K times — no more, no less. Anything needing
//! tighter precision than that belongs on the host.

use half::f16;

/// One reduced-precision mesh scalar (16-bit storage).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Approx(u16);

impl Approx {
    /// Positive zero.
    pub const ZERO: Self = Self(0);

    /// Encode a host value, rounding to nearest-even.
    #[must_use]
    pub fn from_f32(value: f32) -> Self {
        Self(f16::from_f32(value).to_bits())
    }

    /// Decode to host precision. Exact — every encoded value is
    /// representable in f32.
    #[must_use]
    pub fn to_f32(self) -> f32 {
        f16::from_bits(self.0).to_f32()
    }

    /// Reinterpret a raw 16-bit word as a scalar.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// The raw 16-bit storage word.
    #[must_use]
    pub const fn to_bits(self) -> u16 {
        self.0
    }

    /// Sum, re-quantized to the encoding.
    #[must_use]
    pub fn add(self, rhs: Self) -> Self {
        Self::from_f32(self.to_f32() + rhs.to_f32())
    }

    /// Product, re-quantized to the encoding.
    #[must_use]
    pub fn mul(self, rhs: Self) -> Self {
        Self::from_f32(self.to_f32() * rhs.to_f32())
    }

    /// Quotient, re-quantized to the encoding.
    #[must_use]
    pub fn div(self, rhs: Self) -> Self {
        Self::from_f32(self.to_f32() / rhs.to_f32())
    }
}

impl std::fmt::Display for Approx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_f32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_integers_encode_exactly() {
        // binary16 represents all integers up to 2048 exactly; matrix
        // dimensions and the demo payloads live well inside that range.
        for v in [0.0f32, 1.0, 17.0, 210.0, 1680.0, -14.0] {
            assert_eq!(Approx::from_f32(v).to_f32(), v);
        }
    }

    #[test]
    fn round_trip_is_lossless_after_first_quantization() {
        let once = Approx::from_f32(0.1);
        let twice = Approx::from_f32(once.to_f32());
        assert_eq!(once, twice);
    }

    #[test]
    fn quantization_error_is_bounded() {
        // ~3 decimal digits: relative error under 2^-11 per operation.
        let v = 0.333_333f32;
        let err = (Approx::from_f32(v).to_f32() - v).abs() / v;
        assert!(err < 1.0 / 2048.0, "relative error {err}");
    }

    #[test]
    fn arithmetic_requantizes_each_step() {
        let a = Approx::from_f32(3.0);
        let b = Approx::from_f32(4.0);
        assert_eq!(a.mul(b).to_f32(), 12.0);
        assert_eq!(a.add(b).to_f32(), 7.0);
        assert_eq!(b.div(a).to_f32(), f16::from_f32(4.0 / 3.0).to_f32());
    }

    #[test]
    fn bits_round_trip() {
        let a = Approx::from_f32(-2.5);
        assert_eq!(Approx::from_bits(a.to_bits()), a);
    }
}
