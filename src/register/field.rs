//! Fixed-point bit-fields inside 32-bit register words.
//!
//! A value is encoded as `raw = round(value * norm)`, rounding half away from zero, and then
//! saturated to the range the field can represent: `-(2^(w-1)) ..= 2^(w-1) - 1` for signed fields
//! and `0 ..= 2^w - 1` for unsigned ones. Out of range values are never wrapped. `NaN` encodes as
//! zero. Decoding extracts the bits, sign-extends signed fields and divides by `norm`, so any
//! representable value comes back within `0.5 / |norm|`.

use thiserror::Error;

/// Number of bits in one register word
pub const WORD_BITS: u8 = 32;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum Error {
    #[error("Fields must be at least one bit wide")]
    ZeroWidth,
    #[error("A {width} bit field shifted by {shift} overruns the 32 bit word")]
    FieldOverrun { width: u8, shift: u8 },
    #[error("Scale factor {0} must be finite and nonzero")]
    BadNorm(f64),
    #[error("Clamp bounds [{min}, {max}] are not an interval")]
    BadBounds { min: f64, max: f64 },
}

/// The location and conversion rule of one value inside a register word
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Field {
    width: u8,
    shift: u8,
    signed: bool,
    norm: f64,
    /// Optional limits applied to the semantic value before scaling
    bounds: Option<(f64, f64)>,
}

impl Field {
    /// Describe a `width` bit field starting at bit `shift`, scaled by `norm`
    /// # Errors
    /// Returns an error if the field doesn't fit in a word or `norm` is zero or not finite
    pub fn new(width: u8, shift: u8, signed: bool, norm: f64) -> Result<Self, Error> {
        if width == 0 {
            return Err(Error::ZeroWidth);
        }
        if u16::from(width) + u16::from(shift) > u16::from(WORD_BITS) {
            return Err(Error::FieldOverrun { width, shift });
        }
        if norm == 0.0 || !norm.is_finite() {
            return Err(Error::BadNorm(norm));
        }
        Ok(Self {
            width,
            shift,
            signed,
            norm,
            bounds: None,
        })
    }

    /// A single unsigned, unscaled bit
    /// # Errors
    /// Returns an error if `bit` is not inside the word
    pub fn boolean(bit: u8) -> Result<Self, Error> {
        Self::new(1, bit, false, 1.0)
    }

    /// Restrict the semantic value to `[min, max]` before it is scaled
    /// # Errors
    /// Returns an error if either bound is `NaN` or `min > max`
    pub fn with_bounds(mut self, min: f64, max: f64) -> Result<Self, Error> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(Error::BadBounds { min, max });
        }
        self.bounds = Some((min, max));
        Ok(self)
    }

    #[must_use]
    pub fn width(&self) -> u8 {
        self.width
    }

    #[must_use]
    pub fn shift(&self) -> u8 {
        self.shift
    }

    #[must_use]
    pub fn signed(&self) -> bool {
        self.signed
    }

    #[must_use]
    pub fn norm(&self) -> f64 {
        self.norm
    }

    #[must_use]
    pub fn bounds(&self) -> Option<(f64, f64)> {
        self.bounds
    }

    fn width_mask(&self) -> u32 {
        u32::MAX >> (WORD_BITS - self.width)
    }

    /// The bits this field occupies within the word
    #[must_use]
    pub fn mask(&self) -> u32 {
        self.width_mask() << self.shift
    }

    /// Smallest representable raw code
    #[must_use]
    pub fn min_raw(&self) -> i64 {
        if self.signed {
            -(1i64 << (self.width - 1))
        } else {
            0
        }
    }

    /// Largest representable raw code
    #[must_use]
    pub fn max_raw(&self) -> i64 {
        if self.signed {
            (1i64 << (self.width - 1)) - 1
        } else {
            (1i64 << self.width) - 1
        }
    }

    /// Saturate the integer `raw` to the field and place it at its shift
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn encode_raw(&self, raw: i64) -> u32 {
        let raw = raw.clamp(self.min_raw(), self.max_raw());
        // Truncating keeps the two's complement pattern of negative codes
        ((raw as u32) & self.width_mask()) << self.shift
    }

    /// Scale, round and saturate `value`, then place it at the field's shift
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self, value: f64) -> u32 {
        let value = match self.bounds {
            Some((min, max)) => value.clamp(min, max),
            None => value,
        };
        // Float to int `as` saturates and sends NaN to zero
        self.encode_raw((value * self.norm).round() as i64)
    }

    /// Extract the raw code from `word`, sign-extending signed fields
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn decode_raw(&self, word: u32) -> i64 {
        let raw = (word >> self.shift) & self.width_mask();
        if self.signed {
            let unused = u32::from(WORD_BITS - self.width);
            i64::from(((raw << unused) as i32) >> unused)
        } else {
            i64::from(raw)
        }
    }

    /// Extract and unscale the value held in `word`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn decode(&self, word: u32) -> f64 {
        self.decode_raw(word) as f64 / self.norm
    }

    /// Replace this field's bits of `word` with an encoded `field`, leaving the rest untouched
    #[must_use]
    pub fn insert(&self, word: u32, field: u32) -> u32 {
        (word & !self.mask()) | (field & self.mask())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrun_rejected() {
        assert_eq!(
            Field::new(14, 20, true, 8192.0),
            Err(Error::FieldOverrun {
                width: 14,
                shift: 20
            })
        );
        assert!(Field::new(14, 18, true, 8192.0).is_ok());
        assert_eq!(Field::boolean(32), Err(Error::FieldOverrun { width: 1, shift: 32 }));
        assert_eq!(Field::new(0, 0, false, 1.0), Err(Error::ZeroWidth));
    }

    #[test]
    fn test_bad_norm_rejected() {
        assert_eq!(Field::new(8, 0, false, 0.0), Err(Error::BadNorm(0.0)));
        assert!(Field::new(8, 0, false, f64::INFINITY).is_err());
        assert!(Field::new(8, 0, false, f64::NAN).is_err());
        assert!(Field::new(8, 0, false, -4.0).is_ok());
    }

    #[test]
    fn test_signed_14_bit_float() {
        // Sorter threshold geometry: +1.0 is one code past the top, and 0x2000 is -1.0
        let f = Field::new(14, 0, true, 8192.0).unwrap();
        assert_eq!(f.encode(1.0), 0x1FFF);
        assert_eq!(f.encode(-1.0), 0x2000);
        assert_eq!(f.decode(0x2000), -1.0);
        assert_eq!(f.encode(0.5), 0x1000);
        assert_eq!(f.decode(0x1000), 0.5);
    }

    #[test]
    fn test_unsigned_14_bit_float() {
        let f = Field::new(14, 0, false, 8192.0).unwrap();
        assert_eq!(f.encode(1.0), 0x2000);
        assert_eq!(f.decode(0x2000), 1.0);
    }

    #[test]
    fn test_integer_32_bit() {
        let f = Field::new(32, 0, false, 1.0).unwrap();
        assert_eq!(f.encode_raw(42), 42);
        assert_eq!(f.decode_raw(42), 42);
        assert_eq!(f.encode_raw(i64::from(u32::MAX)), u32::MAX);
        assert_eq!(f.decode_raw(u32::MAX), i64::from(u32::MAX));
        assert_eq!(f.mask(), u32::MAX);
    }

    #[test]
    fn test_signed_32_bit() {
        let f = Field::new(32, 0, true, 1.0).unwrap();
        assert_eq!(f.encode_raw(-1), u32::MAX);
        assert_eq!(f.decode_raw(0x8000_0000), i64::from(i32::MIN));
    }

    #[test]
    fn test_boolean_into_full_word() {
        let f = Field::boolean(0).unwrap();
        assert_eq!(f.insert(0xFFFF_FFFE, f.encode_raw(1)), 0xFFFF_FFFF);
        assert_eq!(f.insert(0xFFFF_FFFF, f.encode_raw(0)), 0xFFFF_FFFE);
    }

    #[test]
    fn test_clamping_saturates() {
        let f = Field::new(14, 0, true, 8192.0).unwrap();
        assert_eq!(f.decode_raw(f.encode(100.0)), f.max_raw());
        assert_eq!(f.decode_raw(f.encode(-100.0)), f.min_raw());
        assert_eq!(f.decode_raw(f.encode(f64::INFINITY)), 8191);
        assert_eq!(f.decode_raw(f.encode(f64::NEG_INFINITY)), -8192);

        let u = Field::new(8, 4, false, 1.0).unwrap();
        assert_eq!(u.encode(-3.0), 0);
        assert_eq!(u.encode(1000.0), 0xFF0);
        assert_eq!(u.encode_raw(-1), 0);
        assert_eq!(u.encode_raw(256), 0xFF0);
    }

    #[test]
    fn test_nan_encodes_zero() {
        let f = Field::new(14, 2, true, 8192.0).unwrap();
        assert_eq!(f.encode(f64::NAN), 0);
    }

    #[test]
    fn test_round_half_away_from_zero() {
        let f = Field::new(8, 0, true, 1.0).unwrap();
        assert_eq!(f.decode_raw(f.encode(2.5)), 3);
        assert_eq!(f.decode_raw(f.encode(-2.5)), -3);
        assert_eq!(f.decode_raw(f.encode(0.5)), 1);
        assert_eq!(f.decode_raw(f.encode(-0.5)), -1);
        assert_eq!(f.decode_raw(f.encode(2.49)), 2);
        assert_eq!(f.decode_raw(f.encode(-2.49)), -2);
    }

    #[test]
    fn test_bounds_applied_before_scaling() {
        let f = Field::new(16, 0, false, 10.0)
            .unwrap()
            .with_bounds(0.0, 100.0)
            .unwrap();
        assert_eq!(f.encode(250.0), 1000);
        assert_eq!(f.encode(-5.0), 0);
        assert_eq!(f.encode(42.0), 420);
        assert!(Field::boolean(0).unwrap().with_bounds(1.0, 0.0).is_err());
        assert!(Field::boolean(0).unwrap().with_bounds(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_raw_round_trip_all_geometries() {
        for width in 1..=WORD_BITS {
            for shift in 0..=(WORD_BITS - width) {
                for signed in [false, true] {
                    let f = Field::new(width, shift, signed, 1.0).unwrap();
                    for raw in [f.min_raw(), f.max_raw(), 0, f.max_raw() / 3, f.min_raw() / 3] {
                        let word = f.encode_raw(raw);
                        assert_eq!(word & !f.mask(), 0);
                        assert_eq!(f.decode_raw(word), raw, "w={width} s={shift} signed={signed}");
                    }
                }
            }
        }
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn test_quantization_bound() {
        for (width, signed, norm) in [
            (14, true, 8192.0),
            (14, false, 16384.0 / 360.0),
            (32, false, 4_294_967_296.0 / 125e6),
            (24, true, 1000.0),
            (12, true, -2048.0),
        ] {
            let f = Field::new(width, 0, signed, norm).unwrap();
            let lo = f.min_raw() as f64 / norm;
            let hi = f.max_raw() as f64 / norm;
            let (lo, hi) = (lo.min(hi), lo.max(hi));
            for i in 0..=1000 {
                let v = lo + (hi - lo) * f64::from(i) / 1000.0;
                let err = (f.decode(f.encode(v)) - v).abs();
                let slack = 16.0 * f64::EPSILON * (1.0 + v.abs());
                assert!(err <= 0.5 / norm.abs() + slack, "v={v} err={err}");
            }
        }
    }

    #[test]
    fn test_insert_isolates_neighbours() {
        let f = Field::new(14, 9, true, 8192.0).unwrap();
        let word = 0xA5A5_A5A5;
        let updated = f.insert(word, f.encode(-0.25));
        assert_eq!(updated & !f.mask(), word & !f.mask());
        assert_eq!(f.decode(updated), -0.25);
    }
}
