//! Primitive datatypes and their canonical in-memory representation.
//!
//! Coordinates and attribute values are moved around the engine as `u64`
//! *canonical bit patterns* so that per-datatype code paths collapse into a
//! small set of monomorphized routines keyed by `(width, signed, float)`:
//!
//! - signed integers (and `Char`) widen to `i64` and store its bit pattern,
//! - unsigned integers widen to `u64`,
//! - floats widen to `f64` and store `f64::to_bits`.
//!
//! On disk, values occupy exactly [`Datatype::size`] bytes, little-endian.

use crate::error::{Error, Result};
use std::cmp::Ordering;

/// Primitive datatypes supported for dimensions and attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datatype {
    /// ASCII character, 1 byte, signed.
    Char,
    /// 8-bit signed integer.
    Int8,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 8-bit unsigned integer.
    UInt8,
    /// 16-bit unsigned integer.
    UInt16,
    /// 32-bit unsigned integer.
    UInt32,
    /// 64-bit unsigned integer.
    UInt64,
    /// 32-bit IEEE float.
    Float32,
    /// 64-bit IEEE float.
    Float64,
}

impl Datatype {
    /// All datatypes, in tag order.
    pub const ALL: [Datatype; 11] = [
        Datatype::Char,
        Datatype::Int8,
        Datatype::Int16,
        Datatype::Int32,
        Datatype::Int64,
        Datatype::UInt8,
        Datatype::UInt16,
        Datatype::UInt32,
        Datatype::UInt64,
        Datatype::Float32,
        Datatype::Float64,
    ];

    /// Size of one value in bytes.
    pub fn size(self) -> usize {
        match self {
            Datatype::Char | Datatype::Int8 | Datatype::UInt8 => 1,
            Datatype::Int16 | Datatype::UInt16 => 2,
            Datatype::Int32 | Datatype::UInt32 | Datatype::Float32 => 4,
            Datatype::Int64 | Datatype::UInt64 | Datatype::Float64 => 8,
        }
    }

    /// Numeric tag used in on-disk formats.
    pub fn tag(self) -> u8 {
        match self {
            Datatype::Char => 0,
            Datatype::Int8 => 1,
            Datatype::Int16 => 2,
            Datatype::Int32 => 3,
            Datatype::Int64 => 4,
            Datatype::UInt8 => 5,
            Datatype::UInt16 => 6,
            Datatype::UInt32 => 7,
            Datatype::UInt64 => 8,
            Datatype::Float32 => 9,
            Datatype::Float64 => 10,
        }
    }

    /// Inverse of [`Datatype::tag`].
    pub fn from_tag(tag: u8) -> Result<Datatype> {
        Datatype::ALL
            .get(tag as usize)
            .copied()
            .ok_or_else(|| Error::format(format!("unknown datatype tag {tag}")))
    }

    /// Lowercase name, as used in schema descriptions and the CLI.
    pub fn name(self) -> &'static str {
        match self {
            Datatype::Char => "char",
            Datatype::Int8 => "int8",
            Datatype::Int16 => "int16",
            Datatype::Int32 => "int32",
            Datatype::Int64 => "int64",
            Datatype::UInt8 => "uint8",
            Datatype::UInt16 => "uint16",
            Datatype::UInt32 => "uint32",
            Datatype::UInt64 => "uint64",
            Datatype::Float32 => "float32",
            Datatype::Float64 => "float64",
        }
    }

    /// Inverse of [`Datatype::name`].
    pub fn from_name(name: &str) -> Result<Datatype> {
        Datatype::ALL
            .iter()
            .copied()
            .find(|dt| dt.name() == name)
            .ok_or_else(|| Error::schema(format!("unknown datatype `{name}`")))
    }

    /// Whether this is an integer type (`Char` included).
    pub fn is_integer(self) -> bool {
        !self.is_float()
    }

    /// Whether values compare as signed.
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Datatype::Char
                | Datatype::Int8
                | Datatype::Int16
                | Datatype::Int32
                | Datatype::Int64
                | Datatype::Float32
                | Datatype::Float64
        )
    }

    /// Whether this is a floating-point type.
    pub fn is_float(self) -> bool {
        matches!(self, Datatype::Float32 | Datatype::Float64)
    }

    // ------------------------------------------------------------------
    // Canonical bit patterns
    // ------------------------------------------------------------------

    /// Decode one native little-endian value into canonical bits.
    ///
    /// Panics if `bytes` is shorter than [`Datatype::size`]; callers slice
    /// exactly one value.
    pub fn decode(self, bytes: &[u8]) -> u64 {
        match self {
            Datatype::Char | Datatype::Int8 => bytes[0] as i8 as i64 as u64,
            Datatype::Int16 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64 as u64,
            Datatype::Int32 => {
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64 as u64
            }
            Datatype::Int64 => i64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]) as u64,
            Datatype::UInt8 => bytes[0] as u64,
            Datatype::UInt16 => u16::from_le_bytes([bytes[0], bytes[1]]) as u64,
            Datatype::UInt32 => {
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64
            }
            Datatype::UInt64 => u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]),
            Datatype::Float32 => {
                (f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64).to_bits()
            }
            Datatype::Float64 => f64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ])
            .to_bits(),
        }
    }

    /// Encode canonical bits back to native little-endian bytes, appending
    /// exactly [`Datatype::size`] bytes to `out`.
    pub fn encode(self, bits: u64, out: &mut Vec<u8>) {
        match self {
            Datatype::Char | Datatype::Int8 => out.push(bits as i64 as i8 as u8),
            Datatype::Int16 => out.extend_from_slice(&(bits as i64 as i16).to_le_bytes()),
            Datatype::Int32 => out.extend_from_slice(&(bits as i64 as i32).to_le_bytes()),
            Datatype::Int64 => out.extend_from_slice(&(bits as i64).to_le_bytes()),
            Datatype::UInt8 => out.push(bits as u8),
            Datatype::UInt16 => out.extend_from_slice(&(bits as u16).to_le_bytes()),
            Datatype::UInt32 => out.extend_from_slice(&(bits as u32).to_le_bytes()),
            Datatype::UInt64 => out.extend_from_slice(&bits.to_le_bytes()),
            Datatype::Float32 => {
                out.extend_from_slice(&(f64::from_bits(bits) as f32).to_le_bytes())
            }
            Datatype::Float64 => out.extend_from_slice(&f64::from_bits(bits).to_le_bytes()),
        }
    }

    /// Total order on canonical bits.
    pub fn cmp_bits(self, a: u64, b: u64) -> Ordering {
        if self.is_float() {
            f64::from_bits(a).total_cmp(&f64::from_bits(b))
        } else if self.is_signed() {
            (a as i64).cmp(&(b as i64))
        } else {
            a.cmp(&b)
        }
    }

    /// Whether `v` lies within the closed interval `[lo, hi]`.
    pub fn in_range(self, v: u64, lo: u64, hi: u64) -> bool {
        self.cmp_bits(v, lo) != Ordering::Less && self.cmp_bits(v, hi) != Ordering::Greater
    }

    // ------------------------------------------------------------------
    // Index arithmetic (integer datatypes)
    // ------------------------------------------------------------------

    /// Zero-based offset of `v` from `lo`. Integer datatypes only; the
    /// caller has already validated `lo <= v`.
    pub fn index_of(self, v: u64, lo: u64) -> u64 {
        debug_assert!(self.is_integer());
        if self.is_signed() {
            ((v as i64 as i128) - (lo as i64 as i128)) as u64
        } else {
            v.wrapping_sub(lo)
        }
    }

    /// Canonical bits of `lo + idx`. Integer datatypes only.
    pub fn at_index(self, lo: u64, idx: u64) -> u64 {
        debug_assert!(self.is_integer());
        if self.is_signed() {
            ((lo as i64 as i128) + idx as i128) as i64 as u64
        } else {
            lo.wrapping_add(idx)
        }
    }

    /// Number of values in `[lo, hi]`, if it fits in `u64`.
    pub fn range_len(self, lo: u64, hi: u64) -> Option<u64> {
        debug_assert!(self.is_integer());
        let span = if self.is_signed() {
            (hi as i64 as i128) - (lo as i64 as i128)
        } else {
            (hi as i128) - (lo as i128)
        };
        if span < 0 {
            return Some(0);
        }
        u64::try_from(span).ok()?.checked_add(1)
    }

    /// Index of the space tile holding `v`, for a dimension starting at
    /// `lo` with the given extent (a cell count for integers, `f64` bits
    /// for floats).
    pub fn tile_of(self, v: u64, lo: u64, extent: u64) -> u64 {
        if self.is_float() {
            let f = f64::from_bits(v) - f64::from_bits(lo);
            let e = f64::from_bits(extent);
            if f <= 0.0 || e <= 0.0 {
                0
            } else {
                (f / e).floor() as u64
            }
        } else {
            self.index_of(v, lo) / extent.max(1)
        }
    }

    /// Scale `v` into `[0, levels)` for space-filling-curve mapping, so
    /// every dimension contributes equal precision.
    pub fn scale_to(self, v: u64, lo: u64, hi: u64, levels: u64) -> u64 {
        debug_assert!(levels > 0);
        if self.is_float() {
            let lo_f = f64::from_bits(lo);
            let hi_f = f64::from_bits(hi);
            let span = hi_f - lo_f;
            if span <= 0.0 {
                return 0;
            }
            let norm = ((f64::from_bits(v) - lo_f) / span).clamp(0.0, 1.0);
            ((norm * (levels - 1) as f64).round() as u64).min(levels - 1)
        } else {
            let idx = self.index_of(v, lo);
            match self.range_len(lo, hi) {
                Some(len) if len <= levels => idx,
                Some(len) => {
                    // Project a wide range onto the curve grid.
                    (((idx as u128) * (levels as u128)) / (len as u128)) as u64
                }
                None => idx >> (64 - levels.trailing_zeros().max(1)),
            }
        }
    }

    // ------------------------------------------------------------------
    // Reserved values
    // ------------------------------------------------------------------

    /// The reserved *empty* marker: the value a dense read yields for a
    /// cell no fragment covers. The type's maximum (`Char`: NUL).
    pub fn empty_bits(self) -> u64 {
        match self {
            Datatype::Char => 0,
            Datatype::Int8 => i8::MAX as i64 as u64,
            Datatype::Int16 => i16::MAX as i64 as u64,
            Datatype::Int32 => i32::MAX as i64 as u64,
            Datatype::Int64 => i64::MAX as u64,
            Datatype::UInt8 => u8::MAX as u64,
            Datatype::UInt16 => u16::MAX as u64,
            Datatype::UInt32 => u32::MAX as u64,
            Datatype::UInt64 => u64::MAX,
            Datatype::Float32 => (f32::MAX as f64).to_bits(),
            Datatype::Float64 => f64::MAX.to_bits(),
        }
    }

    /// The reserved *deleted* marker. A sparse cell whose coordinates carry
    /// this value is filtered from results. The type's minimum (`Char`:
    /// `0x7f`). Attribute-level deletes are not expressible; only whole
    /// cells can be marked.
    pub fn deleted_bits(self) -> u64 {
        match self {
            Datatype::Char => 0x7f_i64 as u64,
            Datatype::Int8 => i8::MIN as i64 as u64,
            Datatype::Int16 => i16::MIN as i64 as u64,
            Datatype::Int32 => i32::MIN as i64 as u64,
            Datatype::Int64 => i64::MIN as u64,
            Datatype::UInt8 | Datatype::UInt16 | Datatype::UInt32 | Datatype::UInt64 => 0,
            Datatype::Float32 => (f32::MIN as f64).to_bits(),
            Datatype::Float64 => f64::MIN.to_bits(),
        }
    }

    /// Native little-endian encoding of the fill (empty) value.
    pub fn fill_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        self.encode(self.empty_bits(), &mut out);
        out
    }

    // ------------------------------------------------------------------
    // Text round-trip (CLI, schema descriptions)
    // ------------------------------------------------------------------

    /// Render canonical bits for display.
    pub fn format_bits(self, bits: u64) -> String {
        if self.is_float() {
            format!("{}", f64::from_bits(bits))
        } else if self.is_signed() {
            format!("{}", bits as i64)
        } else {
            format!("{bits}")
        }
    }

    /// Parse a textual value into canonical bits, validating the type range.
    pub fn parse_bits(self, s: &str) -> Result<u64> {
        let bad = || Error::domain(format!("`{s}` is not a valid {} value", self.name()));
        if self.is_float() {
            let f: f64 = s.trim().parse().map_err(|_| bad())?;
            if self == Datatype::Float32 && f.is_finite() && (f < f32::MIN as f64 || f > f32::MAX as f64) {
                return Err(bad());
            }
            Ok(f.to_bits())
        } else if self.is_signed() {
            let v: i64 = s.trim().parse().map_err(|_| bad())?;
            let (min, max) = self.signed_bounds();
            if v < min || v > max {
                return Err(bad());
            }
            Ok(v as u64)
        } else {
            let v: u64 = s.trim().parse().map_err(|_| bad())?;
            if v > self.unsigned_max() {
                return Err(bad());
            }
            Ok(v)
        }
    }

    fn signed_bounds(self) -> (i64, i64) {
        match self {
            Datatype::Char | Datatype::Int8 => (i8::MIN as i64, i8::MAX as i64),
            Datatype::Int16 => (i16::MIN as i64, i16::MAX as i64),
            Datatype::Int32 => (i32::MIN as i64, i32::MAX as i64),
            _ => (i64::MIN, i64::MAX),
        }
    }

    fn unsigned_max(self) -> u64 {
        match self {
            Datatype::UInt8 => u8::MAX as u64,
            Datatype::UInt16 => u16::MAX as u64,
            Datatype::UInt32 => u32::MAX as u64,
            _ => u64::MAX,
        }
    }

    /// Whether canonical bits are representable in this type's range.
    pub fn bits_in_type_range(self, bits: u64) -> bool {
        if self.is_float() {
            let f = f64::from_bits(bits);
            match self {
                Datatype::Float32 => !f.is_finite() || (f >= f32::MIN as f64 && f <= f32::MAX as f64),
                _ => true,
            }
        } else if self.is_signed() {
            let v = bits as i64;
            let (min, max) = self.signed_bounds();
            v >= min && v <= max
        } else {
            bits <= self.unsigned_max()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn tag_round_trip() {
        for dt in Datatype::ALL {
            assert_eq!(Datatype::from_tag(dt.tag()).unwrap(), dt);
            assert_eq!(Datatype::from_name(dt.name()).unwrap(), dt);
        }
        assert!(Datatype::from_tag(42).is_err());
        assert!(Datatype::from_name("int128").is_err());
    }

    #[test]
    fn decode_encode_int32() {
        let dt = Datatype::Int32;
        let raw = (-17i32).to_le_bytes();
        let bits = dt.decode(&raw);
        assert_eq!(bits as i64, -17);
        let mut out = Vec::new();
        dt.encode(bits, &mut out);
        assert_eq!(out, raw);
    }

    #[test]
    fn signed_ordering() {
        let dt = Datatype::Int64;
        let neg = (-5i64) as u64;
        let pos = 3i64 as u64;
        assert_eq!(dt.cmp_bits(neg, pos), Ordering::Less);
        assert_eq!(dt.cmp_bits(pos, pos), Ordering::Equal);
    }

    #[test]
    fn float_ordering_total() {
        let dt = Datatype::Float64;
        let a = (-1.5f64).to_bits();
        let b = 2.25f64.to_bits();
        assert_eq!(dt.cmp_bits(a, b), Ordering::Less);
    }

    #[test]
    fn index_arithmetic_signed() {
        let dt = Datatype::Int32;
        let lo = (-4i64) as u64;
        let v = 3i64 as u64;
        assert_eq!(dt.index_of(v, lo), 7);
        assert_eq!(dt.at_index(lo, 7) as i64, 3);
        assert_eq!(dt.range_len(lo, v), Some(8));
    }

    #[test]
    fn range_len_overflow() {
        let dt = Datatype::UInt64;
        assert_eq!(dt.range_len(0, u64::MAX), None);
        assert_eq!(dt.range_len(5, 4), Some(0));
    }

    #[test]
    fn tile_of_float() {
        let dt = Datatype::Float64;
        let lo = 0.0f64.to_bits();
        let extent = 2.5f64.to_bits();
        assert_eq!(dt.tile_of(4.9f64.to_bits(), lo, extent), 1);
        assert_eq!(dt.tile_of(5.1f64.to_bits(), lo, extent), 2);
    }

    #[test]
    fn reserved_values_distinct() {
        for dt in Datatype::ALL {
            assert_ne!(dt.empty_bits(), dt.deleted_bits(), "{dt:?}");
        }
    }

    #[test]
    fn parse_respects_type_range() {
        assert!(Datatype::Int8.parse_bits("127").is_ok());
        assert!(Datatype::Int8.parse_bits("128").is_err());
        assert!(Datatype::UInt16.parse_bits("65536").is_err());
        assert_eq!(Datatype::Float32.parse_bits("1.5").unwrap(), 1.5f64.to_bits());
    }

    proptest! {
        #[test]
        fn prop_encode_decode_round_trip(v in any::<i64>()) {
            let dt = Datatype::Int64;
            let mut out = Vec::new();
            dt.encode(v as u64, &mut out);
            prop_assert_eq!(dt.decode(&out) as i64, v);
        }

        #[test]
        fn prop_index_at_index_inverse(lo in -1000i64..1000, off in 0u64..10_000) {
            let dt = Datatype::Int64;
            let v = dt.at_index(lo as u64, off);
            prop_assert_eq!(dt.index_of(v, lo as u64), off);
        }
    }
}
