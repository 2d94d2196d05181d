//! Domain dimensions.

use crate::datatype::Datatype;

/// One axis of the domain.
///
/// `lo`, `hi` and `tile_extent` are stored as canonical bit patterns of the
/// domain's datatype (see [`crate::datatype`]); for integer dimensions the
/// extent is a plain cell count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    /// Dimension name, unique within the domain.
    pub name: String,
    /// Inclusive lower bound (canonical bits).
    pub lo: u64,
    /// Inclusive upper bound (canonical bits).
    pub hi: u64,
    /// Space-tile extent. Mandatory for dense arrays; a sparse dimension
    /// without an extent forms a single space tile spanning `[lo, hi]`.
    pub tile_extent: Option<u64>,
}

impl Dimension {
    /// Create a dimension with an extent.
    pub fn new(name: impl Into<String>, lo: u64, hi: u64, tile_extent: u64) -> Self {
        Dimension {
            name: name.into(),
            lo,
            hi,
            tile_extent: Some(tile_extent),
        }
    }

    /// Create a dimension without an extent (sparse arrays only).
    pub fn without_extent(name: impl Into<String>, lo: u64, hi: u64) -> Self {
        Dimension {
            name: name.into(),
            lo,
            hi,
            tile_extent: None,
        }
    }

    /// Number of cells along this dimension, for integer datatypes.
    pub fn len(&self, datatype: Datatype) -> Option<u64> {
        datatype.range_len(self.lo, self.hi)
    }

    /// The effective extent: the declared one, or the whole dimension.
    ///
    /// For float dimensions the result is `f64` bits; for integers a cell
    /// count. Returns `None` when an integer dimension spans more than
    /// `u64::MAX` cells and has no declared extent.
    pub fn effective_extent(&self, datatype: Datatype) -> Option<u64> {
        if let Some(e) = self.tile_extent {
            return Some(e);
        }
        if datatype.is_float() {
            let span = f64::from_bits(self.hi) - f64::from_bits(self.lo);
            Some(span.max(f64::MIN_POSITIVE).to_bits())
        } else {
            self.len(datatype)
        }
    }

    /// Number of space tiles along this dimension.
    pub fn tile_count(&self, datatype: Datatype) -> Option<u64> {
        let extent = self.effective_extent(datatype)?;
        if datatype.is_float() {
            let span = f64::from_bits(self.hi) - f64::from_bits(self.lo);
            let e = f64::from_bits(extent);
            if e <= 0.0 {
                return None;
            }
            Some(((span / e).floor() as u64).saturating_add(1))
        } else {
            let len = self.len(datatype)?;
            let e = extent.max(1);
            Some(len.div_ceil(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_tile_count() {
        let d = Dimension::new("rows", 1, 4, 2);
        assert_eq!(d.len(Datatype::Int64), Some(4));
        assert_eq!(d.tile_count(Datatype::Int64), Some(2));
    }

    #[test]
    fn uneven_extent_rounds_up() {
        let d = Dimension::new("rows", 0, 9, 4);
        assert_eq!(d.tile_count(Datatype::UInt32), Some(3));
    }

    #[test]
    fn missing_extent_is_whole_dimension() {
        let d = Dimension::without_extent("rows", 1, 100);
        assert_eq!(d.effective_extent(Datatype::Int32), Some(100));
        assert_eq!(d.tile_count(Datatype::Int32), Some(1));
    }

    #[test]
    fn float_tiles() {
        let lo = 0.0f64.to_bits();
        let hi = 10.0f64.to_bits();
        let d = Dimension::new("x", lo, hi, 2.5f64.to_bits());
        assert_eq!(d.tile_count(Datatype::Float64), Some(5));
    }
}
