//! Array attributes.

use crate::compressor::Compressor;
use crate::datatype::Datatype;
use crate::error::{Error, Result};

/// Raw encoding of the variable-length cell-value count.
pub const VAR_NUM: u32 = u32::MAX;

/// Number of values one cell stores for an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellValNum {
    /// A fixed number of values per cell (at least 1).
    Fixed(u32),
    /// Variable-length cells; values live in a companion stream addressed
    /// by a per-cell offsets tile.
    Var,
}

impl CellValNum {
    /// Raw `u32` encoding (`0xFFFF_FFFF` denotes variable length).
    pub fn to_raw(self) -> u32 {
        match self {
            CellValNum::Fixed(n) => n,
            CellValNum::Var => VAR_NUM,
        }
    }

    /// Inverse of [`CellValNum::to_raw`].
    pub fn from_raw(raw: u32) -> Result<CellValNum> {
        match raw {
            VAR_NUM => Ok(CellValNum::Var),
            0 => Err(Error::schema("cell_val_num of 0 is invalid")),
            n => Ok(CellValNum::Fixed(n)),
        }
    }

    /// Whether cells are variable-length.
    pub fn is_var(self) -> bool {
        matches!(self, CellValNum::Var)
    }
}

/// A named, typed value stored per cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name, unique within the schema.
    pub name: String,
    /// Value datatype.
    pub datatype: Datatype,
    /// Values per cell.
    pub cell_val_num: CellValNum,
    /// Whether cells may be null; nullable attributes carry a validity
    /// companion tile (one byte per cell, 0 = null).
    pub nullable: bool,
    /// Compressor for this attribute's tile payloads.
    pub compressor: Compressor,
    /// Compression level; `-1` means the codec default.
    pub level: i32,
}

impl Attribute {
    /// A single-value, non-nullable, uncompressed attribute.
    pub fn new(name: impl Into<String>, datatype: Datatype) -> Self {
        Attribute {
            name: name.into(),
            datatype,
            cell_val_num: CellValNum::Fixed(1),
            nullable: false,
            compressor: Compressor::None,
            level: -1,
        }
    }

    /// Set the values-per-cell count.
    pub fn with_cell_val_num(mut self, cvn: CellValNum) -> Self {
        self.cell_val_num = cvn;
        self
    }

    /// Mark the attribute nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Set the compressor and level.
    pub fn with_compressor(mut self, compressor: Compressor, level: i32) -> Self {
        self.compressor = compressor;
        self.level = level;
        self
    }

    /// Bytes one cell occupies in the fixed stream, `None` for
    /// variable-length attributes (whose fixed stream holds u64 offsets).
    pub fn cell_size(&self) -> Option<usize> {
        match self.cell_val_num {
            CellValNum::Fixed(n) => Some(self.datatype.size() * n as usize),
            CellValNum::Var => None,
        }
    }

    /// Validate the attribute in isolation.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::schema("attribute name must not be empty"));
        }
        if self.name.starts_with("__") {
            return Err(Error::schema(format!(
                "attribute name `{}` uses the reserved `__` prefix",
                self.name
            )));
        }
        if self.compressor == Compressor::DoubleDelta && !self.datatype.is_integer() {
            return Err(Error::schema(format!(
                "attribute `{}`: double-delta compression requires an integer datatype",
                self.name
            )));
        }
        if let CellValNum::Fixed(0) = self.cell_val_num {
            return Err(Error::schema(format!(
                "attribute `{}`: cell_val_num must be at least 1",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_val_num_raw_round_trip() {
        assert_eq!(CellValNum::from_raw(3).unwrap(), CellValNum::Fixed(3));
        assert_eq!(CellValNum::from_raw(VAR_NUM).unwrap(), CellValNum::Var);
        assert!(CellValNum::from_raw(0).is_err());
    }

    #[test]
    fn cell_size() {
        let a = Attribute::new("a", Datatype::Int32);
        assert_eq!(a.cell_size(), Some(4));
        let b = a
            .clone()
            .with_cell_val_num(CellValNum::Fixed(3));
        assert_eq!(b.cell_size(), Some(12));
        let v = Attribute::new("v", Datatype::Char).with_cell_val_num(CellValNum::Var);
        assert_eq!(v.cell_size(), None);
    }

    #[test]
    fn double_delta_requires_integers() {
        let bad = Attribute::new("f", Datatype::Float32)
            .with_compressor(Compressor::DoubleDelta, -1);
        assert!(bad.validate().is_err());
        let ok = Attribute::new("i", Datatype::Int16)
            .with_compressor(Compressor::DoubleDelta, -1);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn reserved_prefix_rejected() {
        assert!(Attribute::new("__coords", Datatype::Int32).validate().is_err());
    }
}
