//! Cell and tile orders, array kinds.

use crate::error::{Error, Result};

/// Order of tiles on disk, of cells within a tile, or of cells in a query
/// buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    /// Dimension 0 varies slowest.
    RowMajor,
    /// Dimension N-1 varies slowest.
    ColMajor,
    /// The array's global order: tile order, then cell order within a tile.
    GlobalOrder,
    /// No defined order. For writes: cells arrive unsorted; for reads:
    /// cells are streamed as encountered.
    Unordered,
    /// Hilbert space-filling curve. Valid only as the cell order of a
    /// sparse array.
    Hilbert,
}

impl Layout {
    /// Numeric tag used in on-disk formats.
    pub fn tag(self) -> u8 {
        match self {
            Layout::RowMajor => 0,
            Layout::ColMajor => 1,
            Layout::GlobalOrder => 2,
            Layout::Unordered => 3,
            Layout::Hilbert => 4,
        }
    }

    /// Inverse of [`Layout::tag`].
    pub fn from_tag(tag: u8) -> Result<Layout> {
        match tag {
            0 => Ok(Layout::RowMajor),
            1 => Ok(Layout::ColMajor),
            2 => Ok(Layout::GlobalOrder),
            3 => Ok(Layout::Unordered),
            4 => Ok(Layout::Hilbert),
            _ => Err(Error::format(format!("unknown layout tag {tag}"))),
        }
    }

    /// Lowercase name, as used in schema descriptions and the CLI.
    pub fn name(self) -> &'static str {
        match self {
            Layout::RowMajor => "row-major",
            Layout::ColMajor => "col-major",
            Layout::GlobalOrder => "global",
            Layout::Unordered => "unordered",
            Layout::Hilbert => "hilbert",
        }
    }

    /// Inverse of [`Layout::name`].
    pub fn from_name(name: &str) -> Result<Layout> {
        match name {
            "row-major" => Ok(Layout::RowMajor),
            "col-major" => Ok(Layout::ColMajor),
            "global" => Ok(Layout::GlobalOrder),
            "unordered" => Ok(Layout::Unordered),
            "hilbert" => Ok(Layout::Hilbert),
            _ => Err(Error::layout(format!("unknown layout `{name}`"))),
        }
    }
}

/// Dense or sparse array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayType {
    /// Every domain coordinate has a value (possibly the fill value).
    Dense,
    /// Only explicitly written coordinates hold values.
    Sparse,
}

impl ArrayType {
    /// Numeric tag used in on-disk formats.
    pub fn tag(self) -> u8 {
        match self {
            ArrayType::Dense => 0,
            ArrayType::Sparse => 1,
        }
    }

    /// Inverse of [`ArrayType::tag`].
    pub fn from_tag(tag: u8) -> Result<ArrayType> {
        match tag {
            0 => Ok(ArrayType::Dense),
            1 => Ok(ArrayType::Sparse),
            _ => Err(Error::format(format!("unknown array type tag {tag}"))),
        }
    }

    /// Lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            ArrayType::Dense => "dense",
            ArrayType::Sparse => "sparse",
        }
    }

    /// Inverse of [`ArrayType::name`].
    pub fn from_name(name: &str) -> Result<ArrayType> {
        match name {
            "dense" => Ok(ArrayType::Dense),
            "sparse" => Ok(ArrayType::Sparse),
            _ => Err(Error::schema(format!("unknown array type `{name}`"))),
        }
    }
}
