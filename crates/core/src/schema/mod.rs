//! The array schema: domain, attributes, orders, capacity.
//!
//! A schema is created once, validated, serialized next to the array data,
//! and immutable thereafter. Other components refer to attributes and
//! dimensions through their stable numeric indices.

mod attribute;
mod describe;
mod dimension;
mod domain;
mod serialize;

pub use attribute::{Attribute, CellValNum, VAR_NUM};
pub use describe::SchemaDesc;
pub use dimension::Dimension;
pub use domain::{Coords, Domain, Mbr, Subarray};

use crate::constants::FORMAT_VERSION;
use crate::datatype::Datatype;
use crate::error::{Error, Result};
use crate::layout::{ArrayType, Layout};

/// The invariant description of an array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArraySchema {
    /// Dense or sparse.
    pub array_type: ArrayType,
    /// Order of space tiles on disk.
    pub tile_order: Layout,
    /// Order of cells within a space tile.
    pub cell_order: Layout,
    /// Target cell count per data tile (sparse arrays; ignored for dense).
    pub capacity: u64,
    /// The domain.
    pub domain: Domain,
    /// Attributes; the index is the stable attribute id.
    pub attributes: Vec<Attribute>,
    /// Format version this schema was written with.
    pub version: u32,
}

impl ArraySchema {
    /// Build and validate a schema.
    pub fn new(
        array_type: ArrayType,
        tile_order: Layout,
        cell_order: Layout,
        capacity: u64,
        domain: Domain,
        attributes: Vec<Attribute>,
    ) -> Result<Self> {
        let schema = ArraySchema {
            array_type,
            tile_order,
            cell_order,
            capacity,
            domain,
            attributes,
            version: FORMAT_VERSION,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Validate every schema invariant.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.tile_order, Layout::RowMajor | Layout::ColMajor) {
            return Err(Error::schema(format!(
                "tile order must be row-major or col-major, got {}",
                self.tile_order.name()
            )));
        }
        match self.cell_order {
            Layout::RowMajor | Layout::ColMajor => {}
            Layout::Hilbert if self.array_type == ArrayType::Sparse => {}
            Layout::Hilbert => {
                return Err(Error::schema(
                    "hilbert cell order is only supported for sparse arrays",
                ));
            }
            other => {
                return Err(Error::schema(format!(
                    "cell order must be row-major, col-major or hilbert, got {}",
                    other.name()
                )));
            }
        }
        if self.array_type == ArrayType::Sparse && self.capacity == 0 {
            return Err(Error::schema("sparse arrays require a nonzero capacity"));
        }
        self.domain.validate(self.array_type)?;
        if self.attributes.is_empty() {
            return Err(Error::schema("schema must define at least one attribute"));
        }
        for attr in &self.attributes {
            attr.validate()?;
        }
        let mut names: Vec<&str> = self
            .attributes
            .iter()
            .map(|a| a.name.as_str())
            .chain(self.domain.dims.iter().map(|d| d.name.as_str()))
            .collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err(Error::schema("duplicate attribute or dimension names"));
        }
        Ok(())
    }

    /// Coordinate datatype shortcut.
    pub fn coord_type(&self) -> Datatype {
        self.domain.datatype
    }

    /// Stable id of an attribute, by name.
    pub fn attribute_id(&self, name: &str) -> Result<usize> {
        self.attributes
            .iter()
            .position(|a| a.name == name)
            .ok_or_else(|| Error::not_found(format!("attribute `{name}`")))
    }

    /// Attribute by id.
    pub fn attribute(&self, id: usize) -> &Attribute {
        &self.attributes[id]
    }

    /// Cells per data tile: the extent product for dense arrays, the
    /// capacity for sparse ones.
    pub fn tile_cell_count(&self) -> Result<u64> {
        match self.array_type {
            ArrayType::Sparse => Ok(self.capacity),
            ArrayType::Dense => {
                let mut product: u64 = 1;
                for dim in &self.domain.dims {
                    let extent = dim.tile_extent.ok_or_else(|| {
                        Error::internal("dense dimension without extent survived validation")
                    })?;
                    product = product.checked_mul(extent).ok_or_else(|| {
                        Error::schema("tile extent product exceeds addressable cells")
                    })?;
                }
                Ok(product)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressor::Compressor;

    pub(crate) fn dense_4x4() -> ArraySchema {
        ArraySchema::new(
            ArrayType::Dense,
            Layout::RowMajor,
            Layout::RowMajor,
            0,
            Domain::new(
                Datatype::Int64,
                vec![Dimension::new("rows", 1, 4, 2), Dimension::new("cols", 1, 4, 2)],
            ),
            vec![Attribute::new("a", Datatype::Int32)],
        )
        .unwrap()
    }

    #[test]
    fn dense_schema_valid() {
        let schema = dense_4x4();
        assert_eq!(schema.tile_cell_count().unwrap(), 4);
        assert_eq!(schema.attribute_id("a").unwrap(), 0);
        assert!(schema.attribute_id("b").is_err());
    }

    #[test]
    fn sparse_needs_capacity() {
        let err = ArraySchema::new(
            ArrayType::Sparse,
            Layout::RowMajor,
            Layout::RowMajor,
            0,
            Domain::new(Datatype::Int64, vec![Dimension::new("d", 0, 9, 5)]),
            vec![Attribute::new("a", Datatype::Int32)],
        )
        .unwrap_err();
        assert!(err.to_string().contains("capacity"));
    }

    #[test]
    fn dense_rejects_hilbert_cells() {
        let err = ArraySchema::new(
            ArrayType::Dense,
            Layout::RowMajor,
            Layout::Hilbert,
            0,
            Domain::new(Datatype::Int64, vec![Dimension::new("d", 0, 9, 5)]),
            vec![Attribute::new("a", Datatype::Int32)],
        )
        .unwrap_err();
        assert!(err.to_string().contains("hilbert"));
    }

    #[test]
    fn sparse_allows_hilbert_cells() {
        let schema = ArraySchema::new(
            ArrayType::Sparse,
            Layout::RowMajor,
            Layout::Hilbert,
            10,
            Domain::new(Datatype::UInt32, vec![Dimension::new("d", 0, 99, 10)]),
            vec![Attribute::new("a", Datatype::Float64)],
        );
        assert!(schema.is_ok());
    }

    #[test]
    fn attribute_dimension_name_clash() {
        let err = ArraySchema::new(
            ArrayType::Dense,
            Layout::RowMajor,
            Layout::RowMajor,
            0,
            Domain::new(Datatype::Int64, vec![Dimension::new("a", 0, 9, 5)]),
            vec![Attribute::new("a", Datatype::Int32)],
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn compressed_attributes_validate() {
        let schema = ArraySchema::new(
            ArrayType::Dense,
            Layout::RowMajor,
            Layout::RowMajor,
            0,
            Domain::new(Datatype::Int64, vec![Dimension::new("d", 0, 9, 5)]),
            vec![
                Attribute::new("a", Datatype::Int32).with_compressor(Compressor::Zstd, 3),
                Attribute::new("b", Datatype::Int64)
                    .with_compressor(Compressor::DoubleDelta, -1),
            ],
        );
        assert!(schema.is_ok());
    }
}
