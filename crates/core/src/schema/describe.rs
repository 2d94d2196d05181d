//! JSON schema descriptions.
//!
//! The CLI `create` subcommand consumes a small JSON document describing a
//! schema. Numeric bounds travel as strings so one description format
//! covers every coordinate datatype.

use crate::compressor::Compressor;
use crate::datatype::Datatype;
use crate::error::{Error, Result};
use crate::layout::{ArrayType, Layout};
use crate::schema::{ArraySchema, Attribute, CellValNum, Dimension, Domain};
use serde::{Deserialize, Serialize};

fn default_order() -> String {
    "row-major".to_string()
}

fn default_cell_val_num() -> String {
    "1".to_string()
}

fn default_compressor() -> String {
    "none".to_string()
}

fn default_level() -> i32 {
    -1
}

/// One dimension of a schema description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionDesc {
    /// Dimension name.
    pub name: String,
    /// Inclusive lower bound, as text.
    pub lo: String,
    /// Inclusive upper bound, as text.
    pub hi: String,
    /// Tile extent, as text; omitted for extent-less sparse dimensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_extent: Option<String>,
}

/// One attribute of a schema description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDesc {
    /// Attribute name.
    pub name: String,
    /// Value datatype name.
    pub datatype: String,
    /// `"var"` or a positive integer, as text.
    #[serde(default = "default_cell_val_num")]
    pub cell_val_num: String,
    /// Whether cells may be null.
    #[serde(default)]
    pub nullable: bool,
    /// Compressor name.
    #[serde(default = "default_compressor")]
    pub compressor: String,
    /// Compression level; `-1` is the codec default.
    #[serde(default = "default_level")]
    pub level: i32,
}

/// A complete schema description, as read from or written to JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDesc {
    /// `"dense"` or `"sparse"`.
    pub array_type: String,
    /// Tile order name.
    #[serde(default = "default_order")]
    pub tile_order: String,
    /// Cell order name.
    #[serde(default = "default_order")]
    pub cell_order: String,
    /// Data-tile capacity (sparse).
    #[serde(default)]
    pub capacity: u64,
    /// Coordinate datatype name.
    pub datatype: String,
    /// Dimensions, in order.
    pub dimensions: Vec<DimensionDesc>,
    /// Attributes, in order.
    pub attributes: Vec<AttributeDesc>,
}

impl SchemaDesc {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<SchemaDesc> {
        serde_json::from_str(json)
            .map_err(|e| Error::schema(format!("invalid schema description: {e}")))
    }

    /// Render as pretty JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Build the validated schema this description denotes.
    pub fn build(&self) -> Result<ArraySchema> {
        let array_type = ArrayType::from_name(&self.array_type)?;
        let tile_order = Layout::from_name(&self.tile_order)?;
        let cell_order = Layout::from_name(&self.cell_order)?;
        let datatype = Datatype::from_name(&self.datatype)?;

        let mut dims = Vec::with_capacity(self.dimensions.len());
        for d in &self.dimensions {
            let lo = datatype.parse_bits(&d.lo)?;
            let hi = datatype.parse_bits(&d.hi)?;
            let tile_extent = match &d.tile_extent {
                None => None,
                Some(text) => Some(if datatype.is_float() {
                    let f: f64 = text.trim().parse().map_err(|_| {
                        Error::schema(format!("invalid tile extent `{text}`"))
                    })?;
                    f.to_bits()
                } else {
                    text.trim().parse::<u64>().map_err(|_| {
                        Error::schema(format!("invalid tile extent `{text}`"))
                    })?
                }),
            };
            dims.push(Dimension {
                name: d.name.clone(),
                lo,
                hi,
                tile_extent,
            });
        }

        let mut attributes = Vec::with_capacity(self.attributes.len());
        for a in &self.attributes {
            let cell_val_num = if a.cell_val_num == "var" {
                CellValNum::Var
            } else {
                let n: u32 = a.cell_val_num.parse().map_err(|_| {
                    Error::schema(format!("invalid cell_val_num `{}`", a.cell_val_num))
                })?;
                CellValNum::from_raw(n)?
            };
            attributes.push(Attribute {
                name: a.name.clone(),
                datatype: Datatype::from_name(&a.datatype)?,
                cell_val_num,
                nullable: a.nullable,
                compressor: Compressor::from_name(&a.compressor)?,
                level: a.level,
            });
        }

        ArraySchema::new(
            array_type,
            tile_order,
            cell_order,
            self.capacity,
            Domain::new(datatype, dims),
            attributes,
        )
    }

    /// Describe an existing schema.
    pub fn from_schema(schema: &ArraySchema) -> SchemaDesc {
        let dt = schema.coord_type();
        SchemaDesc {
            array_type: schema.array_type.name().to_string(),
            tile_order: schema.tile_order.name().to_string(),
            cell_order: schema.cell_order.name().to_string(),
            capacity: schema.capacity,
            datatype: dt.name().to_string(),
            dimensions: schema
                .domain
                .dims
                .iter()
                .map(|d| DimensionDesc {
                    name: d.name.clone(),
                    lo: dt.format_bits(d.lo),
                    hi: dt.format_bits(d.hi),
                    tile_extent: d.tile_extent.map(|e| {
                        if dt.is_float() {
                            format!("{}", f64::from_bits(e))
                        } else {
                            format!("{e}")
                        }
                    }),
                })
                .collect(),
            attributes: schema
                .attributes
                .iter()
                .map(|a| AttributeDesc {
                    name: a.name.clone(),
                    datatype: a.datatype.name().to_string(),
                    cell_val_num: match a.cell_val_num {
                        CellValNum::Var => "var".to_string(),
                        CellValNum::Fixed(n) => format!("{n}"),
                    },
                    nullable: a.nullable,
                    compressor: a.compressor.name().to_string(),
                    level: a.level,
                })
                .collect(),
        }
    }
}
