//! CSV cell loading, subarray parsing, and result printing.
//!
//! The reference tool handles single-value attributes of any primitive
//! type plus variable-length `char` attributes (strings). Nullable cells
//! are written and printed as the literal `null`.

use anyhow::{anyhow, bail, Context as _};
use tessera::{
    ArraySchema, ArrayType, AttrBuffer, Attribute, CellValNum, Datatype, Query, Subarray,
};

/// Parse `lo:hi,lo:hi,...` into a subarray of the schema's domain.
pub fn parse_subarray(schema: &ArraySchema, text: &str) -> anyhow::Result<Subarray> {
    let dt = schema.coord_type();
    let mut ranges = Vec::new();
    for part in text.split(',') {
        let (lo, hi) = part
            .split_once(':')
            .ok_or_else(|| anyhow!("range `{part}` is not of the form lo:hi"))?;
        ranges.push((
            dt.parse_bits(lo).map_err(|e| anyhow!("{e}"))?,
            dt.parse_bits(hi).map_err(|e| anyhow!("{e}"))?,
        ));
    }
    if ranges.len() != schema.domain.dim_count() {
        bail!(
            "subarray has {} ranges, the domain has {} dimensions",
            ranges.len(),
            schema.domain.dim_count()
        );
    }
    Ok(Subarray::new(ranges))
}

/// One attribute column being assembled from CSV fields.
enum Column {
    Fixed {
        data: Vec<u8>,
        validity: Option<Vec<u8>>,
    },
    VarChar {
        offsets: Vec<u64>,
        data: Vec<u8>,
        validity: Option<Vec<u8>>,
    },
}

impl Column {
    fn for_attr(attr: &Attribute) -> anyhow::Result<Column> {
        let validity = attr.nullable.then(Vec::new);
        match attr.cell_val_num {
            CellValNum::Fixed(1) => Ok(Column::Fixed {
                data: Vec::new(),
                validity,
            }),
            CellValNum::Var if attr.datatype == Datatype::Char => Ok(Column::VarChar {
                offsets: Vec::new(),
                data: Vec::new(),
                validity,
            }),
            _ => bail!(
                "attribute `{}` is not loadable from CSV (only single values \
                 and char strings are)",
                attr.name
            ),
        }
    }

    fn push(&mut self, attr: &Attribute, field: &str) -> anyhow::Result<()> {
        let is_null = attr.nullable && field == "null";
        match self {
            Column::Fixed { data, validity } => {
                let bits = if is_null {
                    attr.datatype.empty_bits()
                } else {
                    attr.datatype
                        .parse_bits(field)
                        .map_err(|e| anyhow!("attribute `{}`: {e}", attr.name))?
                };
                attr.datatype.encode(bits, data);
                if let Some(v) = validity {
                    v.push(if is_null { 0 } else { 1 });
                }
            }
            Column::VarChar {
                offsets,
                data,
                validity,
            } => {
                offsets.push(data.len() as u64);
                if !is_null {
                    data.extend_from_slice(field.as_bytes());
                }
                if let Some(v) = validity {
                    v.push(if is_null { 0 } else { 1 });
                }
            }
        }
        Ok(())
    }

    fn into_buffer(self) -> AttrBuffer {
        match self {
            Column::Fixed { data, validity } => {
                let buffer = AttrBuffer::fixed(data);
                match validity {
                    Some(v) => buffer.with_validity(v),
                    None => buffer,
                }
            }
            Column::VarChar {
                offsets,
                data,
                validity,
            } => {
                let buffer = AttrBuffer::var(offsets, data);
                match validity {
                    Some(v) => buffer.with_validity(v),
                    None => buffer,
                }
            }
        }
    }
}

/// Cells loaded from a CSV file, ready to bind to a write query.
pub struct CsvCells {
    /// Native coordinate bytes (sparse writes).
    pub coords: Option<Vec<u8>>,
    /// One buffer per schema attribute, in order.
    pub buffers: Vec<AttrBuffer>,
}

/// Load cells: sparse rows are `coord,...,coord,value,...`; dense rows are
/// `value,...` in the layout's cell order. A `#` prefix marks a comment.
pub fn load_csv(schema: &ArraySchema, text: &str, with_coords: bool) -> anyhow::Result<CsvCells> {
    let dt = schema.coord_type();
    let dims = schema.domain.dim_count();
    let coord_fields = if with_coords { dims } else { 0 };
    let expected = coord_fields + schema.attributes.len();

    let mut coords: Vec<u8> = Vec::new();
    let mut columns: Vec<Column> = schema
        .attributes
        .iter()
        .map(Column::for_attr)
        .collect::<anyhow::Result<_>>()?;

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != expected {
            bail!(
                "line {}: expected {expected} fields, found {}",
                lineno + 1,
                fields.len()
            );
        }
        for field in &fields[..coord_fields] {
            let bits = dt
                .parse_bits(field)
                .with_context(|| format!("line {}", lineno + 1))?;
            dt.encode(bits, &mut coords);
        }
        for ((attr, column), field) in schema
            .attributes
            .iter()
            .zip(&mut columns)
            .zip(&fields[coord_fields..])
        {
            column
                .push(attr, field)
                .with_context(|| format!("line {}", lineno + 1))?;
        }
    }

    Ok(CsvCells {
        coords: with_coords.then_some(coords),
        buffers: columns.into_iter().map(Column::into_buffer).collect(),
    })
}

fn format_value(attr: &Attribute, bytes: &[u8], null: bool) -> String {
    if null {
        return "null".to_string();
    }
    match attr.cell_val_num {
        CellValNum::Var => String::from_utf8_lossy(bytes).into_owned(),
        CellValNum::Fixed(_) => {
            let dt = attr.datatype;
            dt.format_bits(dt.decode(bytes))
        }
    }
}

/// Print one submission's results, one cell per line: coordinates (when
/// present) then the selected attribute values, comma separated.
pub fn print_results(
    schema: &ArraySchema,
    attrs: &[String],
    query: &Query,
) -> anyhow::Result<()> {
    let n = query.result_cell_count();
    let dt = schema.coord_type();
    let dims = schema.domain.dim_count();
    let coord_size = dt.size();

    for i in 0..n as usize {
        let mut fields = Vec::with_capacity(dims + attrs.len());
        if schema.array_type == ArrayType::Sparse {
            if let Some(coords) = query.coords_buffer() {
                let base = i * dims * coord_size;
                for d in 0..dims {
                    let bits = dt.decode(&coords.data()[base + d * coord_size..]);
                    fields.push(dt.format_bits(bits));
                }
            }
        }
        for name in attrs {
            let attr = &schema.attributes[schema
                .attribute_id(name)
                .map_err(|e| anyhow!("{e}"))?];
            let buffer = query
                .buffer(name)
                .ok_or_else(|| anyhow!("attribute `{name}` has no results"))?;
            let null = buffer
                .validity()
                .map(|v| v[i] == 0)
                .unwrap_or(false);
            let bytes = match (attr.cell_val_num, buffer.offsets()) {
                (CellValNum::Var, Some(offsets)) => {
                    let start = offsets[i] as usize;
                    let end = offsets
                        .get(i + 1)
                        .map(|&o| o as usize)
                        .unwrap_or(buffer.data().len());
                    &buffer.data()[start..end]
                }
                _ => {
                    let size = attr.cell_size().unwrap_or(0);
                    &buffer.data()[i * size..(i + 1) * size]
                }
            };
            fields.push(format_value(attr, bytes, null));
        }
        println!("{}", fields.join(","));
    }
    Ok(())
}
