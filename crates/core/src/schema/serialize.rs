//! On-disk schema codec.
//!
//! # File structure
//!
//! ```text
//! +--------------------------+
//! | version        u32       |
//! | array_type     u8        |
//! | tile_order     u8        |
//! | cell_order     u8        |
//! | capacity       u64       |
//! +--------------------------+
//! | dim_count      u32       |
//! | per dimension:           |
//! |   name_len u32 + bytes   |
//! |   type tag     u8        |
//! |   lo, hi       u64 x2    |
//! |   has_extent   u8        |
//! |   extent       u64       |
//! +--------------------------+
//! | attr_count     u32       |
//! | per attribute:           |
//! |   name_len u32 + bytes   |
//! |   type tag     u8        |
//! |   cell_val_num u32       |
//! |   compressor   u8        |
//! |   level        i32       |
//! |   nullable     u8        |
//! +--------------------------+
//! | CRC32 of all above  u32  |
//! +--------------------------+
//! ```
//!
//! All integers little-endian. `lo`/`hi`/`extent` are canonical bit
//! patterns of the coordinate datatype.

use crate::compressor::Compressor;
use crate::constants::FORMAT_VERSION;
use crate::datatype::Datatype;
use crate::error::{Error, Result};
use crate::layout::{ArrayType, Layout};
use crate::schema::{ArraySchema, Attribute, CellValNum, Dimension, Domain};
use byteorder::{ByteOrder, LittleEndian};

/// Read cursor over a schema or metadata byte buffer.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::format("unexpected end of schema data"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub(crate) fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::format("invalid UTF-8 in stored name"))
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    let mut len = [0u8; 4];
    LittleEndian::write_u32(&mut len, s.len() as u32);
    out.extend_from_slice(&len);
    out.extend_from_slice(s.as_bytes());
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    let mut b = [0u8; 4];
    LittleEndian::write_u32(&mut b, v);
    out.extend_from_slice(&b);
}

fn write_i32(out: &mut Vec<u8>, v: i32) {
    let mut b = [0u8; 4];
    LittleEndian::write_i32(&mut b, v);
    out.extend_from_slice(&b);
}

fn write_u64(out: &mut Vec<u8>, v: u64) {
    let mut b = [0u8; 8];
    LittleEndian::write_u64(&mut b, v);
    out.extend_from_slice(&b);
}

impl ArraySchema {
    /// Serialize to the on-disk byte layout, CRC included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        write_u32(&mut out, self.version);
        out.push(self.array_type.tag());
        out.push(self.tile_order.tag());
        out.push(self.cell_order.tag());
        write_u64(&mut out, self.capacity);

        write_u32(&mut out, self.domain.dims.len() as u32);
        for dim in &self.domain.dims {
            write_string(&mut out, &dim.name);
            out.push(self.domain.datatype.tag());
            write_u64(&mut out, dim.lo);
            write_u64(&mut out, dim.hi);
            out.push(dim.tile_extent.is_some() as u8);
            write_u64(&mut out, dim.tile_extent.unwrap_or(0));
        }

        write_u32(&mut out, self.attributes.len() as u32);
        for attr in &self.attributes {
            write_string(&mut out, &attr.name);
            out.push(attr.datatype.tag());
            write_u32(&mut out, attr.cell_val_num.to_raw());
            out.push(attr.compressor.tag());
            write_i32(&mut out, attr.level);
            out.push(attr.nullable as u8);
        }

        let crc = crc32fast::hash(&out);
        write_u32(&mut out, crc);
        out
    }

    /// Deserialize and validate a schema file's bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<ArraySchema> {
        if buf.len() < 4 {
            return Err(Error::format("schema file too short"));
        }
        let (body, crc_bytes) = buf.split_at(buf.len() - 4);
        let stored_crc = LittleEndian::read_u32(crc_bytes);
        let actual_crc = crc32fast::hash(body);
        if stored_crc != actual_crc {
            return Err(Error::format(format!(
                "schema CRC mismatch: stored {stored_crc:#010x}, computed {actual_crc:#010x}"
            )));
        }

        let mut r = ByteReader::new(body);
        let version = r.read_u32()?;
        if version > FORMAT_VERSION {
            return Err(Error::format(format!(
                "schema format version {version} is newer than supported {FORMAT_VERSION}"
            )));
        }
        let array_type = ArrayType::from_tag(r.read_u8()?)?;
        let tile_order = Layout::from_tag(r.read_u8()?)?;
        let cell_order = Layout::from_tag(r.read_u8()?)?;
        let capacity = r.read_u64()?;

        let dim_count = r.read_u32()? as usize;
        let mut datatype = None;
        let mut dims = Vec::with_capacity(dim_count);
        for _ in 0..dim_count {
            let name = r.read_string()?;
            let dt = Datatype::from_tag(r.read_u8()?)?;
            match datatype {
                None => datatype = Some(dt),
                Some(prev) if prev != dt => {
                    return Err(Error::format(
                        "dimensions disagree on the coordinate datatype",
                    ));
                }
                Some(_) => {}
            }
            let lo = r.read_u64()?;
            let hi = r.read_u64()?;
            let has_extent = r.read_u8()? != 0;
            let extent = r.read_u64()?;
            dims.push(Dimension {
                name,
                lo,
                hi,
                tile_extent: has_extent.then_some(extent),
            });
        }
        let datatype =
            datatype.ok_or_else(|| Error::format("schema file declares no dimensions"))?;

        let attr_count = r.read_u32()? as usize;
        let mut attributes = Vec::with_capacity(attr_count);
        for _ in 0..attr_count {
            let name = r.read_string()?;
            let dt = Datatype::from_tag(r.read_u8()?)?;
            let cell_val_num = CellValNum::from_raw(r.read_u32()?)?;
            let compressor = Compressor::from_tag(r.read_u8()?)?;
            let level = r.read_i32()?;
            let nullable = r.read_u8()? != 0;
            attributes.push(Attribute {
                name,
                datatype: dt,
                cell_val_num,
                nullable,
                compressor,
                level,
            });
        }

        let schema = ArraySchema {
            array_type,
            tile_order,
            cell_order,
            capacity,
            domain: Domain::new(datatype, dims),
            attributes,
            version,
        };
        schema.validate().map_err(|e| {
            Error::format(format!("stored schema fails validation: {e}"))
        })?;
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ArraySchema {
        ArraySchema::new(
            ArrayType::Sparse,
            Layout::RowMajor,
            Layout::ColMajor,
            128,
            Domain::new(
                Datatype::Int32,
                vec![
                    Dimension::new("rows", (-10i64) as u64, 10i64 as u64, 5),
                    Dimension::without_extent("cols", 0, 99),
                ],
            ),
            vec![
                Attribute::new("a", Datatype::Float64)
                    .with_compressor(Compressor::Zstd, 3),
                Attribute::new("labels", Datatype::Char)
                    .with_cell_val_num(CellValNum::Var)
                    .nullable(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn round_trip() {
        let schema = sample();
        let bytes = schema.to_bytes();
        let parsed = ArraySchema::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, schema);
    }

    #[test]
    fn crc_detects_flip() {
        let mut bytes = sample().to_bytes();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        let err = ArraySchema::from_bytes(&bytes).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn truncation_detected() {
        let bytes = sample().to_bytes();
        let err = ArraySchema::from_bytes(&bytes[..bytes.len() - 6]).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn newer_version_rejected() {
        let schema = sample();
        let mut bytes = schema.to_bytes();
        // Patch the version field and re-seal the CRC.
        bytes[0] = 99;
        let body_len = bytes.len() - 4;
        let crc = crc32fast::hash(&bytes[..body_len]);
        LittleEndian::write_u32(&mut bytes[body_len..], crc);
        let err = ArraySchema::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("newer"));
    }
}
