//! Fragment book-keeping.
//!
//! One `__fragment_metadata.tdb` per fragment, loaded once per array-open
//! and shared by reference across reader threads. Writers accumulate the
//! vectors while producing tiles and write the final copy on finalize.
//!
//! # File structure
//!
//! ```text
//! +------------------------------------------+
//! | version            u32                   |
//! | dense              u8                    |
//! | dim_count          u32                   |
//! | non-empty domain   dim_count x (lo, hi)  |  u64 each
//! | tile_count T       u64                   |
//! | MBR block          T x dim_count x (lo, hi)
//! | attr_count         u32                   |
//! | per attribute:                           |
//! |   flags            u8   (1 = var, 2 = nullable)
//! |   fixed offsets    T x u64               |
//! |   fixed sizes      T x u64               |
//! |   [var offsets + var sizes]              |
//! |   [validity offsets + validity sizes]    |
//! | has_coords         u8                    |
//! |   [coords offsets + coords sizes]        |
//! +------------------------------------------+
//! | CRC32 of all above u32                   |
//! +------------------------------------------+
//! ```

use crate::buffer::{Buffer, ConstBuffer};
use crate::fragment::metadata_file;
use byteorder::{ByteOrder, LittleEndian};
use tessera_core::constants::FORMAT_VERSION;
use tessera_core::{ArraySchema, ArrayType, Error, Result, Subarray};
use tessera_vfs::Vfs;

const FLAG_VAR: u8 = 1;
const FLAG_NULLABLE: u8 = 2;

/// Byte ranges of one tile stream: per-tile start offset and compressed
/// size within one attribute file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOffsets {
    /// Start offset of each tile blob.
    pub offsets: Vec<u64>,
    /// Compressed size of each tile blob.
    pub sizes: Vec<u64>,
}

impl StreamOffsets {
    /// Record the next tile blob.
    pub fn push(&mut self, offset: u64, size: u64) {
        self.offsets.push(offset);
        self.sizes.push(size);
    }

    /// The byte range of tile `t`.
    pub fn range(&self, t: u64) -> (u64, u64) {
        (self.offsets[t as usize], self.sizes[t as usize])
    }

    /// Total compressed bytes across tiles.
    pub fn total_size(&self) -> u64 {
        self.sizes.iter().sum()
    }
}

/// The tile streams of one attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttrStreams {
    /// Fixed stream (cell values, or cell offsets for var attributes).
    pub fixed: StreamOffsets,
    /// Values stream of a variable-length attribute.
    pub var: Option<StreamOffsets>,
    /// Validity stream of a nullable attribute.
    pub validity: Option<StreamOffsets>,
}

/// Per-fragment index: what the reader needs to locate every tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentMetadata {
    /// Format version the fragment was written with.
    pub version: u32,
    /// Dense or sparse fragment.
    pub dense: bool,
    /// The fragment's non-empty domain.
    pub non_empty_domain: Subarray,
    /// Number of data tiles.
    pub tile_count: u64,
    /// Minimum bounding rectangle of each tile.
    pub mbrs: Vec<Subarray>,
    /// Tile streams per schema attribute, in schema order.
    pub attrs: Vec<AttrStreams>,
    /// Coordinate stream (sparse fragments).
    pub coords: Option<StreamOffsets>,
}

impl FragmentMetadata {
    /// Fresh, empty book-keeping for a fragment being written.
    ///
    /// `dense` is a per-fragment property: unordered writes to a dense
    /// array produce sparse fragments.
    pub fn begin(schema: &ArraySchema, dense: bool, non_empty_domain: Subarray) -> FragmentMetadata {
        FragmentMetadata {
            version: FORMAT_VERSION,
            dense,
            non_empty_domain,
            tile_count: 0,
            mbrs: Vec::new(),
            attrs: schema
                .attributes
                .iter()
                .map(|a| AttrStreams {
                    fixed: StreamOffsets::default(),
                    var: a.cell_val_num.is_var().then(StreamOffsets::default),
                    validity: a.nullable.then(StreamOffsets::default),
                })
                .collect(),
            coords: (!dense).then(StreamOffsets::default),
        }
    }

    fn write_stream(out: &mut Buffer, stream: &StreamOffsets, tile_count: u64) {
        debug_assert_eq!(stream.offsets.len() as u64, tile_count);
        debug_assert_eq!(stream.sizes.len() as u64, tile_count);
        for &v in &stream.offsets {
            out.write_u64(v);
        }
        for &v in &stream.sizes {
            out.write_u64(v);
        }
    }

    fn read_stream(r: &mut ConstBuffer<'_>, tile_count: u64) -> Result<StreamOffsets> {
        let mut offsets = Vec::with_capacity(tile_count as usize);
        for _ in 0..tile_count {
            offsets.push(r.read_u64()?);
        }
        let mut sizes = Vec::with_capacity(tile_count as usize);
        for _ in 0..tile_count {
            sizes.push(r.read_u64()?);
        }
        Ok(StreamOffsets { offsets, sizes })
    }

    /// Serialize, CRC included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Buffer::with_capacity(1024);
        let mut word = [0u8; 4];
        LittleEndian::write_u32(&mut word, self.version);
        out.write_bytes(&word);
        out.write_bytes(&[self.dense as u8]);
        let dim_count = self.non_empty_domain.dim_count() as u32;
        LittleEndian::write_u32(&mut word, dim_count);
        out.write_bytes(&word);
        for &(lo, hi) in &self.non_empty_domain.ranges {
            out.write_u64(lo);
            out.write_u64(hi);
        }
        out.write_u64(self.tile_count);
        for mbr in &self.mbrs {
            for &(lo, hi) in &mbr.ranges {
                out.write_u64(lo);
                out.write_u64(hi);
            }
        }
        LittleEndian::write_u32(&mut word, self.attrs.len() as u32);
        out.write_bytes(&word);
        for streams in &self.attrs {
            let mut flags = 0u8;
            if streams.var.is_some() {
                flags |= FLAG_VAR;
            }
            if streams.validity.is_some() {
                flags |= FLAG_NULLABLE;
            }
            out.write_bytes(&[flags]);
            Self::write_stream(&mut out, &streams.fixed, self.tile_count);
            if let Some(var) = &streams.var {
                Self::write_stream(&mut out, var, self.tile_count);
            }
            if let Some(validity) = &streams.validity {
                Self::write_stream(&mut out, validity, self.tile_count);
            }
        }
        out.write_bytes(&[self.coords.is_some() as u8]);
        if let Some(coords) = &self.coords {
            Self::write_stream(&mut out, coords, self.tile_count);
        }

        let crc = crc32fast::hash(out.as_slice());
        LittleEndian::write_u32(&mut word, crc);
        out.write_bytes(&word);
        out.into_vec()
    }

    /// Deserialize and cross-check against the array schema.
    pub fn from_bytes(schema: &ArraySchema, buf: &[u8]) -> Result<FragmentMetadata> {
        if buf.len() < 4 {
            return Err(Error::format("book-keeping file too short"));
        }
        let (body, crc_bytes) = buf.split_at(buf.len() - 4);
        let stored_crc = LittleEndian::read_u32(crc_bytes);
        let actual_crc = crc32fast::hash(body);
        if stored_crc != actual_crc {
            return Err(Error::format(format!(
                "book-keeping CRC mismatch: stored {stored_crc:#010x}, computed {actual_crc:#010x}"
            )));
        }

        let mut r = ConstBuffer::new(body);
        let version = r.read_u32()?;
        if version > FORMAT_VERSION {
            return Err(Error::format(format!(
                "book-keeping version {version} is newer than supported {FORMAT_VERSION}"
            )));
        }
        let dense = r.read(1)?[0] != 0;
        if dense && schema.array_type == ArrayType::Sparse {
            return Err(Error::format(
                "dense fragment in a sparse array",
            ));
        }
        let dim_count = r.read_u32()? as usize;
        if dim_count != schema.domain.dim_count() {
            return Err(Error::format(format!(
                "fragment has {dim_count} dimensions, schema has {}",
                schema.domain.dim_count()
            )));
        }
        let mut ranges = Vec::with_capacity(dim_count);
        for _ in 0..dim_count {
            ranges.push((r.read_u64()?, r.read_u64()?));
        }
        let non_empty_domain = Subarray::new(ranges);

        let tile_count = r.read_u64()?;
        let mut mbrs = Vec::with_capacity(tile_count as usize);
        for _ in 0..tile_count {
            let mut ranges = Vec::with_capacity(dim_count);
            for _ in 0..dim_count {
                ranges.push((r.read_u64()?, r.read_u64()?));
            }
            mbrs.push(Subarray::new(ranges));
        }

        let attr_count = r.read_u32()? as usize;
        if attr_count != schema.attributes.len() {
            return Err(Error::format(format!(
                "fragment has {attr_count} attributes, schema has {}",
                schema.attributes.len()
            )));
        }
        let mut attrs = Vec::with_capacity(attr_count);
        for attr in &schema.attributes {
            let flags = r.read(1)?[0];
            let is_var = flags & FLAG_VAR != 0;
            let is_nullable = flags & FLAG_NULLABLE != 0;
            if is_var != attr.cell_val_num.is_var() || is_nullable != attr.nullable {
                return Err(Error::format(format!(
                    "stream flags of attribute `{}` disagree with the schema",
                    attr.name
                )));
            }
            let fixed = Self::read_stream(&mut r, tile_count)?;
            let var = if is_var {
                Some(Self::read_stream(&mut r, tile_count)?)
            } else {
                None
            };
            let validity = if is_nullable {
                Some(Self::read_stream(&mut r, tile_count)?)
            } else {
                None
            };
            attrs.push(AttrStreams {
                fixed,
                var,
                validity,
            });
        }

        let has_coords = r.read(1)?[0] != 0;
        if has_coords == dense {
            return Err(Error::format(
                "coordinate stream presence disagrees with the density flag",
            ));
        }
        let coords = if has_coords {
            Some(Self::read_stream(&mut r, tile_count)?)
        } else {
            None
        };
        if !r.end() {
            return Err(Error::format("trailing bytes in book-keeping file"));
        }

        Ok(FragmentMetadata {
            version,
            dense,
            non_empty_domain,
            tile_count,
            mbrs,
            attrs,
            coords,
        })
    }

    /// Load and validate a fragment's book-keeping file.
    pub fn load(vfs: &Vfs, schema: &ArraySchema, frag_uri: &str) -> Result<FragmentMetadata> {
        let path = metadata_file(frag_uri);
        let bytes = vfs.read_file(&path)?;
        Self::from_bytes(schema, &bytes)
    }

    /// Persist next to the fragment's tile files.
    pub fn store(&self, vfs: &Vfs, frag_uri: &str) -> Result<()> {
        vfs.write_file(&metadata_file(frag_uri), &self.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{Attribute, CellValNum, Datatype, Dimension, Domain, Layout};

    fn sparse_schema() -> ArraySchema {
        ArraySchema::new(
            ArrayType::Sparse,
            Layout::RowMajor,
            Layout::RowMajor,
            2,
            Domain::new(
                Datatype::Int64,
                vec![Dimension::new("r", 1, 4, 2), Dimension::new("c", 1, 4, 2)],
            ),
            vec![
                Attribute::new("a", Datatype::Int32),
                Attribute::new("s", Datatype::Char)
                    .with_cell_val_num(CellValNum::Var)
                    .nullable(),
            ],
        )
        .unwrap()
    }

    fn sample(schema: &ArraySchema) -> FragmentMetadata {
        let mut meta = FragmentMetadata::begin(schema, false, Subarray::new(vec![(1, 4), (1, 3)]));
        meta.tile_count = 2;
        meta.mbrs = vec![
            Subarray::new(vec![(1, 1), (1, 2)]),
            Subarray::new(vec![(2, 4), (1, 3)]),
        ];
        meta.attrs[0].fixed.push(0, 16);
        meta.attrs[0].fixed.push(16, 12);
        meta.attrs[1].fixed.push(0, 24);
        meta.attrs[1].fixed.push(24, 24);
        let var = meta.attrs[1].var.as_mut().unwrap();
        var.push(0, 9);
        var.push(9, 30);
        let validity = meta.attrs[1].validity.as_mut().unwrap();
        validity.push(0, 10);
        validity.push(10, 10);
        let coords = meta.coords.as_mut().unwrap();
        coords.push(0, 40);
        coords.push(40, 44);
        meta
    }

    #[test]
    fn round_trip() {
        let schema = sparse_schema();
        let meta = sample(&schema);
        let parsed = FragmentMetadata::from_bytes(&schema, &meta.to_bytes()).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn crc_detects_corruption() {
        let schema = sparse_schema();
        let mut bytes = sample(&schema).to_bytes();
        bytes[10] ^= 1;
        assert!(FragmentMetadata::from_bytes(&schema, &bytes)
            .unwrap_err()
            .is_corruption());
    }

    #[test]
    fn truncation_detected() {
        let schema = sparse_schema();
        let bytes = sample(&schema).to_bytes();
        assert!(FragmentMetadata::from_bytes(&schema, &bytes[..bytes.len() - 1])
            .unwrap_err()
            .is_corruption());
    }

    #[test]
    fn schema_mismatch_detected() {
        let schema = sparse_schema();
        let bytes = sample(&schema).to_bytes();
        let other = ArraySchema::new(
            ArrayType::Sparse,
            Layout::RowMajor,
            Layout::RowMajor,
            2,
            Domain::new(
                Datatype::Int64,
                vec![Dimension::new("r", 1, 4, 2), Dimension::new("c", 1, 4, 2)],
            ),
            vec![Attribute::new("a", Datatype::Int32)],
        )
        .unwrap();
        assert!(FragmentMetadata::from_bytes(&other, &bytes).is_err());
    }

    #[test]
    fn stream_totals() {
        let schema = sparse_schema();
        let meta = sample(&schema);
        assert_eq!(meta.attrs[0].fixed.total_size(), 28);
        assert_eq!(meta.attrs[0].fixed.range(1), (16, 12));
    }
}
