//! Decoded tile payloads.
//!
//! A tile is the unit of I/O and compression. After decompression a tile
//! is a flat byte payload of equally sized cells; variable-length
//! attributes pair an offsets tile with a values payload, nullable
//! attributes carry a validity payload, sparse fragments a coordinates
//! payload.

use byteorder::{ByteOrder, LittleEndian};
use tessera_core::{Datatype, Error, Result};

/// A decompressed fixed-stride tile payload.
#[derive(Debug, Clone)]
pub struct Tile {
    /// Value datatype of the payload.
    pub datatype: Datatype,
    /// Bytes per cell in this payload (attribute cell size, 8 for offset
    /// tiles, `dims * coord_size` for coordinate tiles).
    pub cell_size: usize,
    /// The payload.
    pub data: Vec<u8>,
}

impl Tile {
    /// Wrap a payload.
    pub fn new(datatype: Datatype, cell_size: usize, data: Vec<u8>) -> Result<Tile> {
        if cell_size == 0 || data.len() % cell_size != 0 {
            return Err(Error::format(format!(
                "tile payload of {} bytes is not a multiple of the {cell_size}-byte cell",
                data.len()
            )));
        }
        Ok(Tile {
            datatype,
            cell_size,
            data,
        })
    }

    /// Number of cells in the payload.
    pub fn cell_num(&self) -> u64 {
        (self.data.len() / self.cell_size) as u64
    }

    /// The bytes of one cell.
    pub fn cell_bytes(&self, idx: u64) -> &[u8] {
        let start = idx as usize * self.cell_size;
        &self.data[start..start + self.cell_size]
    }

    /// Read cell `idx` as a little-endian `u64` (offset tiles).
    pub fn cell_u64(&self, idx: u64) -> u64 {
        LittleEndian::read_u64(self.cell_bytes(idx))
    }
}

/// A variable-length tile: per-cell offsets plus a values payload.
///
/// Offsets are tile-relative on disk; [`VarTile::new`] validates
/// monotonicity against the values payload so a corrupt tile fails loudly
/// instead of slicing out of bounds.
#[derive(Debug, Clone)]
pub struct VarTile {
    /// Per-cell start offsets into `values` (one u64 per cell).
    pub offsets: Tile,
    /// Concatenated cell values.
    pub values: Vec<u8>,
}

impl VarTile {
    /// Pair an offsets tile with its values payload.
    pub fn new(offsets: Tile, values: Vec<u8>) -> Result<VarTile> {
        let n = offsets.cell_num();
        let mut prev = 0u64;
        for i in 0..n {
            let off = offsets.cell_u64(i);
            if off < prev || off > values.len() as u64 {
                return Err(Error::format(format!(
                    "variable-length offsets are not monotonic at cell {i}"
                )));
            }
            prev = off;
        }
        Ok(VarTile { offsets, values })
    }

    /// Number of cells.
    pub fn cell_num(&self) -> u64 {
        self.offsets.cell_num()
    }

    /// The value bytes of one cell.
    pub fn value_bytes(&self, idx: u64) -> &[u8] {
        let start = self.offsets.cell_u64(idx) as usize;
        let end = if idx + 1 < self.cell_num() {
            self.offsets.cell_u64(idx + 1) as usize
        } else {
            self.values.len()
        };
        &self.values[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_tile_addressing() {
        let data: Vec<u8> = (0..12).collect();
        let tile = Tile::new(Datatype::Int32, 4, data).unwrap();
        assert_eq!(tile.cell_num(), 3);
        assert_eq!(tile.cell_bytes(1), &[4, 5, 6, 7]);
    }

    #[test]
    fn misaligned_payload_rejected() {
        assert!(Tile::new(Datatype::Int32, 4, vec![0u8; 6]).is_err());
    }

    #[test]
    fn var_tile_slicing() {
        let mut offsets = Vec::new();
        for off in [0u64, 3, 3, 7] {
            offsets.extend_from_slice(&off.to_le_bytes());
        }
        let offsets = Tile::new(Datatype::UInt64, 8, offsets).unwrap();
        let var = VarTile::new(offsets, b"abcdefghij".to_vec()).unwrap();
        assert_eq!(var.cell_num(), 4);
        assert_eq!(var.value_bytes(0), b"abc");
        assert_eq!(var.value_bytes(1), b"");
        assert_eq!(var.value_bytes(2), b"defg");
        assert_eq!(var.value_bytes(3), b"hij");
    }

    #[test]
    fn non_monotonic_offsets_rejected() {
        let mut offsets = Vec::new();
        for off in [0u64, 9, 4] {
            offsets.extend_from_slice(&off.to_le_bytes());
        }
        let offsets = Tile::new(Datatype::UInt64, 8, offsets).unwrap();
        assert!(VarTile::new(offsets, vec![0u8; 10]).is_err());
    }
}
