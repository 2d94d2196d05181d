//! Fragment reader.
//!
//! Serves tile fetches against one finalized fragment: exact byte ranges
//! from the book-keeping, decompression, variable-length assembly, and
//! cell addressing (arithmetic for dense fragments, MBR scan plus in-tile
//! binary search for sparse ones). Loaded tiles are cached per fragment
//! and shared by reference across reader threads.

use crate::codec;
use crate::fragment::{
    attr_file, attr_validity_file, attr_var_file, coords_file, FragmentId, FragmentMetadata,
};
use crate::tile::{Tile, VarTile};
use parking_lot::Mutex;
use smallvec::smallvec;
use std::collections::HashMap;
use std::sync::Arc;
use tessera_core::order::rank;
use tessera_core::{
    ArraySchema, ArrayType, Compressor, Coords, Datatype, Error, GlobalOrder, Result, Subarray,
};
use tessera_vfs::Vfs;

/// Matches the writer's coordinate-tile compressor.
const COORDS_COMPRESSOR: Compressor = Compressor::Zstd;

/// One attribute's decoded tile.
#[derive(Debug)]
pub struct LoadedAttrTile {
    payload: LoadedPayload,
    validity: Option<Tile>,
}

#[derive(Debug)]
enum LoadedPayload {
    Fixed(Tile),
    Var(VarTile),
}

impl LoadedAttrTile {
    /// Cells in this tile.
    pub fn cell_num(&self) -> u64 {
        match &self.payload {
            LoadedPayload::Fixed(t) => t.cell_num(),
            LoadedPayload::Var(t) => t.cell_num(),
        }
    }

    /// The value bytes of one cell.
    pub fn cell_bytes(&self, idx: u64) -> &[u8] {
        match &self.payload {
            LoadedPayload::Fixed(t) => t.cell_bytes(idx),
            LoadedPayload::Var(t) => t.value_bytes(idx),
        }
    }

    /// Whether the cell is null (nullable attributes only).
    pub fn is_null(&self, idx: u64) -> bool {
        self.validity
            .as_ref()
            .map(|v| v.cell_bytes(idx)[0] == 0)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TileKey {
    Attr { attr_id: usize, tile: u64 },
    Coords { tile: u64 },
}

/// Read access to one finalized fragment.
pub struct FragmentReader {
    schema: Arc<ArraySchema>,
    meta: Arc<FragmentMetadata>,
    id: FragmentId,
    uri: String,
    attr_cache: Mutex<HashMap<TileKey, Arc<LoadedAttrTile>>>,
    coords_cache: Mutex<HashMap<u64, Arc<Tile>>>,
    /// Dense fragments: index-space lows of the tile-aligned box and the
    /// fragment-local tile grid shape.
    dense_tile_lo: Coords,
    dense_grid: Coords,
}

impl FragmentReader {
    /// Wrap loaded book-keeping.
    pub fn new(
        schema: Arc<ArraySchema>,
        meta: Arc<FragmentMetadata>,
        id: FragmentId,
        uri: String,
        order: &GlobalOrder,
    ) -> FragmentReader {
        let (dense_tile_lo, dense_grid) = if meta.dense {
            let dt = schema.domain.datatype;
            let extents = order.extents();
            let mut tile_lo: Coords = smallvec![];
            let mut grid: Coords = smallvec![];
            for ((dim, &(lo, hi)), &e) in schema
                .domain
                .dims
                .iter()
                .zip(&meta.non_empty_domain.ranges)
                .zip(extents)
            {
                let e = e.max(1);
                let lo_idx = dt.index_of(lo, dim.lo) / e;
                let hi_idx = dt.index_of(hi, dim.lo) / e;
                tile_lo.push(lo_idx);
                grid.push(hi_idx - lo_idx + 1);
            }
            (tile_lo, grid)
        } else {
            (smallvec![], smallvec![])
        };
        FragmentReader {
            schema,
            meta,
            id,
            uri,
            attr_cache: Mutex::new(HashMap::new()),
            coords_cache: Mutex::new(HashMap::new()),
            dense_tile_lo,
            dense_grid,
        }
    }

    /// Fragment identity.
    pub fn id(&self) -> &FragmentId {
        &self.id
    }

    /// Creation timestamp; larger wins on coordinate collisions.
    pub fn timestamp(&self) -> u64 {
        self.id.timestamp
    }

    /// Fragment directory URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The book-keeping.
    pub fn meta(&self) -> &FragmentMetadata {
        &self.meta
    }

    /// Number of data tiles.
    pub fn tile_count(&self) -> u64 {
        self.meta.tile_count
    }

    /// The fragment's non-empty domain.
    pub fn non_empty_domain(&self) -> &Subarray {
        &self.meta.non_empty_domain
    }

    /// Tiles whose MBR intersects `subarray`, each marked `true` when the
    /// MBR lies fully inside it.
    pub fn overlapping_tiles(&self, subarray: &Subarray) -> Vec<(u64, bool)> {
        let dt = self.schema.domain.datatype;
        self.meta
            .mbrs
            .iter()
            .enumerate()
            .filter(|(_, mbr)| mbr.intersects(dt, subarray))
            .map(|(t, mbr)| (t as u64, mbr.within(dt, subarray)))
            .collect()
    }

    /// Load (or fetch from cache) one attribute tile.
    pub fn load_attr_tile(
        &self,
        vfs: &Vfs,
        attr_id: usize,
        tile: u64,
    ) -> Result<Arc<LoadedAttrTile>> {
        let key = TileKey::Attr { attr_id, tile };
        if let Some(hit) = self.attr_cache.lock().get(&key) {
            return Ok(Arc::clone(hit));
        }
        let loaded = Arc::new(self.fetch_attr_tile(vfs, attr_id, tile)?);
        self.attr_cache
            .lock()
            .insert(key, Arc::clone(&loaded));
        Ok(loaded)
    }

    fn fetch_attr_tile(&self, vfs: &Vfs, attr_id: usize, tile: u64) -> Result<LoadedAttrTile> {
        let attr = self.schema.attribute(attr_id);
        let streams = &self.meta.attrs[attr_id];
        let wrap = |e: Error| e.in_query(attr.name.as_str(), tile);

        let (offset, size) = streams.fixed.range(tile);
        let packed = vfs
            .read_at(&attr_file(&self.uri, &attr.name), offset, size as usize)
            .map_err(wrap)?;

        let payload = match attr.cell_size() {
            Some(cell_size) => {
                let raw = codec::decompress(attr.compressor, attr.datatype, &packed)
                    .map_err(|e| wrap(e.into()))?;
                LoadedPayload::Fixed(Tile::new(attr.datatype, cell_size, raw).map_err(wrap)?)
            }
            None => {
                let raw = codec::decompress(attr.compressor, Datatype::UInt64, &packed)
                    .map_err(|e| wrap(e.into()))?;
                let offsets = Tile::new(Datatype::UInt64, 8, raw).map_err(wrap)?;
                let var_streams = streams
                    .var
                    .as_ref()
                    .ok_or_else(|| wrap(Error::format("missing values book-keeping")))?;
                let (var_offset, var_size) = var_streams.range(tile);
                let var_packed = vfs
                    .read_at(
                        &attr_var_file(&self.uri, &attr.name),
                        var_offset,
                        var_size as usize,
                    )
                    .map_err(wrap)?;
                let values = codec::decompress(attr.compressor, attr.datatype, &var_packed)
                    .map_err(|e| wrap(e.into()))?;
                LoadedPayload::Var(VarTile::new(offsets, values).map_err(wrap)?)
            }
        };

        let validity = match &streams.validity {
            None => None,
            Some(validity_streams) => {
                let (v_offset, v_size) = validity_streams.range(tile);
                let packed = vfs
                    .read_at(
                        &attr_validity_file(&self.uri, &attr.name),
                        v_offset,
                        v_size as usize,
                    )
                    .map_err(wrap)?;
                let raw = codec::decompress(attr.compressor, Datatype::UInt8, &packed)
                    .map_err(|e| wrap(e.into()))?;
                Some(Tile::new(Datatype::UInt8, 1, raw).map_err(wrap)?)
            }
        };

        Ok(LoadedAttrTile { payload, validity })
    }

    /// Load (or fetch from cache) one coordinates tile.
    pub fn load_coords_tile(&self, vfs: &Vfs, tile: u64) -> Result<Arc<Tile>> {
        if let Some(hit) = self.coords_cache.lock().get(&tile) {
            return Ok(Arc::clone(hit));
        }
        let streams = self
            .meta
            .coords
            .as_ref()
            .ok_or_else(|| Error::internal("coordinate fetch on a dense fragment"))?;
        let (offset, size) = streams.range(tile);
        let packed = vfs.read_at(&coords_file(&self.uri), offset, size as usize)?;
        let dt = self.schema.domain.datatype;
        let raw = codec::decompress(COORDS_COMPRESSOR, dt, &packed)
            .map_err(|e| Error::from(e).in_query(tessera_core::constants::COORDS_NAME, tile))?;
        let cell_size = dt.size() * self.schema.domain.dim_count();
        let loaded = Arc::new(Tile::new(dt, cell_size, raw)?);
        self.coords_cache.lock().insert(tile, Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Cells in tile `t` (coordinate count for sparse, extent product for
    /// dense).
    pub fn tile_cell_count(&self, vfs: &Vfs, tile: u64) -> Result<u64> {
        if self.meta.dense {
            self.schema.tile_cell_count()
        } else {
            Ok(self.load_coords_tile(vfs, tile)?.cell_num())
        }
    }

    /// Decode the coordinates of one sparse cell.
    pub fn coords_at(&self, coords_tile: &Tile, cell: u64) -> Coords {
        let dt = self.schema.domain.datatype;
        let bytes = coords_tile.cell_bytes(cell);
        let size = dt.size();
        (0..self.schema.domain.dim_count())
            .map(|d| dt.decode(&bytes[d * size..]))
            .collect()
    }

    /// Locate `coords` in this fragment, if present.
    ///
    /// Dense fragments answer arithmetically; sparse fragments scan
    /// candidate MBRs and binary-search the tile's global order.
    pub fn find_cell(
        &self,
        vfs: &Vfs,
        order: &GlobalOrder,
        coords: &[u64],
    ) -> Result<Option<(u64, u64)>> {
        let dt = self.schema.domain.datatype;
        if !self.meta.non_empty_domain.contains(dt, coords) {
            return Ok(None);
        }
        if self.meta.dense {
            return Ok(Some(self.dense_locate(order, coords)));
        }
        for (tile, mbr) in self.meta.mbrs.iter().enumerate() {
            if !mbr.contains(dt, coords) {
                continue;
            }
            let tile = tile as u64;
            let coords_tile = self.load_coords_tile(vfs, tile)?;
            let n = coords_tile.cell_num();
            let mut lo = 0u64;
            let mut hi = n;
            while lo < hi {
                let mid = (lo + hi) / 2;
                let mid_coords = self.coords_at(&coords_tile, mid);
                match order.cmp_global(&mid_coords, coords) {
                    std::cmp::Ordering::Less => lo = mid + 1,
                    std::cmp::Ordering::Greater => hi = mid,
                    std::cmp::Ordering::Equal => return Ok(Some((tile, mid))),
                }
            }
        }
        Ok(None)
    }

    /// Tile index and in-tile cell rank of a dense coordinate.
    pub fn dense_locate(&self, order: &GlobalOrder, coords: &[u64]) -> (u64, u64) {
        debug_assert!(self.meta.dense);
        let tc = order.tile_coords(coords);
        let local: Coords = tc
            .iter()
            .zip(&self.dense_tile_lo)
            .map(|(&t, &lo)| t - lo)
            .collect();
        let tile = rank(&local, &self.dense_grid, self.schema.tile_order);
        (tile, order.cell_rank_in_tile(coords))
    }
}

impl std::fmt::Debug for FragmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentReader")
            .field("uri", &self.uri)
            .field("tiles", &self.meta.tile_count)
            .field("dense", &self.meta.dense)
            .finish()
    }
}
