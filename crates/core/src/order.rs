//! Global-order arithmetic.
//!
//! The global order of an array is defined by its tile order (the order of
//! space tiles on disk) and its cell order (the order of cells within one
//! space tile). This module provides rank/unrank over extents, space-tile
//! ids, a total-order comparator over coordinate tuples, and iteration of
//! dense boxes in any supported order.

use crate::datatype::Datatype;
use crate::error::{Error, Result};
use crate::hilbert;
use crate::layout::Layout;
use crate::schema::{ArraySchema, Coords, Subarray};
use smallvec::{smallvec, SmallVec};
use std::cmp::Ordering;

/// Lexicographic rank of `idx` within `shape`, dimension 0 major.
pub fn row_major_rank(idx: &[u64], shape: &[u64]) -> u64 {
    let mut rank = 0u64;
    for (i, &x) in idx.iter().enumerate() {
        rank = rank * shape[i] + x;
    }
    rank
}

/// Lexicographic rank of `idx` within `shape`, dimension N-1 major.
pub fn col_major_rank(idx: &[u64], shape: &[u64]) -> u64 {
    let mut rank = 0u64;
    for i in (0..idx.len()).rev() {
        rank = rank * shape[i] + idx[i];
    }
    rank
}

/// Rank in the given order (`RowMajor` or `ColMajor`).
pub fn rank(idx: &[u64], shape: &[u64], order: Layout) -> u64 {
    match order {
        Layout::ColMajor => col_major_rank(idx, shape),
        _ => row_major_rank(idx, shape),
    }
}

/// Inverse of [`rank`], writing the index tuple into `out`.
pub fn unrank(mut r: u64, shape: &[u64], order: Layout, out: &mut [u64]) {
    match order {
        Layout::ColMajor => {
            for i in 0..shape.len() {
                out[i] = r % shape[i];
                r /= shape[i];
            }
        }
        _ => {
            for i in (0..shape.len()).rev() {
                out[i] = r % shape[i];
                r /= shape[i];
            }
        }
    }
}

/// Lexicographic comparison of coordinate tuples in row- or col-major
/// dimension order.
pub fn cmp_coords(datatype: Datatype, a: &[u64], b: &[u64], order: Layout) -> Ordering {
    let n = a.len();
    let dims: SmallVec<[usize; 4]> = match order {
        Layout::ColMajor => (0..n).rev().collect(),
        _ => (0..n).collect(),
    };
    for i in dims {
        match datatype.cmp_bits(a[i], b[i]) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Comparator and id computations for one schema's global order.
#[derive(Debug, Clone)]
pub struct GlobalOrder {
    datatype: Datatype,
    tile_order: Layout,
    cell_order: Layout,
    dim_lo: Coords,
    dim_hi: Coords,
    extents: Coords,
    tile_grid: Coords,
    hilbert_bits: u32,
}

impl GlobalOrder {
    /// Build from a validated schema.
    pub fn new(schema: &ArraySchema) -> Result<GlobalOrder> {
        let domain = &schema.domain;
        let extents = domain.effective_extents()?;
        let tile_grid = domain.tile_grid()?;
        Ok(GlobalOrder {
            datatype: domain.datatype,
            tile_order: schema.tile_order,
            cell_order: schema.cell_order,
            dim_lo: domain.dims.iter().map(|d| d.lo).collect(),
            dim_hi: domain.dims.iter().map(|d| d.hi).collect(),
            extents,
            tile_grid,
            hilbert_bits: hilbert::bits_per_dim(domain.dims.len()),
        })
    }

    /// Number of dimensions.
    pub fn dim_count(&self) -> usize {
        self.dim_lo.len()
    }

    /// Effective space-tile extents.
    pub fn extents(&self) -> &[u64] {
        &self.extents
    }

    /// Space-tile coordinates of a cell.
    pub fn tile_coords(&self, coords: &[u64]) -> Coords {
        coords
            .iter()
            .zip(&self.dim_lo)
            .zip(&self.extents)
            .map(|((&c, &lo), &e)| self.datatype.tile_of(c, lo, e))
            .collect()
    }

    /// Space-tile id of a cell: the rank of its tile coordinates in the
    /// tile order.
    pub fn tile_id(&self, coords: &[u64]) -> u64 {
        let tc = self.tile_coords(coords);
        rank(&tc, &self.tile_grid, self.tile_order)
    }

    /// Space-tile id from tile coordinates.
    pub fn tile_id_from_tile_coords(&self, tile_coords: &[u64]) -> u64 {
        rank(tile_coords, &self.tile_grid, self.tile_order)
    }

    /// Hilbert id of a cell, every dimension scaled to equal precision.
    pub fn hilbert_id(&self, coords: &[u64]) -> u64 {
        let levels = 1u64 << self.hilbert_bits;
        let scaled: Coords = coords
            .iter()
            .zip(self.dim_lo.iter().zip(&self.dim_hi))
            .map(|(&c, (&lo, &hi))| self.datatype.scale_to(c, lo, hi, levels))
            .collect();
        hilbert::hilbert_index(&scaled, self.hilbert_bits)
    }

    /// Rank of a cell within its space tile, in the cell order. Integer
    /// domains with declared extents only (dense write/read paths).
    pub fn cell_rank_in_tile(&self, coords: &[u64]) -> u64 {
        debug_assert!(self.datatype.is_integer());
        let in_tile: Coords = coords
            .iter()
            .zip(&self.dim_lo)
            .zip(&self.extents)
            .map(|((&c, &lo), &e)| self.datatype.index_of(c, lo) % e.max(1))
            .collect();
        rank(&in_tile, &self.extents, self.cell_order)
    }

    /// Compare two cells in cell order alone (no tile component).
    pub fn cmp_cell_order(&self, a: &[u64], b: &[u64]) -> Ordering {
        match self.cell_order {
            Layout::Hilbert => self
                .hilbert_id(a)
                .cmp(&self.hilbert_id(b))
                .then_with(|| self.cmp_lexicographic(a, b, Layout::RowMajor)),
            Layout::ColMajor => self.cmp_lexicographic(a, b, Layout::ColMajor),
            _ => self.cmp_lexicographic(a, b, Layout::RowMajor),
        }
    }

    fn cmp_lexicographic(&self, a: &[u64], b: &[u64], order: Layout) -> Ordering {
        cmp_coords(self.datatype, a, b, order)
    }

    /// Total global-order comparison: tile id, then cell order.
    pub fn cmp_global(&self, a: &[u64], b: &[u64]) -> Ordering {
        self.tile_id(a)
            .cmp(&self.tile_id(b))
            .then_with(|| self.cmp_cell_order(a, b))
    }
}

/// Iterator over the index-space cells of a dense box, in row-major,
/// col-major, or global order.
///
/// Operates on domain-relative indices (`0..len` per dimension); the caller
/// converts to coordinate bits at the boundary. Holds no borrows, so a
/// query can keep it alive across incomplete submissions.
#[derive(Debug, Clone)]
pub struct DenseBoxIter {
    order: Layout,
    tile_order: Layout,
    cell_order: Layout,
    sub_lo: Coords,
    sub_hi: Coords,
    extents: Coords,
    // Tile odometer (global order only), in tile-index space.
    tile_lo: Coords,
    tile_hi: Coords,
    tile_cur: Coords,
    // Cell odometer within the current box (whole subarray for
    // row/col-major, tile-intersection box for global order).
    box_lo: Coords,
    box_hi: Coords,
    cur: Coords,
    exhausted: bool,
}

impl DenseBoxIter {
    /// Iterate `sub` (inclusive index-space bounds) in `order`.
    ///
    /// `order` is the *traversal* order: `RowMajor`, `ColMajor`, or
    /// `GlobalOrder` (tiles in `tile_order`, cells in `cell_order`).
    pub fn new(
        sub_lo: Coords,
        sub_hi: Coords,
        extents: Coords,
        order: Layout,
        tile_order: Layout,
        cell_order: Layout,
    ) -> DenseBoxIter {
        let dims = sub_lo.len();
        let empty = sub_lo.iter().zip(&sub_hi).any(|(lo, hi)| lo > hi);
        let mut iter = DenseBoxIter {
            order: match order {
                Layout::GlobalOrder => Layout::GlobalOrder,
                Layout::ColMajor => Layout::ColMajor,
                _ => Layout::RowMajor,
            },
            tile_order,
            cell_order,
            sub_lo: sub_lo.clone(),
            sub_hi: sub_hi.clone(),
            extents: extents.clone(),
            tile_lo: smallvec![0; dims],
            tile_hi: smallvec![0; dims],
            tile_cur: smallvec![0; dims],
            box_lo: sub_lo.clone(),
            box_hi: sub_hi.clone(),
            cur: sub_lo.clone(),
            exhausted: empty,
        };
        if iter.exhausted {
            return iter;
        }
        if iter.order == Layout::GlobalOrder {
            iter.tile_lo = sub_lo
                .iter()
                .zip(&extents)
                .map(|(&lo, &e)| lo / e.max(1))
                .collect();
            iter.tile_hi = sub_hi
                .iter()
                .zip(&extents)
                .map(|(&hi, &e)| hi / e.max(1))
                .collect();
            iter.tile_cur = iter.tile_lo.clone();
            iter.enter_tile();
        }
        iter
    }

    fn enter_tile(&mut self) {
        for d in 0..self.cur.len() {
            let e = self.extents[d].max(1);
            let t_lo = self.tile_cur[d] * e;
            let t_hi = t_lo + e - 1;
            self.box_lo[d] = t_lo.max(self.sub_lo[d]);
            self.box_hi[d] = t_hi.min(self.sub_hi[d]);
            self.cur[d] = self.box_lo[d];
        }
    }

    fn step_odometer(cur: &mut [u64], lo: &[u64], hi: &[u64], order: Layout) -> bool {
        let n = cur.len();
        let dims: SmallVec<[usize; 4]> = match order {
            Layout::ColMajor => (0..n).collect(),
            _ => (0..n).rev().collect(),
        };
        for d in dims {
            if cur[d] < hi[d] {
                cur[d] += 1;
                return true;
            }
            cur[d] = lo[d];
        }
        false
    }

    /// Next index tuple, or `None` when the box is exhausted.
    pub fn next_cell(&mut self) -> Option<Coords> {
        if self.exhausted {
            return None;
        }
        let out = self.cur.clone();
        match self.order {
            Layout::GlobalOrder => {
                let cell_order = self.cell_order;
                if !Self::step_odometer(&mut self.cur, &self.box_lo, &self.box_hi, cell_order) {
                    // Current tile drained; advance the tile odometer.
                    let tile_order = self.tile_order;
                    if Self::step_odometer(&mut self.tile_cur, &self.tile_lo, &self.tile_hi, tile_order)
                    {
                        self.enter_tile();
                    } else {
                        self.exhausted = true;
                    }
                }
            }
            order => {
                if !Self::step_odometer(&mut self.cur, &self.sub_lo, &self.sub_hi, order) {
                    self.exhausted = true;
                }
            }
        }
        Some(out)
    }

    /// Total number of cells in the box.
    pub fn total_cells(&self) -> u64 {
        self.sub_lo
            .iter()
            .zip(&self.sub_hi)
            .map(|(&lo, &hi)| if hi >= lo { hi - lo + 1 } else { 0 })
            .fold(1u64, |acc, len| acc.saturating_mul(len))
    }
}

/// Convert coordinate bits to index space relative to per-dimension lows.
pub fn coords_to_index(datatype: Datatype, coords: &[u64], dim_lo: &[u64]) -> Coords {
    coords
        .iter()
        .zip(dim_lo)
        .map(|(&c, &lo)| datatype.index_of(c, lo))
        .collect()
}

/// Convert index space back to coordinate bits.
pub fn index_to_coords(datatype: Datatype, idx: &[u64], dim_lo: &[u64]) -> Coords {
    idx.iter()
        .zip(dim_lo)
        .map(|(&i, &lo)| datatype.at_index(lo, i))
        .collect()
}

/// Index-space box of a subarray relative to the domain lows.
pub fn subarray_to_index_box(
    datatype: Datatype,
    subarray: &Subarray,
    dim_lo: &[u64],
) -> (Coords, Coords) {
    let lo = subarray
        .ranges
        .iter()
        .zip(dim_lo)
        .map(|(&(lo, _), &dlo)| datatype.index_of(lo, dlo))
        .collect();
    let hi = subarray
        .ranges
        .iter()
        .zip(dim_lo)
        .map(|(&(_, hi), &dlo)| datatype.index_of(hi, dlo))
        .collect();
    (lo, hi)
}

/// Positional rank of an index tuple inside a box, in row- or col-major
/// order; used to place cells into positionally-shaped result buffers.
pub fn rank_in_box(idx: &[u64], box_lo: &[u64], box_hi: &[u64], order: Layout) -> u64 {
    let shape: Coords = box_lo
        .iter()
        .zip(box_hi)
        .map(|(&lo, &hi)| hi - lo + 1)
        .collect();
    let rel: Coords = idx.iter().zip(box_lo).map(|(&i, &lo)| i - lo).collect();
    rank(&rel, &shape, order)
}
