//! Read-path planning and execution.
//!
//! Planning selects the fragments whose non-empty domain intersects the
//! subarray and, for sparse results, merges candidate cells across
//! fragments with latest-timestamp-wins. Execution streams cells into the
//! caller's buffers, suspending with `Incomplete` when a buffer would
//! overflow; the resume state lives inside the query and survives across
//! submissions.

use crate::array::Array;
use crate::context::Context;
use crate::query::AttrBuffer;
use rayon::prelude::*;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tessera_core::order::{cmp_coords, index_to_coords, subarray_to_index_box, DenseBoxIter};
use tessera_core::{
    ArrayType, Attribute, Coords, Datatype, Error, Layout, Result, Subarray,
};
use tessera_storage::fragment::FragmentReader;
use tracing::debug;

/// Cells checked between cancellation probes.
const CANCEL_STRIDE: u64 = 256;

/// What one submit produced.
pub(crate) struct ReadOutcome {
    /// Cells appended to the buffers.
    pub cells: u64,
    /// Whether the result set is exhausted.
    pub complete: bool,
}

/// Locator of one sparse result cell.
struct SparseLocator {
    coords: Coords,
    frag: usize,
    tile: u64,
    cell: u64,
}

/// Resumable read state, opaque to the caller.
pub(crate) enum ReadState {
    Dense(DenseRead),
    Sparse(SparseRead),
}

pub(crate) struct DenseRead {
    iter: DenseBoxIter,
    /// A cell pulled from the iterator that did not fit the buffers.
    pending: Option<Coords>,
    dim_lo: Coords,
}

pub(crate) struct SparseRead {
    cells: Vec<SparseLocator>,
    pos: usize,
}

impl ReadState {
    /// Plan a read over `subarray` in the requested `layout`.
    pub fn plan(
        ctx: &Context,
        array: &Arc<Array>,
        layout: Layout,
        subarray: Subarray,
        wants_coords: bool,
    ) -> Result<ReadState> {
        let schema = array.schema();
        match schema.array_type {
            ArrayType::Dense => {
                if wants_coords {
                    return Err(Error::layout("dense reads do not produce coordinates"));
                }
                let dt = schema.coord_type();
                let dim_lo: Coords = schema.domain.dims.iter().map(|d| d.lo).collect();
                let (lo, hi) = subarray_to_index_box(dt, &subarray, &dim_lo);
                let traversal = match layout {
                    Layout::RowMajor | Layout::ColMajor => layout,
                    // Unordered reads stream in whatever order is cheap,
                    // which for dense results is the global order.
                    Layout::GlobalOrder | Layout::Unordered => Layout::GlobalOrder,
                    Layout::Hilbert => {
                        return Err(Error::layout("hilbert is not a read layout"));
                    }
                };
                let iter = DenseBoxIter::new(
                    lo,
                    hi,
                    Coords::from_slice(array.order().extents()),
                    traversal,
                    schema.tile_order,
                    schema.cell_order,
                );
                Ok(ReadState::Dense(DenseRead {
                    iter,
                    pending: None,
                    dim_lo,
                }))
            }
            ArrayType::Sparse => {
                let cells = plan_sparse(ctx, array, layout, &subarray)?;
                Ok(ReadState::Sparse(SparseRead { cells, pos: 0 }))
            }
        }
    }

    /// Stream cells into the buffers until done or a buffer fills.
    pub fn execute(
        &mut self,
        ctx: &Context,
        array: &Arc<Array>,
        bindings: &mut [(usize, AttrBuffer)],
        coords_out: Option<&mut AttrBuffer>,
        cancel: &AtomicBool,
    ) -> Result<ReadOutcome> {
        match self {
            ReadState::Dense(state) => {
                execute_dense(ctx, array, state, bindings, cancel)
            }
            ReadState::Sparse(state) => {
                execute_sparse(ctx, array, state, bindings, coords_out, cancel)
            }
        }
    }
}

// ----------------------------------------------------------------------
// Sparse planning
// ----------------------------------------------------------------------

/// Collect, merge, and order every sparse cell the subarray selects.
///
/// The locator records are small; attribute payloads stay on disk until
/// execution streams them tile by tile.
fn plan_sparse(
    ctx: &Context,
    array: &Arc<Array>,
    layout: Layout,
    subarray: &Subarray,
) -> Result<Vec<SparseLocator>> {
    let schema = array.schema();
    let dt = schema.coord_type();
    let order = array.order();
    let deleted = dt.deleted_bits();

    // Fragments whose non-empty domain misses the subarray are dropped
    // without touching their tiles.
    let live: Vec<(usize, &Arc<FragmentReader>)> = array
        .fragments()
        .iter()
        .enumerate()
        .filter(|(_, f)| f.non_empty_domain().intersects(dt, subarray))
        .collect();

    // Pre-warm the coordinate tiles in parallel; the per-fragment caches
    // make the sequential pass below cheap.
    let wanted: Vec<(usize, u64)> = live
        .iter()
        .flat_map(|&(f, frag)| {
            frag.overlapping_tiles(subarray)
                .into_iter()
                .map(move |(t, _)| (f, t))
        })
        .collect();
    debug!(
        fragments = live.len(),
        tiles = wanted.len(),
        "sparse read plan"
    );
    let vfs = ctx.vfs();
    ctx.pool().install(|| {
        wanted
            .par_iter()
            .map(|&(f, t)| array.fragments()[f].load_coords_tile(vfs, t).map(|_| ()))
            .collect::<Result<Vec<()>>>()
    })?;

    let mut locators = Vec::new();
    for &(f, frag) in &live {
        for (tile, full) in frag.overlapping_tiles(subarray) {
            let coords_tile = frag.load_coords_tile(vfs, tile)?;
            for cell in 0..coords_tile.cell_num() {
                let coords = frag.coords_at(&coords_tile, cell);
                if coords.iter().all(|&c| c == deleted) {
                    continue;
                }
                if !full && !subarray.contains(dt, &coords) {
                    continue;
                }
                locators.push(SparseLocator {
                    coords,
                    frag: f,
                    tile,
                    cell,
                });
            }
        }
    }

    // Global order first; on equal coordinates the younger fragment wins.
    locators.sort_by(|a, b| {
        order
            .cmp_global(&a.coords, &b.coords)
            .then_with(|| b.frag.cmp(&a.frag))
    });
    locators.dedup_by(|next, kept| {
        order.cmp_global(&kept.coords, &next.coords) == std::cmp::Ordering::Equal
    });

    // Positional output layouts reorder the merged result.
    if matches!(layout, Layout::RowMajor | Layout::ColMajor) {
        locators.sort_by(|a, b| cmp_coords(dt, &a.coords, &b.coords, layout));
    }
    Ok(locators)
}

// ----------------------------------------------------------------------
// Capacity accounting
// ----------------------------------------------------------------------

/// Byte cost of appending one cell's value to a binding.
fn cell_fits(buffer: &AttrBuffer, attr: &Attribute, value: &[u8]) -> bool {
    match attr.cell_size() {
        Some(size) => {
            buffer.data.len() + size <= buffer.data_capacity
                && (buffer.data.len() / size) < buffer.cell_capacity
        }
        None => {
            let cells = buffer.offsets.as_ref().map(Vec::len).unwrap_or(0);
            cells < buffer.cell_capacity
                && buffer.data.len() + value.len() <= buffer.data_capacity
        }
    }
}

/// Append one cell's value, offsets rebased to the buffer position.
fn append_cell(buffer: &mut AttrBuffer, attr: &Attribute, value: &[u8], null: bool) {
    if attr.cell_val_num.is_var() {
        if let Some(offsets) = &mut buffer.offsets {
            offsets.push(buffer.data.len() as u64);
        }
    }
    buffer.data.extend_from_slice(value);
    if let Some(validity) = &mut buffer.validity {
        validity.push(if null { 0 } else { 1 });
    }
}

/// One cell's gathered value per selected attribute.
type GatheredCell = SmallVec<[(Vec<u8>, bool); 2]>;

/// Fill values for cells no fragment covers.
fn fill_cell(schema_attrs: &[Attribute], bindings: &[(usize, AttrBuffer)]) -> GatheredCell {
    bindings
        .iter()
        .map(|(id, _)| {
            let attr = &schema_attrs[*id];
            let single = attr.datatype.fill_bytes();
            let value = match attr.cell_size() {
                Some(size) => single.repeat(size / attr.datatype.size()),
                None => single,
            };
            (value, attr.nullable)
        })
        .collect()
}

// ----------------------------------------------------------------------
// Dense execution
// ----------------------------------------------------------------------

fn execute_dense(
    ctx: &Context,
    array: &Arc<Array>,
    state: &mut DenseRead,
    bindings: &mut [(usize, AttrBuffer)],
    cancel: &AtomicBool,
) -> Result<ReadOutcome> {
    let schema = array.schema();
    let dt = schema.coord_type();
    let order = array.order();
    let vfs = ctx.vfs();
    let mut produced = 0u64;

    loop {
        if produced % CANCEL_STRIDE == 0 && cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        let idx = match state.pending.take() {
            Some(idx) => idx,
            None => match state.iter.next_cell() {
                Some(idx) => idx,
                None => {
                    return Ok(ReadOutcome {
                        cells: produced,
                        complete: true,
                    });
                }
            },
        };
        let coords = index_to_coords(dt, &idx, &state.dim_lo);

        // Youngest fragment covering the coordinate wins.
        let mut gathered: Option<GatheredCell> = None;
        for frag in array.fragments().iter().rev() {
            if let Some((tile, cell)) = frag.find_cell(vfs, order, &coords)? {
                let mut values: GatheredCell = SmallVec::new();
                for (attr_id, _) in bindings.iter() {
                    let tile_data = frag.load_attr_tile(vfs, *attr_id, tile)?;
                    values.push((
                        tile_data.cell_bytes(cell).to_vec(),
                        tile_data.is_null(cell),
                    ));
                }
                gathered = Some(values);
                break;
            }
        }
        let gathered =
            gathered.unwrap_or_else(|| fill_cell(&schema.attributes, bindings));

        let fits = bindings
            .iter()
            .zip(&gathered)
            .all(|((id, buffer), (value, _))| {
                cell_fits(buffer, &schema.attributes[*id], value)
            });
        if !fits {
            state.pending = Some(idx);
            return Ok(ReadOutcome {
                cells: produced,
                complete: false,
            });
        }
        for ((id, buffer), (value, null)) in bindings.iter_mut().zip(&gathered) {
            append_cell(buffer, &schema.attributes[*id], value, *null);
        }
        produced += 1;
    }
}

// ----------------------------------------------------------------------
// Sparse execution
// ----------------------------------------------------------------------

fn execute_sparse(
    ctx: &Context,
    array: &Arc<Array>,
    state: &mut SparseRead,
    bindings: &mut [(usize, AttrBuffer)],
    mut coords_out: Option<&mut AttrBuffer>,
    cancel: &AtomicBool,
) -> Result<ReadOutcome> {
    let schema = array.schema();
    let dt = schema.coord_type();
    let coord_cell_size = dt.size() * schema.domain.dim_count();
    let vfs = ctx.vfs();
    let mut produced = 0u64;

    while state.pos < state.cells.len() {
        if produced % CANCEL_STRIDE == 0 && cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        let locator = &state.cells[state.pos];
        let frag = &array.fragments()[locator.frag];

        let mut gathered: GatheredCell = SmallVec::new();
        for (attr_id, _) in bindings.iter() {
            let tile_data = frag.load_attr_tile(vfs, *attr_id, locator.tile)?;
            gathered.push((
                tile_data.cell_bytes(locator.cell).to_vec(),
                tile_data.is_null(locator.cell),
            ));
        }

        let mut fits = bindings
            .iter()
            .zip(&gathered)
            .all(|((id, buffer), (value, _))| {
                cell_fits(buffer, &schema.attributes[*id], value)
            });
        if let Some(out) = coords_out.as_deref() {
            fits = fits && out.data.len() + coord_cell_size <= out.data_capacity;
        }
        if !fits {
            return Ok(ReadOutcome {
                cells: produced,
                complete: false,
            });
        }

        for ((id, buffer), (value, null)) in bindings.iter_mut().zip(&gathered) {
            append_cell(buffer, &schema.attributes[*id], value, *null);
        }
        if let Some(out) = coords_out.as_deref_mut() {
            for &c in &locator.coords {
                dt.encode(c, &mut out.data);
            }
        }
        state.pos += 1;
        produced += 1;
    }
    Ok(ReadOutcome {
        cells: produced,
        complete: true,
    })
}
