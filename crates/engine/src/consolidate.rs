//! Fragment consolidation.
//!
//! Streams the whole array through a read query into one replacement
//! fragment, publishes it, then deletes the superseded fragment
//! directories under the exclusive array lock. Readers holding the shared
//! lock postpone the deletion; the replacement is already visible and no
//! data is ever lost.

use crate::array::{lock_file, Array, QueryMode};
use crate::context::Context;
use crate::query::{AttrBuffer, Query, QueryStatus};
use std::sync::Arc;
use tessera_core::{ArrayType, CellValNum, Error, Layout, Result};
use tracing::{debug, warn};

/// Per-chunk value-byte capacity while streaming.
const CHUNK_BYTES: usize = 8 * 1024 * 1024;
/// Per-chunk cell capacity for variable-length attributes.
const CHUNK_CELLS: usize = 256 * 1024;

/// Merge every finalized fragment of the array into one.
pub fn consolidate(ctx: &Context, uri: &str) -> Result<()> {
    let read_array = Arc::new(Array::open(ctx, uri, QueryMode::Read)?);
    if read_array.fragments().len() <= 1 {
        debug!(array = uri, "nothing to consolidate");
        return Ok(());
    }
    let old_fragments: Vec<String> = read_array
        .fragments()
        .iter()
        .map(|f| f.uri().to_string())
        .collect();
    let schema = Arc::clone(read_array.schema());
    let sparse = schema.array_type == ArrayType::Sparse;

    let mut read = Query::new(ctx, Arc::clone(&read_array), QueryMode::Read)?;
    read.set_layout(Layout::GlobalOrder)?;
    for attr in &schema.attributes {
        let mut buffer = match attr.cell_val_num {
            CellValNum::Var => AttrBuffer::reading_var(CHUNK_CELLS, CHUNK_BYTES),
            CellValNum::Fixed(_) => AttrBuffer::reading(CHUNK_BYTES),
        };
        if attr.nullable {
            buffer = buffer.collecting_validity();
        }
        read.set_buffer(&attr.name, buffer)?;
    }
    if sparse {
        read.set_coords_buffer(AttrBuffer::reading(CHUNK_BYTES))?;
    }

    let write_array = Arc::new(Array::open(ctx, uri, QueryMode::Write)?);
    let mut write = Query::new(ctx, write_array, QueryMode::Write)?;
    write.set_layout(Layout::GlobalOrder)?;

    loop {
        let status = read.submit()?;
        if read.result_cell_count() == 0 && status == QueryStatus::Incomplete {
            return Err(Error::internal(
                "consolidation chunk too small for a single cell",
            ));
        }
        if read.result_cell_count() > 0 {
            for attr in &schema.attributes {
                let results = read
                    .buffer(&attr.name)
                    .ok_or_else(|| Error::internal("consolidation lost a binding"))?;
                let mut buffer = match attr.cell_val_num {
                    CellValNum::Var => AttrBuffer::var(
                        results.offsets().unwrap_or(&[]).to_vec(),
                        results.data().to_vec(),
                    ),
                    CellValNum::Fixed(_) => AttrBuffer::fixed(results.data().to_vec()),
                };
                if let Some(validity) = results.validity() {
                    buffer = buffer.with_validity(validity.to_vec());
                }
                write.set_buffer(&attr.name, buffer)?;
            }
            if sparse {
                let coords = read
                    .coords_buffer()
                    .ok_or_else(|| Error::internal("consolidation lost the coordinates"))?;
                write.set_coords_buffer(AttrBuffer::fixed(coords.data().to_vec()))?;
            }
            write.submit()?;
        }
        if status == QueryStatus::Complete {
            break;
        }
    }
    write.finalize()?;
    debug!(array = uri, fragments = old_fragments.len(), "consolidated");

    // Release the shared locks before going for the exclusive one.
    drop(read);
    drop(write);
    drop(read_array);

    remove_superseded(ctx, uri, &old_fragments)
}

/// Delete old fragment directories if the exclusive lock is free; other
/// holders postpone the removal to a later consolidation.
fn remove_superseded(ctx: &Context, uri: &str, old_fragments: &[String]) -> Result<()> {
    let vfs = ctx.vfs();
    match vfs.try_lock_exclusive(&lock_file(uri))? {
        Some(guard) => {
            for frag_uri in old_fragments {
                if vfs.is_dir(frag_uri) {
                    vfs.remove_dir(frag_uri)?;
                }
            }
            guard.release();
            Ok(())
        }
        None => {
            warn!(
                array = uri,
                "array is in use; superseded fragments left for the next consolidation"
            );
            Ok(())
        }
    }
}
