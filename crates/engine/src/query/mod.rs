//! Query coordination.
//!
//! A query couples an open array with caller buffers and drives the
//! fragment writer or the read planner. Reads may complete over several
//! submissions when buffers fill (`Incomplete`); writes materialize their
//! fragment only at `finalize`. Cancellation is cooperative: the flag is
//! checked between tiles on reads and between tile flushes on writes, and
//! a cancelled write discards its fragment directory.

mod read;
mod write;

use crate::array::{Array, QueryMode};
use crate::context::Context;
use read::ReadState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tessera_core::{Error, Layout, Result, Subarray};
use tessera_storage::fragment::FragmentWriter;

/// Status of a query or of one attribute binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueryStatus {
    /// The query failed; the error was returned from `submit`.
    Failed,
    /// No submission yet.
    Uninitialized,
    /// A write accepted data but has not been finalized.
    InProgress,
    /// A read filled its buffers before exhausting the result; drain and
    /// resubmit.
    Incomplete,
    /// Done.
    Complete,
}

/// A caller buffer bound to one attribute (or to the coordinates).
///
/// For writes the caller fills the fields; for reads the caller sets the
/// capacities and the engine fills the fields, rebasing variable-length
/// offsets to buffer positions.
#[derive(Debug, Clone, Default)]
pub struct AttrBuffer {
    data: Vec<u8>,
    offsets: Option<Vec<u64>>,
    validity: Option<Vec<u8>>,
    data_capacity: usize,
    cell_capacity: usize,
}

impl AttrBuffer {
    /// Write-side: fixed-length cell values.
    pub fn fixed(data: Vec<u8>) -> AttrBuffer {
        AttrBuffer {
            data_capacity: data.len(),
            cell_capacity: usize::MAX,
            data,
            offsets: None,
            validity: None,
        }
    }

    /// Write-side: variable-length cells as (byte offsets, values).
    pub fn var(offsets: Vec<u64>, data: Vec<u8>) -> AttrBuffer {
        AttrBuffer {
            data_capacity: data.len(),
            cell_capacity: offsets.len(),
            data,
            offsets: Some(offsets),
            validity: None,
        }
    }

    /// Attach a validity plane (one byte per cell, 0 = null).
    pub fn with_validity(mut self, validity: Vec<u8>) -> AttrBuffer {
        self.validity = Some(validity);
        self
    }

    /// Read-side: accept up to `data_capacity` bytes of fixed-length
    /// values.
    pub fn reading(data_capacity: usize) -> AttrBuffer {
        AttrBuffer {
            data: Vec::new(),
            offsets: None,
            validity: None,
            data_capacity,
            cell_capacity: usize::MAX,
        }
    }

    /// Read-side: accept up to `cell_capacity` variable-length cells and
    /// `data_capacity` value bytes.
    pub fn reading_var(cell_capacity: usize, data_capacity: usize) -> AttrBuffer {
        AttrBuffer {
            data: Vec::new(),
            offsets: Some(Vec::new()),
            validity: None,
            data_capacity,
            cell_capacity,
        }
    }

    /// Read-side: also collect validity bytes.
    pub fn collecting_validity(mut self) -> AttrBuffer {
        self.validity = Some(Vec::new());
        self
    }

    /// Value bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Per-cell byte offsets (variable-length attributes).
    pub fn offsets(&self) -> Option<&[u64]> {
        self.offsets.as_deref()
    }

    /// Per-cell validity bytes (nullable attributes).
    pub fn validity(&self) -> Option<&[u8]> {
        self.validity.as_deref()
    }

    fn clear_results(&mut self) {
        self.data.clear();
        if let Some(offsets) = &mut self.offsets {
            offsets.clear();
        }
        if let Some(validity) = &mut self.validity {
            validity.clear();
        }
    }
}

/// Cooperative cancellation handle; cloneable across threads.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Request cancellation at the next tile boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// A read or write session against one open array.
pub struct Query {
    ctx: Context,
    array: Arc<Array>,
    mode: QueryMode,
    layout: Layout,
    subarray: Option<Subarray>,
    bindings: Vec<(usize, AttrBuffer)>,
    binding_names: Vec<String>,
    statuses: Vec<QueryStatus>,
    coords: Option<AttrBuffer>,
    writer: Option<FragmentWriter>,
    read: Option<ReadState>,
    cancel: Arc<AtomicBool>,
    result_cells: u64,
}

impl Query {
    /// Bind a query to an open array.
    pub fn new(ctx: &Context, array: Arc<Array>, mode: QueryMode) -> Result<Query> {
        if array.mode() != mode {
            return Err(Error::layout(format!(
                "array opened for {:?}, query wants {:?}",
                array.mode(),
                mode
            )));
        }
        Ok(Query {
            ctx: ctx.clone(),
            array,
            mode,
            layout: Layout::RowMajor,
            subarray: None,
            bindings: Vec::new(),
            binding_names: Vec::new(),
            statuses: Vec::new(),
            coords: None,
            writer: None,
            read: None,
            cancel: Arc::new(AtomicBool::new(false)),
            result_cells: 0,
        })
    }

    /// Set the cell layout (`global`, `row-major`, `col-major`,
    /// `unordered`).
    pub fn set_layout(&mut self, layout: Layout) -> Result<&mut Query> {
        if layout == Layout::Hilbert {
            return Err(Error::layout("hilbert is a cell order, not a query layout"));
        }
        if self.started() {
            return Err(Error::layout("layout cannot change after the first submit"));
        }
        self.layout = layout;
        Ok(self)
    }

    /// Restrict the query to a subarray.
    pub fn set_subarray(&mut self, subarray: Subarray) -> Result<&mut Query> {
        if self.started() {
            return Err(Error::layout(
                "subarray cannot change after the first submit",
            ));
        }
        self.array.schema().domain.check_subarray(&subarray)?;
        self.subarray = Some(subarray);
        Ok(self)
    }

    /// Bind a buffer to an attribute.
    pub fn set_buffer(&mut self, attr: &str, buffer: AttrBuffer) -> Result<&mut Query> {
        let attr_id = self.array.schema().attribute_id(attr)?;
        match self.bindings.iter_mut().position(|(id, _)| *id == attr_id) {
            Some(i) => self.bindings[i].1 = buffer,
            None => {
                self.bindings.push((attr_id, buffer));
                self.binding_names.push(attr.to_string());
                self.statuses.push(QueryStatus::Uninitialized);
            }
        }
        Ok(self)
    }

    /// Bind the coordinates buffer (sparse writes; sparse reads that want
    /// coordinates back).
    pub fn set_coords_buffer(&mut self, buffer: AttrBuffer) -> Result<&mut Query> {
        self.coords = Some(buffer);
        Ok(self)
    }

    fn started(&self) -> bool {
        self.writer.is_some() || self.read.is_some()
    }

    /// A handle that cancels this query cooperatively.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: Arc::clone(&self.cancel),
        }
    }

    /// Per-attribute status.
    pub fn attr_status(&self, attr: &str) -> QueryStatus {
        self.binding_names
            .iter()
            .position(|n| n == attr)
            .map(|i| self.statuses[i])
            .unwrap_or(QueryStatus::Uninitialized)
    }

    /// Overall status: the minimum across selected attributes.
    pub fn status(&self) -> QueryStatus {
        self.statuses
            .iter()
            .copied()
            .min()
            .unwrap_or(QueryStatus::Uninitialized)
    }

    /// The buffer bound to `attr`, with the latest results.
    pub fn buffer(&self, attr: &str) -> Option<&AttrBuffer> {
        self.binding_names
            .iter()
            .position(|n| n == attr)
            .map(|i| &self.bindings[i].1)
    }

    /// The coordinates buffer, with the latest results.
    pub fn coords_buffer(&self) -> Option<&AttrBuffer> {
        self.coords.as_ref()
    }

    /// Cells produced by the last read submit.
    pub fn result_cell_count(&self) -> u64 {
        self.result_cells
    }

    /// Execute one round of the query.
    pub fn submit(&mut self) -> Result<QueryStatus> {
        if self.cancel.load(Ordering::Relaxed) {
            self.discard_on_cancel();
            return Err(Error::Cancelled);
        }
        let result = match self.mode {
            QueryMode::Write => self.submit_write(),
            QueryMode::Read => self.submit_read(),
        };
        match result {
            Ok(status) => Ok(status),
            Err(e) => {
                if e.is_cancelled() {
                    self.discard_on_cancel();
                } else {
                    for s in &mut self.statuses {
                        *s = QueryStatus::Failed;
                    }
                }
                Err(e)
            }
        }
    }

    /// Execute on the context worker pool; the callback receives the
    /// query back together with the submit result.
    pub fn submit_async<F>(self, callback: F)
    where
        F: FnOnce(Query, Result<QueryStatus>) + Send + 'static,
    {
        let pool = Arc::clone(self.ctx.pool());
        pool.spawn(move || {
            let mut query = self;
            let result = query.submit();
            callback(query, result);
        });
    }

    fn submit_write(&mut self) -> Result<QueryStatus> {
        if self.writer.is_none() {
            self.writer = Some(FragmentWriter::create(
                Arc::clone(self.ctx.vfs()),
                Arc::clone(self.array.schema()),
                self.array.uri(),
                self.layout,
                self.subarray.clone(),
                self.ctx.config().sort_buffer_size,
                Some(Arc::clone(&self.cancel)),
            )?);
        }
        write::submit_to_writer(
            self.writer.as_mut().expect("writer just created"),
            self.array.schema(),
            &self.bindings,
            self.coords.as_ref(),
        )?;
        for s in &mut self.statuses {
            *s = QueryStatus::InProgress;
        }
        Ok(QueryStatus::InProgress)
    }

    fn submit_read(&mut self) -> Result<QueryStatus> {
        if self.bindings.is_empty() {
            return Err(Error::layout("read query has no attribute buffers"));
        }
        if self.read.is_none() {
            let subarray = match &self.subarray {
                Some(sub) => sub.clone(),
                None => self.array.schema().domain.whole(),
            };
            self.read = Some(ReadState::plan(
                &self.ctx,
                &self.array,
                self.layout,
                subarray,
                self.coords.is_some(),
            )?);
        }
        for (_, buffer) in &mut self.bindings {
            buffer.clear_results();
        }
        if let Some(coords) = &mut self.coords {
            coords.clear_results();
        }

        let state = self.read.as_mut().expect("read state just planned");
        let outcome = state.execute(
            &self.ctx,
            &self.array,
            &mut self.bindings,
            self.coords.as_mut(),
            &self.cancel,
        )?;
        self.result_cells = outcome.cells;
        let status = if outcome.complete {
            QueryStatus::Complete
        } else {
            QueryStatus::Incomplete
        };
        for s in &mut self.statuses {
            *s = status;
        }
        Ok(status)
    }

    /// Finish the query. Write queries materialize their fragment's
    /// sentinel here; a write without `finalize` leaves nothing visible.
    pub fn finalize(&mut self) -> Result<QueryStatus> {
        if self.cancel.load(Ordering::Relaxed) {
            self.discard_on_cancel();
            return Err(Error::Cancelled);
        }
        match self.mode {
            QueryMode::Read => {
                for s in &mut self.statuses {
                    if *s == QueryStatus::Uninitialized {
                        *s = QueryStatus::Complete;
                    }
                }
            }
            QueryMode::Write => {
                if let Some(writer) = self.writer.take() {
                    match writer.finalize() {
                        Ok(_) => {
                            for s in &mut self.statuses {
                                *s = QueryStatus::Complete;
                            }
                        }
                        Err(e) => {
                            if e.is_cancelled() {
                                self.discard_on_cancel();
                            } else {
                                for s in &mut self.statuses {
                                    *s = QueryStatus::Failed;
                                }
                            }
                            return Err(e);
                        }
                    }
                } else {
                    for s in &mut self.statuses {
                        *s = QueryStatus::Complete;
                    }
                }
            }
        }
        Ok(self.status())
    }

    /// Drop in-progress write state after cancellation; the fragment
    /// directory is discarded, never published.
    fn discard_on_cancel(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.abort() {
                tracing::warn!(error = %e, "failed to discard cancelled fragment");
            }
        }
        for s in &mut self.statuses {
            *s = QueryStatus::Failed;
        }
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("array", &self.array.uri())
            .field("mode", &self.mode)
            .field("layout", &self.layout)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ordering_is_minimum_semantics() {
        assert!(QueryStatus::Failed < QueryStatus::Uninitialized);
        assert!(QueryStatus::Uninitialized < QueryStatus::InProgress);
        assert!(QueryStatus::InProgress < QueryStatus::Incomplete);
        assert!(QueryStatus::Incomplete < QueryStatus::Complete);
    }

    #[test]
    fn attr_buffer_capacities() {
        let b = AttrBuffer::fixed(vec![1, 2, 3, 4]);
        assert_eq!(b.data_capacity, 4);
        let r = AttrBuffer::reading_var(10, 64);
        assert_eq!(r.cell_capacity, 10);
        assert!(r.offsets().is_some());
    }
}
