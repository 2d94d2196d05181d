//! Fragment writer.
//!
//! Stages cells, emits tiles in global order, flushes per-attribute files,
//! and finalizes the fragment atomically: attribute files, sync,
//! book-keeping, sync, then the `__ok.tdb` sentinel published by rename.
//! Anything short of the sentinel leaves a directory readers ignore and
//! recovery removes.

use crate::buffer::Buffer;
use crate::codec;
use crate::fragment::{
    attr_file, attr_validity_file, attr_var_file, coords_file, ok_file, FragmentId,
    FragmentMetadata,
};
use byteorder::{ByteOrder, LittleEndian};
use smallvec::smallvec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tessera_core::order::{index_to_coords, subarray_to_index_box, unrank, DenseBoxIter};
use tessera_core::{
    ArraySchema, ArrayType, Compressor, Coords, Datatype, Error, GlobalOrder, Layout, Mbr,
    Result, Subarray,
};
use tessera_vfs::{uri_join, OpenMode, Vfs};

/// Compressor applied to coordinate tiles.
const COORDS_COMPRESSOR: Compressor = Compressor::Zstd;

/// Caller data for one attribute in one submit.
#[derive(Debug, Clone, Copy)]
pub struct AttrData<'a> {
    /// Fixed stream: cell values, or one u64 byte-offset per cell into
    /// `var` for variable-length attributes.
    pub fixed: &'a [u8],
    /// Values stream of a variable-length attribute.
    pub var: Option<&'a [u8]>,
    /// One byte per cell, 0 = null, for nullable attributes.
    pub validity: Option<&'a [u8]>,
}

/// One submit's worth of caller buffers, in schema attribute order.
#[derive(Debug, Clone)]
pub struct WriteInput<'a> {
    /// Per-attribute data.
    pub attrs: Vec<AttrData<'a>>,
    /// Coordinates, `dim_count * coord_size` bytes per cell (sparse).
    pub coords: Option<&'a [u8]>,
}

/// Writer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Constructed, nothing submitted.
    Open,
    /// At least one submit accepted.
    Writing,
    /// Sentinel published; the fragment is immutable.
    Finalized,
    /// Fragment directory discarded.
    Aborted,
}

/// A borrowed view of one cell's values across attributes.
struct CellRef<'a> {
    fixed: &'a [u8],
    var: Option<&'a [u8]>,
    validity: Option<u8>,
}

/// An owned staged cell (unordered and ordered-layout writes).
#[derive(Debug)]
struct StagedCell {
    coords: Coords,
    seq: u64,
    values: Vec<StagedValue>,
}

#[derive(Debug)]
struct StagedValue {
    fixed: Vec<u8>,
    var: Option<Vec<u8>>,
    validity: Option<u8>,
}

/// Per-attribute tile accumulator.
#[derive(Debug, Default)]
struct TileAcc {
    fixed: Buffer,
    var: Buffer,
    validity: Buffer,
}

/// One output file, opened lazily on first flush.
#[derive(Debug)]
struct StreamFile {
    path: String,
    handle: Option<tessera_vfs::FileHandle>,
    offset: u64,
}

impl StreamFile {
    fn new(path: String) -> StreamFile {
        StreamFile {
            path,
            handle: None,
            offset: 0,
        }
    }

    fn append(&mut self, vfs: &Vfs, bytes: &[u8]) -> Result<u64> {
        let handle = match self.handle {
            Some(h) => h,
            None => {
                let h = vfs.open(&self.path, OpenMode::Write)?;
                self.handle = Some(h);
                h
            }
        };
        vfs.write(handle, bytes)?;
        let at = self.offset;
        self.offset += bytes.len() as u64;
        Ok(at)
    }

    fn finish(&mut self, vfs: &Vfs) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            vfs.sync(handle)?;
            vfs.close(handle)?;
        }
        Ok(())
    }
}

/// Writes one fragment.
#[derive(Debug)]
pub struct FragmentWriter {
    vfs: Arc<Vfs>,
    schema: Arc<ArraySchema>,
    order: GlobalOrder,
    id: FragmentId,
    frag_uri: String,
    layout: Layout,
    /// Whether this fragment stores dense tiles; unordered writes make a
    /// sparse fragment even in a dense array.
    frag_dense: bool,
    state: WriterState,

    /// Dense target subarray (the fragment's non-empty domain).
    subarray: Subarray,
    /// Dense: index-space bounds of the tile-aligned expansion.
    aligned_lo: Coords,
    aligned_hi: Coords,

    tile_capacity: u64,
    coord_size: usize,

    acc: Vec<TileAcc>,
    coords_acc: Buffer,
    cells_in_tile: u64,
    tile_mbr: Mbr,

    meta: FragmentMetadata,
    fixed_files: Vec<StreamFile>,
    var_files: Vec<Option<StreamFile>>,
    validity_files: Vec<Option<StreamFile>>,
    coords_stream: Option<StreamFile>,

    last_cell: Option<Coords>,
    total_cells: u64,

    staged: Vec<StagedCell>,
    staged_bytes: usize,
    staged_seq: u64,
    sort_buffer_size: usize,
    /// Dense ordered layouts: subarray positions consumed so far.
    ordered_cursor: u64,

    cancel: Option<Arc<AtomicBool>>,
}

impl FragmentWriter {
    /// Create a fragment directory and a writer into it.
    ///
    /// Layout rules: dense arrays accept `global` (tile-aligned subarray,
    /// defaulting to the whole domain) and `row-major`/`col-major`
    /// (subarray mandatory); sparse arrays accept `global` and
    /// `unordered`, with no subarray.
    pub fn create(
        vfs: Arc<Vfs>,
        schema: Arc<ArraySchema>,
        array_uri: &str,
        layout: Layout,
        subarray: Option<Subarray>,
        sort_buffer_size: usize,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<FragmentWriter> {
        let order = GlobalOrder::new(&schema)?;
        let dense_array = schema.array_type == ArrayType::Dense;
        // Unordered writes always produce a sparse fragment, also in a
        // dense array: cells land at scattered coordinates and are
        // overlaid on older fragments by timestamp.
        let frag_dense = dense_array && layout != Layout::Unordered;
        let domain = &schema.domain;
        let dt = domain.datatype;

        let subarray = match (dense_array, layout, subarray) {
            (true, Layout::GlobalOrder, sub) => {
                let sub = sub.unwrap_or_else(|| domain.whole());
                domain.check_subarray(&sub)?;
                check_tile_aligned(domain, &order, &sub)?;
                sub
            }
            (true, Layout::RowMajor | Layout::ColMajor, Some(sub)) => {
                domain.check_subarray(&sub)?;
                sub
            }
            (true, Layout::RowMajor | Layout::ColMajor, None) => {
                return Err(Error::layout(
                    "ordered dense writes require a subarray",
                ));
            }
            (_, Layout::GlobalOrder | Layout::Unordered, Some(_)) => {
                return Err(Error::layout(
                    "sparse-fragment writes do not take a subarray",
                ));
            }
            (true, Layout::Unordered, None) => domain.whole(),
            (true, other, _) => {
                return Err(Error::layout(format!(
                    "dense arrays cannot be written in {} layout",
                    other.name()
                )));
            }
            (false, Layout::GlobalOrder | Layout::Unordered, None) => domain.whole(),
            (false, other, _) => {
                return Err(Error::layout(format!(
                    "sparse arrays cannot be written in {} layout",
                    other.name()
                )));
            }
        };

        // Dense fragments cover the tile-aligned expansion of the target
        // subarray; cells outside the subarray hold fill values and are
        // masked by the non-empty domain on read.
        let (aligned_lo, aligned_hi) = if frag_dense {
            align_to_tiles(dt, domain, &order, &subarray)
        } else {
            (smallvec![], smallvec![])
        };

        let id = FragmentId::new();
        let frag_uri = uri_join(array_uri, &id.dir_name());
        vfs.mkdir(&frag_uri)?;

        let meta = FragmentMetadata::begin(&schema, frag_dense, subarray.clone());
        let fixed_files = schema
            .attributes
            .iter()
            .map(|a| StreamFile::new(attr_file(&frag_uri, &a.name)))
            .collect();
        let var_files = schema
            .attributes
            .iter()
            .map(|a| {
                a.cell_val_num
                    .is_var()
                    .then(|| StreamFile::new(attr_var_file(&frag_uri, &a.name)))
            })
            .collect();
        let validity_files = schema
            .attributes
            .iter()
            .map(|a| {
                a.nullable
                    .then(|| StreamFile::new(attr_validity_file(&frag_uri, &a.name)))
            })
            .collect();
        let coords_stream =
            (!frag_dense).then(|| StreamFile::new(coords_file(&frag_uri)));

        let tile_capacity = schema.tile_cell_count()?;
        let acc = schema.attributes.iter().map(|_| TileAcc::default()).collect();
        let dim_count = domain.dim_count();

        Ok(FragmentWriter {
            vfs,
            coord_size: dt.size(),
            schema,
            order,
            id,
            frag_uri,
            layout,
            frag_dense,
            state: WriterState::Open,
            subarray,
            aligned_lo,
            aligned_hi,
            tile_capacity,
            acc,
            coords_acc: Buffer::new(),
            cells_in_tile: 0,
            tile_mbr: Mbr::empty(dim_count),
            meta,
            fixed_files,
            var_files,
            validity_files,
            coords_stream,
            last_cell: None,
            total_cells: 0,
            staged: Vec::new(),
            staged_bytes: 0,
            staged_seq: 0,
            sort_buffer_size,
            ordered_cursor: 0,
            cancel,
        })
    }

    /// The fragment's identity.
    pub fn id(&self) -> &FragmentId {
        &self.id
    }

    /// The fragment directory URI.
    pub fn uri(&self) -> &str {
        &self.frag_uri
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WriterState {
        self.state
    }

    fn check_active(&self) -> Result<()> {
        match self.state {
            WriterState::Open | WriterState::Writing => Ok(()),
            WriterState::Finalized => Err(Error::layout("writer already finalized")),
            WriterState::Aborted => Err(Error::layout("writer already aborted")),
        }
    }

    fn check_cancel(&self) -> Result<()> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
        }
        Ok(())
    }

    /// Cells in one submit, cross-validated across attributes and coords.
    fn input_cell_count(&self, input: &WriteInput<'_>) -> Result<u64> {
        if input.attrs.len() != self.schema.attributes.len() {
            return Err(Error::layout(format!(
                "submit provides {} attributes, schema has {}",
                input.attrs.len(),
                self.schema.attributes.len()
            )));
        }
        let mut cell_count: Option<u64> = None;
        if !self.frag_dense {
            let coords = input
                .coords
                .ok_or_else(|| Error::layout("sparse-fragment writes require coordinates"))?;
            let stride = self.coord_size * self.schema.domain.dim_count();
            if coords.len() % stride != 0 {
                return Err(Error::layout(format!(
                    "coordinate buffer of {} bytes is not a multiple of the {stride}-byte tuple",
                    coords.len()
                )));
            }
            cell_count = Some((coords.len() / stride) as u64);
        } else if input.coords.is_some() {
            return Err(Error::layout("dense writes do not take coordinates"));
        }

        for (attr, data) in self.schema.attributes.iter().zip(&input.attrs) {
            let n = match attr.cell_size() {
                Some(size) => {
                    if data.var.is_some() {
                        return Err(Error::layout(format!(
                            "attribute `{}` is fixed-length but got a values buffer",
                            attr.name
                        )));
                    }
                    if data.fixed.len() % size != 0 {
                        return Err(Error::layout(format!(
                            "attribute `{}` buffer is not a multiple of its {size}-byte cell",
                            attr.name
                        )));
                    }
                    (data.fixed.len() / size) as u64
                }
                None => {
                    let values = data.var.ok_or_else(|| {
                        Error::layout(format!(
                            "attribute `{}` is variable-length and needs a values buffer",
                            attr.name
                        ))
                    })?;
                    if data.fixed.len() % 8 != 0 {
                        return Err(Error::layout(format!(
                            "attribute `{}` offsets are not u64-aligned",
                            attr.name
                        )));
                    }
                    let n = (data.fixed.len() / 8) as u64;
                    let mut prev = 0u64;
                    for i in 0..n {
                        let off = LittleEndian::read_u64(
                            &data.fixed[i as usize * 8..i as usize * 8 + 8],
                        );
                        if off < prev || off > values.len() as u64 {
                            return Err(Error::layout(format!(
                                "attribute `{}` offsets are not monotonic",
                                attr.name
                            )));
                        }
                        prev = off;
                    }
                    n
                }
            };
            match cell_count {
                None => cell_count = Some(n),
                Some(prev) if prev != n => {
                    return Err(Error::layout(format!(
                        "attribute `{}` supplies {n} cells, previous buffers supplied {prev}",
                        attr.name
                    )));
                }
                Some(_) => {}
            }
            if attr.nullable {
                let validity = data.validity.ok_or_else(|| {
                    Error::layout(format!(
                        "attribute `{}` is nullable and needs a validity buffer",
                        attr.name
                    ))
                })?;
                if validity.len() as u64 != n {
                    return Err(Error::layout(format!(
                        "attribute `{}` validity length {} does not match {n} cells",
                        attr.name,
                        validity.len()
                    )));
                }
            } else if data.validity.is_some() {
                return Err(Error::layout(format!(
                    "attribute `{}` is not nullable but got a validity buffer",
                    attr.name
                )));
            }
        }
        cell_count.ok_or_else(|| Error::internal("schema with no attributes"))
    }

    fn cell_ref<'a>(&self, input: &WriteInput<'a>, i: u64) -> Vec<CellRef<'a>> {
        self.schema
            .attributes
            .iter()
            .zip(&input.attrs)
            .map(|(attr, data)| match attr.cell_size() {
                Some(size) => CellRef {
                    fixed: &data.fixed[i as usize * size..(i as usize + 1) * size],
                    var: None,
                    validity: data.validity.map(|v| v[i as usize]),
                },
                None => {
                    let values = data.var.unwrap_or(&[]);
                    let n = (data.fixed.len() / 8) as u64;
                    let start =
                        LittleEndian::read_u64(&data.fixed[i as usize * 8..i as usize * 8 + 8]);
                    let end = if i + 1 < n {
                        LittleEndian::read_u64(
                            &data.fixed[(i as usize + 1) * 8..(i as usize + 2) * 8],
                        )
                    } else {
                        values.len() as u64
                    };
                    CellRef {
                        fixed: &[],
                        var: Some(&values[start as usize..end as usize]),
                        validity: data.validity.map(|v| v[i as usize]),
                    }
                }
            })
            .collect()
    }

    fn decode_cell_coords(&self, coords: &[u8], i: u64) -> Coords {
        let dims = self.schema.domain.dim_count();
        let stride = self.coord_size * dims;
        let base = i as usize * stride;
        (0..dims)
            .map(|d| {
                self.schema
                    .domain
                    .datatype
                    .decode(&coords[base + d * self.coord_size..])
            })
            .collect()
    }

    /// Whether every coordinate of the tuple is the reserved deleted
    /// marker; such cells bypass domain validation and are filtered on
    /// read.
    fn is_delete_marker(&self, coords: &[u64]) -> bool {
        let deleted = self.schema.domain.datatype.deleted_bits();
        coords.iter().all(|&c| c == deleted)
    }

    /// Accept one batch of cells.
    pub fn submit(&mut self, input: &WriteInput<'_>) -> Result<()> {
        self.check_active()?;
        self.check_cancel()?;
        self.state = WriterState::Writing;
        let n = self.input_cell_count(input)?;

        match (self.frag_dense, self.layout) {
            (true, Layout::GlobalOrder) => {
                for i in 0..n {
                    let values = self.cell_ref(input, i);
                    self.emit_cell(None, &values)?;
                }
            }
            (true, Layout::RowMajor | Layout::ColMajor) => {
                self.stage_ordered(input, n)?;
            }
            (false, Layout::GlobalOrder) => {
                let coords = input.coords.unwrap_or(&[]);
                for i in 0..n {
                    let cell = self.decode_cell_coords(coords, i);
                    if !self.is_delete_marker(&cell) && !self.schema.domain.contains(&cell) {
                        return Err(Error::domain(format!(
                            "coordinate {} outside the domain",
                            self.format_coords(&cell)
                        )));
                    }
                    if let Some(last) = &self.last_cell {
                        match self.order.cmp_global(last, &cell) {
                            std::cmp::Ordering::Less => {}
                            std::cmp::Ordering::Equal => {
                                return Err(Error::layout(format!(
                                    "duplicate coordinate {} in global-order write",
                                    self.format_coords(&cell)
                                )));
                            }
                            std::cmp::Ordering::Greater => {
                                return Err(Error::layout(format!(
                                    "coordinate {} violates global order",
                                    self.format_coords(&cell)
                                )));
                            }
                        }
                    }
                    let values = self.cell_ref(input, i);
                    self.emit_cell(Some(&cell), &values)?;
                    self.last_cell = Some(cell);
                }
            }
            (false, Layout::Unordered) => {
                let coords = input.coords.unwrap_or(&[]);
                for i in 0..n {
                    let cell = self.decode_cell_coords(coords, i);
                    if !self.is_delete_marker(&cell) && !self.schema.domain.contains(&cell) {
                        return Err(Error::domain(format!(
                            "coordinate {} outside the domain",
                            self.format_coords(&cell)
                        )));
                    }
                    let values = self.cell_ref(input, i);
                    self.stage_cell(cell, values);
                }
                if self.staged_bytes > self.sort_buffer_size {
                    self.flush_staged_sparse()?;
                }
            }
            _ => {
                return Err(Error::internal("layout survived constructor validation"));
            }
        }
        Ok(())
    }

    fn format_coords(&self, coords: &[u64]) -> String {
        let dt = self.schema.domain.datatype;
        let parts: Vec<String> = coords.iter().map(|&c| dt.format_bits(c)).collect();
        format!("({})", parts.join(", "))
    }

    fn stage_cell(&mut self, coords: Coords, values: Vec<CellRef<'_>>) {
        let mut owned = Vec::with_capacity(values.len());
        let mut bytes = coords.len() * 8;
        for v in values {
            bytes += v.fixed.len() + v.var.map_or(0, <[u8]>::len) + 1;
            owned.push(StagedValue {
                fixed: v.fixed.to_vec(),
                var: v.var.map(<[u8]>::to_vec),
                validity: v.validity,
            });
        }
        self.staged.push(StagedCell {
            coords,
            seq: self.staged_seq,
            values: owned,
        });
        self.staged_seq += 1;
        self.staged_bytes += bytes;
    }

    /// Dense ordered layouts: map this submit's cells onto consecutive
    /// positions of the subarray in the requested order and stage them.
    fn stage_ordered(&mut self, input: &WriteInput<'_>, n: u64) -> Result<()> {
        let dt = self.schema.domain.datatype;
        let dim_lo: Coords = self.schema.domain.dims.iter().map(|d| d.lo).collect();
        let (sub_lo, sub_hi) = subarray_to_index_box(dt, &self.subarray, &dim_lo);
        let shape: Coords = sub_lo
            .iter()
            .zip(&sub_hi)
            .map(|(&lo, &hi)| hi - lo + 1)
            .collect();
        let total: u64 = shape.iter().product();
        if self.ordered_cursor + n > total {
            return Err(Error::layout(format!(
                "submit overruns the subarray: {} cells for {} positions",
                self.ordered_cursor + n,
                total
            )));
        }
        let mut idx: Coords = smallvec![0; shape.len()];
        for i in 0..n {
            unrank(self.ordered_cursor + i, &shape, self.layout, &mut idx);
            let abs: Coords = idx.iter().zip(&sub_lo).map(|(&x, &lo)| x + lo).collect();
            let coords = index_to_coords(dt, &abs, &dim_lo);
            let values = self.cell_ref(input, i);
            self.stage_cell(coords, values);
        }
        self.ordered_cursor += n;
        Ok(())
    }

    /// Sort, deduplicate (last wins), and emit staged sparse cells.
    fn flush_staged_sparse(&mut self) -> Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let mut staged = std::mem::take(&mut self.staged);
        self.staged_bytes = 0;
        let order = self.order.clone();
        staged.sort_by(|a, b| {
            order
                .cmp_global(&a.coords, &b.coords)
                .then_with(|| a.seq.cmp(&b.seq))
        });

        let mut i = 0;
        while i < staged.len() {
            // Runs of equal coordinates collapse to the last-submitted cell.
            let mut j = i + 1;
            while j < staged.len()
                && order.cmp_global(&staged[i].coords, &staged[j].coords)
                    == std::cmp::Ordering::Equal
            {
                j += 1;
            }
            let cell = &staged[j - 1];
            if let Some(last) = &self.last_cell {
                match order.cmp_global(last, &cell.coords) {
                    std::cmp::Ordering::Less => {}
                    _ => {
                        return Err(Error::layout(
                            "unordered write batch interleaves with already flushed cells; \
                             split the write into separate queries",
                        ));
                    }
                }
            }
            let values: Vec<CellRef<'_>> = cell
                .values
                .iter()
                .map(|v| CellRef {
                    fixed: &v.fixed,
                    var: v.var.as_deref(),
                    validity: v.validity,
                })
                .collect();
            let coords = cell.coords.clone();
            self.emit_cell_inner(Some(&coords), &values)?;
            self.last_cell = Some(coords);
            i = j;
        }
        Ok(())
    }

    /// Dense ordered finalize: staged cells cover the subarray exactly;
    /// walk the aligned box in global order, emitting staged values inside
    /// the subarray and fill values in the alignment padding.
    fn flush_staged_dense(&mut self) -> Result<()> {
        let dt = self.schema.domain.datatype;
        let dim_lo: Coords = self.schema.domain.dims.iter().map(|d| d.lo).collect();
        let (sub_lo, sub_hi) = subarray_to_index_box(dt, &self.subarray, &dim_lo);
        let expected: u64 = sub_lo
            .iter()
            .zip(&sub_hi)
            .map(|(&lo, &hi)| hi - lo + 1)
            .product();
        if self.staged.len() as u64 != expected {
            return Err(Error::layout(format!(
                "ordered write supplied {} cells for a subarray of {expected}",
                self.staged.len()
            )));
        }

        let mut staged = std::mem::take(&mut self.staged);
        self.staged_bytes = 0;
        let order = self.order.clone();
        staged.sort_by(|a, b| order.cmp_global(&a.coords, &b.coords));

        let fills: Vec<Vec<u8>> = self
            .schema
            .attributes
            .iter()
            .map(|a| match a.cell_size() {
                Some(size) => a.datatype.fill_bytes().repeat(size / a.datatype.size()),
                None => Vec::new(),
            })
            .collect();

        let mut iter = DenseBoxIter::new(
            self.aligned_lo.clone(),
            self.aligned_hi.clone(),
            Coords::from_slice(self.order.extents()),
            Layout::GlobalOrder,
            self.schema.tile_order,
            self.schema.cell_order,
        );
        let mut next = 0usize;
        while let Some(idx) = iter.next_cell() {
            let coords = index_to_coords(dt, &idx, &dim_lo);
            let in_sub = idx
                .iter()
                .zip(sub_lo.iter().zip(&sub_hi))
                .all(|(&x, (&lo, &hi))| x >= lo && x <= hi);
            if in_sub {
                let cell = staged.get(next).ok_or_else(|| {
                    Error::internal("staged dense cells exhausted early")
                })?;
                if order.cmp_global(&cell.coords, &coords) != std::cmp::Ordering::Equal {
                    return Err(Error::internal(
                        "staged dense cell does not match its position",
                    ));
                }
                let values: Vec<CellRef<'_>> = cell
                    .values
                    .iter()
                    .map(|v| CellRef {
                        fixed: &v.fixed,
                        var: v.var.as_deref(),
                        validity: v.validity,
                    })
                    .collect();
                self.emit_cell_inner(None, &values)?;
                next += 1;
            } else {
                let values: Vec<CellRef<'_>> = self
                    .schema
                    .attributes
                    .iter()
                    .zip(&fills)
                    .map(|(a, fill)| CellRef {
                        fixed: fill,
                        var: a.cell_size().is_none().then_some(&[][..]),
                        validity: a.nullable.then_some(0),
                    })
                    .collect();
                self.emit_cell_inner(None, &values)?;
            }
        }
        Ok(())
    }

    fn emit_cell(&mut self, coords: Option<&[u64]>, values: &[CellRef<'_>]) -> Result<()> {
        self.emit_cell_inner(coords, values)
    }

    fn emit_cell_inner(
        &mut self,
        coords: Option<&[u64]>,
        values: &[CellRef<'_>],
    ) -> Result<()> {
        for (acc, value) in self.acc.iter_mut().zip(values) {
            match value.var {
                None => acc.fixed.write_bytes(value.fixed),
                Some(var) => {
                    acc.fixed.write_u64(acc.var.size() as u64);
                    acc.var.write_bytes(var);
                }
            }
            if let Some(v) = value.validity {
                acc.validity.write_bytes(&[v]);
            }
        }
        if let Some(coords) = coords {
            let dt = self.schema.domain.datatype;
            let mut encoded = Vec::with_capacity(self.coord_size * coords.len());
            for &c in coords {
                dt.encode(c, &mut encoded);
            }
            self.coords_acc.write_bytes(&encoded);
            self.tile_mbr.expand(dt, coords);
        }
        self.cells_in_tile += 1;
        self.total_cells += 1;
        if self.cells_in_tile == self.tile_capacity {
            self.flush_tile()?;
        }
        Ok(())
    }

    /// Compress and append the current tile to every stream.
    fn flush_tile(&mut self) -> Result<()> {
        if self.cells_in_tile == 0 {
            return Ok(());
        }
        self.check_cancel()?;

        let tile_idx = self.meta.tile_count;
        tracing::trace!(tile = tile_idx, cells = self.cells_in_tile, "flushing tile");
        for (id, attr) in self.schema.attributes.iter().enumerate() {
            let acc = std::mem::take(&mut self.acc[id]);
            let (fixed_payload, fixed_type) = match attr.cell_size() {
                Some(_) => (acc.fixed, attr.datatype),
                None => (acc.fixed, Datatype::UInt64),
            };
            let packed =
                codec::compress(attr.compressor, attr.level, fixed_type, fixed_payload.as_slice())
                    .map_err(|e| Error::from(e).in_query(attr.name.as_str(), tile_idx))?;
            let at = self.fixed_files[id].append(&self.vfs, &packed)?;
            self.meta.attrs[id].fixed.push(at, packed.len() as u64);

            if attr.cell_val_num.is_var() {
                let packed =
                    codec::compress(attr.compressor, attr.level, attr.datatype, acc.var.as_slice())
                        .map_err(|e| Error::from(e).in_query(attr.name.as_str(), tile_idx))?;
                let file = self.var_files[id]
                    .as_mut()
                    .ok_or_else(|| Error::internal("missing values stream"))?;
                let at = file.append(&self.vfs, &packed)?;
                self.meta.attrs[id]
                    .var
                    .as_mut()
                    .ok_or_else(|| Error::internal("missing values book-keeping"))?
                    .push(at, packed.len() as u64);
            }
            if attr.nullable {
                let packed = codec::compress(
                    attr.compressor,
                    attr.level,
                    Datatype::UInt8,
                    acc.validity.as_slice(),
                )
                .map_err(|e| Error::from(e).in_query(attr.name.as_str(), tile_idx))?;
                let file = self.validity_files[id]
                    .as_mut()
                    .ok_or_else(|| Error::internal("missing validity stream"))?;
                let at = file.append(&self.vfs, &packed)?;
                self.meta.attrs[id]
                    .validity
                    .as_mut()
                    .ok_or_else(|| Error::internal("missing validity book-keeping"))?
                    .push(at, packed.len() as u64);
            }
        }

        let dt = self.schema.domain.datatype;
        let mbr = if !self.frag_dense {
            let coords_payload = std::mem::take(&mut self.coords_acc);
            let packed = codec::compress(COORDS_COMPRESSOR, -1, dt, coords_payload.as_slice())
                .map_err(|e| {
                    Error::from(e).in_query(tessera_core::constants::COORDS_NAME, tile_idx)
                })?;
            let stream = self
                .coords_stream
                .as_mut()
                .ok_or_else(|| Error::internal("missing coordinate stream"))?;
            let at = stream.append(&self.vfs, &packed)?;
            self.meta
                .coords
                .as_mut()
                .ok_or_else(|| Error::internal("missing coordinate book-keeping"))?
                .push(at, packed.len() as u64);
            self.tile_mbr
                .rect()
                .ok_or_else(|| Error::internal("flushed a sparse tile without an MBR"))?
        } else {
            self.dense_tile_rect(tile_idx)?
        };
        self.meta.mbrs.push(mbr);
        self.tile_mbr = Mbr::empty(self.schema.domain.dim_count());
        self.meta.tile_count += 1;
        self.cells_in_tile = 0;
        Ok(())
    }

    /// Rectangle of dense tile `t` within the aligned box, in coordinate
    /// bits.
    fn dense_tile_rect(&self, t: u64) -> Result<Subarray> {
        let dt = self.schema.domain.datatype;
        let extents = self.order.extents();
        let dims = self.schema.domain.dim_count();
        let grid: Coords = (0..dims)
            .map(|d| (self.aligned_hi[d] - self.aligned_lo[d] + 1) / extents[d].max(1))
            .collect();
        let mut tc: Coords = smallvec![0; dims];
        unrank(t, &grid, self.schema.tile_order, &mut tc);
        let mut ranges = Vec::with_capacity(dims);
        for d in 0..dims {
            let lo_idx = self.aligned_lo[d] + tc[d] * extents[d];
            let hi_idx = lo_idx + extents[d] - 1;
            let dim_lo = self.schema.domain.dims[d].lo;
            ranges.push((dt.at_index(dim_lo, lo_idx), dt.at_index(dim_lo, hi_idx)));
        }
        Ok(Subarray::new(ranges))
    }

    /// Flush everything, write the book-keeping, publish the sentinel.
    pub fn finalize(mut self) -> Result<(FragmentId, String)> {
        self.check_active()?;
        self.check_cancel()?;

        match (self.frag_dense, self.layout) {
            (true, Layout::GlobalOrder) => {
                let dt = self.schema.domain.datatype;
                let dim_lo: Coords =
                    self.schema.domain.dims.iter().map(|d| d.lo).collect();
                let (lo, hi) = subarray_to_index_box(dt, &self.subarray, &dim_lo);
                let expected: u64 = lo
                    .iter()
                    .zip(&hi)
                    .map(|(&lo, &hi)| hi - lo + 1)
                    .product();
                if self.total_cells != expected {
                    return Err(Error::layout(format!(
                        "global dense write supplied {} cells for a subarray of {expected}",
                        self.total_cells
                    )));
                }
            }
            (true, _) => self.flush_staged_dense()?,
            (false, Layout::Unordered) => self.flush_staged_sparse()?,
            (false, _) => {}
        }
        self.flush_tile()?;

        if self.meta.tile_count == 0 {
            // An empty fragment carries no information; discard it.
            self.state = WriterState::Aborted;
            self.vfs.remove_dir(&self.frag_uri)?;
            return Err(Error::layout("finalize without any written cells"));
        }

        for file in self.fixed_files.iter_mut() {
            file.finish(&self.vfs)?;
        }
        for file in self.var_files.iter_mut().flatten() {
            file.finish(&self.vfs)?;
        }
        for file in self.validity_files.iter_mut().flatten() {
            file.finish(&self.vfs)?;
        }
        if let Some(stream) = self.coords_stream.as_mut() {
            stream.finish(&self.vfs)?;
        }

        // Sparse fragments record the bounding box of what was actually
        // written; dense fragments record their target subarray.
        if !self.frag_dense {
            let dt = self.schema.domain.datatype;
            let mut bounds = Mbr::empty(self.schema.domain.dim_count());
            for mbr in &self.meta.mbrs {
                bounds.expand_rect(dt, mbr);
            }
            self.meta.non_empty_domain = bounds
                .rect()
                .ok_or_else(|| Error::internal("finalized fragment without an MBR"))?;
        }

        self.meta.store(&self.vfs, &self.frag_uri)?;
        self.vfs.publish_file(&ok_file(&self.frag_uri), b"")?;
        self.state = WriterState::Finalized;
        Ok((self.id.clone(), self.frag_uri.clone()))
    }

    /// Discard the fragment directory.
    pub fn abort(mut self) -> Result<()> {
        self.state = WriterState::Aborted;
        for file in self.fixed_files.iter_mut() {
            let _ = file.finish(&self.vfs);
        }
        for file in self.var_files.iter_mut().flatten() {
            let _ = file.finish(&self.vfs);
        }
        for file in self.validity_files.iter_mut().flatten() {
            let _ = file.finish(&self.vfs);
        }
        if let Some(stream) = self.coords_stream.as_mut() {
            let _ = stream.finish(&self.vfs);
        }
        if self.vfs.is_dir(&self.frag_uri) {
            self.vfs.remove_dir(&self.frag_uri)?;
        }
        Ok(())
    }
}

/// Dense global writes must target tile-aligned subarrays so the caller's
/// stream fills whole tiles.
fn check_tile_aligned(
    domain: &tessera_core::Domain,
    order: &GlobalOrder,
    subarray: &Subarray,
) -> Result<()> {
    let dt = domain.datatype;
    let extents = order.extents();
    for ((dim, &(lo, hi)), &extent) in domain.dims.iter().zip(&subarray.ranges).zip(extents) {
        let lo_idx = dt.index_of(lo, dim.lo);
        let hi_idx = dt.index_of(hi, dim.lo);
        if lo_idx % extent != 0 || (hi_idx + 1) % extent != 0 {
            return Err(Error::layout(format!(
                "global-order dense writes require a tile-aligned subarray on `{}`",
                dim.name
            )));
        }
    }
    Ok(())
}

/// Index-space bounds of the tile-aligned expansion of a dense subarray.
fn align_to_tiles(
    dt: Datatype,
    domain: &tessera_core::Domain,
    order: &GlobalOrder,
    subarray: &Subarray,
) -> (Coords, Coords) {
    let extents = order.extents();
    let mut lo = Coords::new();
    let mut hi = Coords::new();
    for ((dim, &(s_lo, s_hi)), &extent) in
        domain.dims.iter().zip(&subarray.ranges).zip(extents)
    {
        let e = extent.max(1);
        let lo_idx = dt.index_of(s_lo, dim.lo);
        let hi_idx = dt.index_of(s_hi, dim.lo);
        lo.push((lo_idx / e) * e);
        hi.push(((hi_idx / e) + 1) * e - 1);
    }
    (lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{Attribute, Dimension, Domain, EngineConfig};

    fn test_vfs() -> Arc<Vfs> {
        Arc::new(Vfs::posix(&EngineConfig::default()))
    }

    fn dense_schema() -> Arc<ArraySchema> {
        Arc::new(
            ArraySchema::new(
                ArrayType::Dense,
                Layout::RowMajor,
                Layout::RowMajor,
                0,
                Domain::new(
                    Datatype::Int64,
                    vec![Dimension::new("r", 1, 4, 2), Dimension::new("c", 1, 4, 2)],
                ),
                vec![Attribute::new("a", Datatype::Int32)],
            )
            .unwrap(),
        )
    }

    fn sparse_schema() -> Arc<ArraySchema> {
        Arc::new(
            ArraySchema::new(
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
            .unwrap(),
        )
    }

    fn i32_bytes(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn coords_bytes(coords: &[(i64, i64)]) -> Vec<u8> {
        coords
            .iter()
            .flat_map(|&(r, c)| {
                r.to_le_bytes().into_iter().chain(c.to_le_bytes())
            })
            .collect()
    }

    #[test]
    fn dense_global_write_produces_finalized_fragment() {
        let dir = tempfile::TempDir::new().unwrap();
        let uri = dir.path().to_string_lossy().into_owned();
        let vfs = test_vfs();
        let schema = dense_schema();

        let mut writer = FragmentWriter::create(
            Arc::clone(&vfs),
            schema,
            &uri,
            Layout::GlobalOrder,
            None,
            1 << 20,
            None,
        )
        .unwrap();

        // 16 cells in global order.
        let values = i32_bytes(&(1..=16).collect::<Vec<i32>>());
        writer
            .submit(&WriteInput {
                attrs: vec![AttrData {
                    fixed: &values,
                    var: None,
                    validity: None,
                }],
                coords: None,
            })
            .unwrap();
        let (_, frag_uri) = writer.finalize().unwrap();

        assert!(crate::fragment::is_finalized(&vfs, &frag_uri));
        let schema = dense_schema();
        let meta = FragmentMetadata::load(&vfs, &schema, &frag_uri).unwrap();
        assert_eq!(meta.tile_count, 4);
        assert_eq!(meta.non_empty_domain.ranges, vec![(1, 4), (1, 4)]);
        // MBRs are the four 2x2 space tiles, in row-major tile order.
        assert_eq!(meta.mbrs[0].ranges, vec![(1, 2), (1, 2)]);
        assert_eq!(meta.mbrs[3].ranges, vec![(3, 4), (3, 4)]);
        // Compressed tile sizes sum to the attribute file size.
        let attr_path = attr_file(&frag_uri, "a");
        assert_eq!(meta.attrs[0].fixed.total_size(), vfs.file_size(&attr_path).unwrap());
    }

    #[test]
    fn dense_global_requires_aligned_subarray() {
        let dir = tempfile::TempDir::new().unwrap();
        let uri = dir.path().to_string_lossy().into_owned();
        let err = FragmentWriter::create(
            test_vfs(),
            dense_schema(),
            &uri,
            Layout::GlobalOrder,
            Some(Subarray::new(vec![(2, 3), (1, 4)])),
            1 << 20,
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("tile-aligned"));
    }

    #[test]
    fn dense_global_cell_count_enforced() {
        let dir = tempfile::TempDir::new().unwrap();
        let uri = dir.path().to_string_lossy().into_owned();
        let mut writer = FragmentWriter::create(
            test_vfs(),
            dense_schema(),
            &uri,
            Layout::GlobalOrder,
            None,
            1 << 20,
            None,
        )
        .unwrap();
        let values = i32_bytes(&[1, 2, 3]);
        writer
            .submit(&WriteInput {
                attrs: vec![AttrData {
                    fixed: &values,
                    var: None,
                    validity: None,
                }],
                coords: None,
            })
            .unwrap();
        let err = writer.finalize().unwrap_err();
        assert!(err.to_string().contains("cells"));
    }

    #[test]
    fn sparse_unordered_sorts_and_dedups() {
        let dir = tempfile::TempDir::new().unwrap();
        let uri = dir.path().to_string_lossy().into_owned();
        let vfs = test_vfs();
        let schema = sparse_schema();

        let mut writer = FragmentWriter::create(
            Arc::clone(&vfs),
            Arc::clone(&schema),
            &uri,
            Layout::Unordered,
            None,
            1 << 20,
            None,
        )
        .unwrap();

        // Unsorted, with a duplicate of (1, 2); the later value wins.
        let coords = coords_bytes(&[(3, 1), (1, 2), (1, 1), (1, 2)]);
        let values = i32_bytes(&[30, 98, 10, 99]);
        writer
            .submit(&WriteInput {
                attrs: vec![AttrData {
                    fixed: &values,
                    var: None,
                    validity: None,
                }],
                coords: Some(&coords),
            })
            .unwrap();
        let (_, frag_uri) = writer.finalize().unwrap();

        let meta = FragmentMetadata::load(&vfs, &schema, &frag_uri).unwrap();
        // Three distinct cells, capacity 2: two tiles.
        assert_eq!(meta.tile_count, 2);
        assert_eq!(meta.mbrs[0].ranges, vec![(1, 1), (1, 2)]);
        assert_eq!(meta.mbrs[1].ranges, vec![(3, 3), (1, 1)]);
        assert_eq!(meta.non_empty_domain.ranges, vec![(1, 3), (1, 2)]);
    }

    #[test]
    fn sparse_global_rejects_out_of_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let uri = dir.path().to_string_lossy().into_owned();
        let mut writer = FragmentWriter::create(
            test_vfs(),
            sparse_schema(),
            &uri,
            Layout::GlobalOrder,
            None,
            1 << 20,
            None,
        )
        .unwrap();
        let coords = coords_bytes(&[(3, 1), (1, 1)]);
        let values = i32_bytes(&[1, 2]);
        let err = writer
            .submit(&WriteInput {
                attrs: vec![AttrData {
                    fixed: &values,
                    var: None,
                    validity: None,
                }],
                coords: Some(&coords),
            })
            .unwrap_err();
        assert!(err.to_string().contains("global order"));
    }

    #[test]
    fn out_of_domain_coordinate_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let uri = dir.path().to_string_lossy().into_owned();
        let mut writer = FragmentWriter::create(
            test_vfs(),
            sparse_schema(),
            &uri,
            Layout::Unordered,
            None,
            1 << 20,
            None,
        )
        .unwrap();
        let coords = coords_bytes(&[(5, 1)]);
        let values = i32_bytes(&[1]);
        let err = writer
            .submit(&WriteInput {
                attrs: vec![AttrData {
                    fixed: &values,
                    var: None,
                    validity: None,
                }],
                coords: Some(&coords),
            })
            .unwrap_err();
        assert!(matches!(err, Error::Domain(_)));
    }

    #[test]
    fn abort_discards_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let uri = dir.path().to_string_lossy().into_owned();
        let vfs = test_vfs();
        let writer = FragmentWriter::create(
            Arc::clone(&vfs),
            sparse_schema(),
            &uri,
            Layout::Unordered,
            None,
            1 << 20,
            None,
        )
        .unwrap();
        let frag_uri = writer.uri().to_string();
        assert!(vfs.is_dir(&frag_uri));
        writer.abort().unwrap();
        assert!(!vfs.is_dir(&frag_uri));
    }

    #[test]
    fn cancellation_observed_between_tiles() {
        let dir = tempfile::TempDir::new().unwrap();
        let uri = dir.path().to_string_lossy().into_owned();
        let cancel = Arc::new(AtomicBool::new(true));
        let mut writer = FragmentWriter::create(
            test_vfs(),
            sparse_schema(),
            &uri,
            Layout::Unordered,
            None,
            1 << 20,
            Some(cancel),
        )
        .unwrap();
        let coords = coords_bytes(&[(1, 1)]);
        let values = i32_bytes(&[1]);
        let err = writer
            .submit(&WriteInput {
                attrs: vec![AttrData {
                    fixed: &values,
                    var: None,
                    validity: None,
                }],
                coords: Some(&coords),
            })
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
