//! # tessera
//!
//! A tiled multi-dimensional array storage engine. Dense and sparse
//! N-dimensional arrays persist as immutable, versioned fragments on a
//! pluggable filesystem; reads are range-restricted and resumable, writes
//! append fragments atomically, and consolidation folds fragments back
//! into one.
//!
//! # Quick start
//!
//! ```no_run
//! use tessera::{
//!     Array, ArraySchema, ArrayType, AttrBuffer, Attribute, Context, Datatype,
//!     Dimension, Domain, Layout, Query, QueryMode, Subarray,
//! };
//!
//! fn main() -> tessera::Result<()> {
//!     let ctx = Context::new()?;
//!
//!     // A dense 4x4 int32 array with 2x2 tiles.
//!     let schema = ArraySchema::new(
//!         ArrayType::Dense,
//!         Layout::RowMajor,
//!         Layout::RowMajor,
//!         0,
//!         Domain::new(
//!             Datatype::Int64,
//!             vec![Dimension::new("rows", 1, 4, 2), Dimension::new("cols", 1, 4, 2)],
//!         ),
//!         vec![Attribute::new("a", Datatype::Int32)],
//!     )?;
//!     Array::create(&ctx, "/data/my_array", &schema)?;
//!
//!     // Write 16 cells in global order.
//!     let array = std::sync::Arc::new(Array::open(&ctx, "/data/my_array", QueryMode::Write)?);
//!     let values: Vec<u8> = (1..=16i32).flat_map(|v| v.to_le_bytes()).collect();
//!     let mut query = Query::new(&ctx, array, QueryMode::Write)?;
//!     query.set_layout(Layout::GlobalOrder)?;
//!     query.set_buffer("a", AttrBuffer::fixed(values))?;
//!     query.submit()?;
//!     query.finalize()?;
//!
//!     // Read a subarray back, row-major.
//!     let array = std::sync::Arc::new(Array::open(&ctx, "/data/my_array", QueryMode::Read)?);
//!     let mut query = Query::new(&ctx, array, QueryMode::Read)?;
//!     query.set_subarray(Subarray::new(vec![(2, 4), (2, 4)]))?;
//!     query.set_buffer("a", AttrBuffer::reading(1024))?;
//!     query.submit()?;
//!     Ok(())
//! }
//! ```

pub use tessera_core::{
    constants, ArraySchema, ArrayType, Attribute, CellValNum, Compressor, Coords, Datatype,
    Dimension, Domain, EngineConfig, Error, Layout, Result, SchemaDesc, Subarray,
};
pub use tessera_engine::{
    consolidate, group_create, is_array, object_ls, object_move, object_remove, object_type,
    object_walk, Array, AttrBuffer, CancelHandle, Context, ObjectType, Query, QueryMode,
    QueryStatus,
};
pub use tessera_vfs::{Vfs, VfsBackend, VfsError, WalkOrder};
