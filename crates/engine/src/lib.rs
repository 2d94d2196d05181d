//! Query engine of the tessera array store.
//!
//! Ties the storage layer to the caller-facing surface: array handles,
//! the query coordinator (reads with incomplete/resume, fragment-producing
//! writes, async submission, cooperative cancellation), the consolidator,
//! and the object catalog.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod array;
pub mod catalog;
pub mod consolidate;
pub mod context;
pub mod query;

pub use array::{is_array, Array, QueryMode};
pub use catalog::{
    group_create, object_ls, object_move, object_remove, object_type, object_walk, ObjectType,
};
pub use consolidate::consolidate;
pub use context::Context;
pub use query::{AttrBuffer, CancelHandle, Query, QueryStatus};
