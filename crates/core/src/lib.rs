//! Core model of the tessera array engine.
//!
//! This crate holds everything the storage and query layers agree on and
//! nothing that touches a filesystem:
//! - the error taxonomy shared engine-wide,
//! - primitive datatypes and their canonical coordinate representation,
//! - the array schema (domain, dimensions, attributes, orders) and its
//!   on-disk codec,
//! - global-order arithmetic, including the Hilbert mapping,
//! - engine configuration.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compressor;
pub mod config;
pub mod constants;
pub mod datatype;
pub mod error;
pub mod hilbert;
pub mod layout;
pub mod order;
pub mod schema;

pub use compressor::Compressor;
pub use config::EngineConfig;
pub use datatype::Datatype;
pub use error::{Error, Result};
pub use layout::{ArrayType, Layout};
pub use order::{DenseBoxIter, GlobalOrder};
pub use schema::{
    ArraySchema, Attribute, CellValNum, Coords, Dimension, Domain, Mbr, SchemaDesc, Subarray,
};
