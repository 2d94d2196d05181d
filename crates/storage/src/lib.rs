//! Storage layer of the tessera array engine.
//!
//! Everything between the schema model and the query coordinator:
//! - byte buffers and decoded tile payloads,
//! - tile codecs (RLE, double-delta, byte shuffle, and the generic
//!   entropy coders),
//! - the fragment format: book-keeping, the writer that materializes a
//!   fragment atomically, and the reader that serves tile fetches.
//!
//! Fragments are immutable once the `__ok.tdb` sentinel appears; readers
//! ignore anything unfinalized.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod codec;
pub mod fragment;
pub mod tile;

pub use buffer::{Buffer, ConstBuffer};
pub use codec::{compress, compress_bound, decompress, CodecError, CodecResult};
pub use fragment::{
    attr_file, attr_validity_file, attr_var_file, coords_file, is_finalized,
    list_fragment_dirs, metadata_file, ok_file, AttrData, AttrStreams, FragmentId,
    FragmentMetadata, FragmentReader, FragmentWriter, LoadedAttrTile, StreamOffsets,
    WriteInput, WriterState,
};
pub use tile::{Tile, VarTile};
