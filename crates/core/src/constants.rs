//! On-disk names and format versions.

/// Engine version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current fragment and schema format version. The double-delta codec wire
/// format is versioned together with this.
pub const FORMAT_VERSION: u32 = 1;

/// Suffix of every engine-owned file.
pub const FILE_SUFFIX: &str = ".tdb";

/// Serialized array schema, at the array root.
pub const ARRAY_SCHEMA_FILE: &str = "__array_schema.tdb";

/// Zero-byte file the VFS lock primitive operates on.
pub const LOCK_FILE: &str = "__lock.tdb";

/// Group sentinel.
pub const GROUP_FILE: &str = "__tiledb_group.tdb";

/// Key-value store sentinel. Recognized by the object catalog for type
/// detection; the key-value surface itself is not part of this engine.
pub const KV_FILE: &str = "__tiledb_kv.tdb";

/// Book-keeping file inside a fragment directory.
pub const FRAGMENT_METADATA_FILE: &str = "__fragment_metadata.tdb";

/// Zero-byte sentinel marking a fragment as finalized.
pub const OK_FILE: &str = "__ok.tdb";

/// Coordinates tile stream of a sparse fragment.
pub const COORDS_FILE: &str = "__coords.tdb";

/// Reserved name of the coordinates pseudo-attribute in query bindings.
pub const COORDS_NAME: &str = "__coords";

/// Suffix of the values stream of a variable-length attribute
/// (`<attr>_var.tdb`).
pub const VAR_SUFFIX: &str = "_var";

/// Suffix of the validity stream of a nullable attribute
/// (`<attr>_validity.tdb`).
pub const VALIDITY_SUFFIX: &str = "_validity";

/// Prefix of fragment directories (`__<timestamp>_<nonce>`).
pub const FRAGMENT_PREFIX: &str = "__";
