//! Error types for the tessera engine.
//!
//! One flat taxonomy shared by every layer. Lower layers (VFS, codecs)
//! define their own small enums and convert into [`Error`] at the boundary;
//! the query coordinator wraps errors with the offending attribute and tile
//! index before they reach the caller.

use std::io;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A storage object, file, or directory does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The target of a create operation already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The backend or codec does not support the requested operation.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// The filesystem refused access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Unrecoverable filesystem error, backend detail preserved.
    #[error("I/O error: {0}")]
    Io(String),

    /// Schema construction, validation, or deserialization failure.
    #[error("schema error: {0}")]
    Schema(String),

    /// Corrupt or unreadable fragment or schema file.
    #[error("format error: {0}")]
    Format(String),

    /// A codec rejected its input or failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// Coordinate or subarray outside the domain, or incompatible extents.
    #[error("domain error: {0}")]
    Domain(String),

    /// Cells supplied in a layout inconsistent with the array or subarray.
    #[error("layout error: {0}")]
    Layout(String),

    /// A query result exceeded the caller's buffer capacity.
    ///
    /// Translated into the `Incomplete` query status before it reaches the
    /// user; it never surfaces as a hard failure.
    #[error("result buffer overflow")]
    BufferOverflow,

    /// The query was cancelled cooperatively.
    #[error("cancelled")]
    Cancelled,

    /// Invariant violation. A correct engine never produces this.
    #[error("internal error: {0}")]
    Internal(String),

    /// An error raised while processing a specific attribute and tile.
    #[error("{source} (attribute `{attribute}`, tile {tile})")]
    Query {
        /// Attribute being processed when the error occurred.
        attribute: String,
        /// Tile index within the fragment.
        tile: u64,
        /// The underlying error.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a `NotFound` error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    /// Create an `AlreadyExists` error.
    pub fn already_exists(what: impl Into<String>) -> Self {
        Error::AlreadyExists(what.into())
    }

    /// Create a `NotSupported` error.
    pub fn not_supported(what: impl Into<String>) -> Self {
        Error::NotSupported(what.into())
    }

    /// Create an `Io` error.
    pub fn io(detail: impl Into<String>) -> Self {
        Error::Io(detail.into())
    }

    /// Create a `Schema` error.
    pub fn schema(detail: impl Into<String>) -> Self {
        Error::Schema(detail.into())
    }

    /// Create a `Format` error.
    pub fn format(detail: impl Into<String>) -> Self {
        Error::Format(detail.into())
    }

    /// Create a `Compression` error.
    pub fn compression(detail: impl Into<String>) -> Self {
        Error::Compression(detail.into())
    }

    /// Create a `Domain` error.
    pub fn domain(detail: impl Into<String>) -> Self {
        Error::Domain(detail.into())
    }

    /// Create a `Layout` error.
    pub fn layout(detail: impl Into<String>) -> Self {
        Error::Layout(detail.into())
    }

    /// Create an `Internal` error.
    pub fn internal(detail: impl Into<String>) -> Self {
        Error::Internal(detail.into())
    }

    /// Wrap this error with the attribute and tile it occurred on.
    pub fn in_query(self, attribute: impl Into<String>, tile: u64) -> Self {
        Error::Query {
            attribute: attribute.into(),
            tile,
            source: Box::new(self),
        }
    }

    /// Whether this error means "the object does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::NotFound(_))
    }

    /// Whether this error indicates corrupt on-disk state.
    ///
    /// Corruption on a single fragment is survivable (the fragment is
    /// skipped); corruption on the array schema fails the open.
    pub fn is_corruption(&self) -> bool {
        matches!(self.root(), Error::Format(_))
    }

    /// Whether this error is the buffer-overflow signal that maps to the
    /// `Incomplete` query status.
    pub fn is_overflow(&self) -> bool {
        matches!(self.root(), Error::BufferOverflow)
    }

    /// Whether the query was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled)
    }

    /// The innermost error, unwrapping query context frames.
    pub fn root(&self) -> &Error {
        match self {
            Error::Query { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(e.to_string()),
            io::ErrorKind::AlreadyExists => Error::AlreadyExists(e.to_string()),
            io::ErrorKind::PermissionDenied => Error::PermissionDenied(e.to_string()),
            _ => Error::Io(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_detail() {
        let err = Error::schema("duplicate attribute `a`");
        assert!(err.to_string().contains("schema error"));
        assert!(err.to_string().contains("duplicate attribute"));
    }

    #[test]
    fn io_kind_mapping() {
        let nf = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(Error::from(nf).is_not_found());

        let perm = io::Error::new(io::ErrorKind::PermissionDenied, "no");
        assert!(matches!(Error::from(perm), Error::PermissionDenied(_)));

        let other = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(Error::from(other), Error::Io(_)));
    }

    #[test]
    fn query_context_preserves_root() {
        let err = Error::format("bad CRC").in_query("a", 7);
        assert!(err.is_corruption());
        let msg = err.to_string();
        assert!(msg.contains("attribute `a`"));
        assert!(msg.contains("tile 7"));
    }

    #[test]
    fn overflow_classification() {
        assert!(Error::BufferOverflow.is_overflow());
        assert!(Error::BufferOverflow.in_query("a", 0).is_overflow());
        assert!(!Error::Cancelled.is_overflow());
        assert!(Error::Cancelled.is_cancelled());
    }
}
