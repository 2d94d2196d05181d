//! VFS error classification.

use std::io;
use thiserror::Error;

/// Result alias for backend operations.
pub type VfsResult<T> = std::result::Result<T, VfsError>;

/// Classified filesystem errors.
#[derive(Debug, Error)]
pub enum VfsError {
    /// The file or directory does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The target already exists.
    #[error("already exists: {0}")]
    Exists(String),

    /// The backend refused access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The backend cannot perform this operation.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Any other filesystem failure, detail preserved.
    #[error("I/O error: {0}")]
    Io(String),
}

impl VfsError {
    /// Classify a std I/O error for `path`.
    pub fn from_io(path: &str, e: io::Error) -> VfsError {
        match e.kind() {
            io::ErrorKind::NotFound => VfsError::NotFound(path.to_string()),
            io::ErrorKind::AlreadyExists => VfsError::Exists(path.to_string()),
            io::ErrorKind::PermissionDenied => VfsError::PermissionDenied(path.to_string()),
            _ => VfsError::Io(format!("{path}: {e}")),
        }
    }
}

impl From<VfsError> for tessera_core::Error {
    fn from(e: VfsError) -> tessera_core::Error {
        match e {
            VfsError::NotFound(p) => tessera_core::Error::NotFound(p),
            VfsError::Exists(p) => tessera_core::Error::AlreadyExists(p),
            VfsError::PermissionDenied(p) => tessera_core::Error::PermissionDenied(p),
            VfsError::NotSupported(p) => tessera_core::Error::NotSupported(p),
            VfsError::Io(d) => tessera_core::Error::Io(d),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_classification() {
        let e = VfsError::from_io("/a", io::Error::new(io::ErrorKind::NotFound, "x"));
        assert!(matches!(e, VfsError::NotFound(_)));
        let e = VfsError::from_io("/a", io::Error::new(io::ErrorKind::AlreadyExists, "x"));
        assert!(matches!(e, VfsError::Exists(_)));
        let e = VfsError::from_io("/a", io::Error::new(io::ErrorKind::Other, "x"));
        assert!(matches!(e, VfsError::Io(_)));
    }

    #[test]
    fn converts_to_engine_error() {
        let e: tessera_core::Error = VfsError::NotFound("/gone".into()).into();
        assert!(e.is_not_found());
    }
}
