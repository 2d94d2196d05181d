//! The backend trait the engine core consumes.
//!
//! Backends expose byte-level file I/O, directory operations, atomic
//! rename, and advisory file locks. Everything above this trait is
//! backend-agnostic; object-store adapters implement the same surface.

use crate::error::VfsResult;

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only access.
    Read,
    /// Create or truncate, then write.
    Write,
    /// Create if missing, append at the end.
    Append,
}

/// Advisory lock flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// Many holders; taken by readers and writers.
    Shared,
    /// Single holder; taken for fragment removal.
    Exclusive,
}

/// Opaque open-file handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub u64);

/// Opaque held-lock handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockHandle(pub u64);

/// Byte-level filesystem capability.
///
/// Implementations must be `Send + Sync`; a single backend instance is
/// shared by every thread of the process.
pub trait VfsBackend: Send + Sync {
    /// Backend name, for diagnostics.
    fn name(&self) -> &'static str;

    /// Whether `rename` is atomic on this backend. Backends without it
    /// get the write-temp-then-publish fallback with a sentinel.
    fn supports_atomic_rename(&self) -> bool;

    /// Whether this is a local filesystem (the OS page cache applies and
    /// the read-ahead cache is skipped by default).
    fn is_local(&self) -> bool;

    /// Open a file.
    fn open(&self, path: &str, mode: OpenMode) -> VfsResult<FileHandle>;

    /// Read exactly `buf.len()` bytes starting at `offset`.
    fn read_at(&self, handle: FileHandle, offset: u64, buf: &mut [u8]) -> VfsResult<()>;

    /// Append `buf` at the handle's cursor.
    fn write(&self, handle: FileHandle, buf: &[u8]) -> VfsResult<()>;

    /// Flush file contents to stable storage.
    fn sync(&self, handle: FileHandle) -> VfsResult<()>;

    /// Close the handle.
    fn close(&self, handle: FileHandle) -> VfsResult<()>;

    /// Rename `src` to `dst`, replacing `dst` if present.
    fn rename(&self, src: &str, dst: &str) -> VfsResult<()>;

    /// Delete a file.
    fn delete_file(&self, path: &str) -> VfsResult<()>;

    /// Create a directory, including missing parents.
    fn mkdir(&self, path: &str) -> VfsResult<()>;

    /// Remove a directory tree.
    fn remove_dir(&self, path: &str) -> VfsResult<()>;

    /// Whether `path` is a directory.
    fn is_dir(&self, path: &str) -> bool;

    /// Whether `path` is a regular file.
    fn is_file(&self, path: &str) -> bool;

    /// Immediate children of a directory, as full paths, sorted.
    fn ls(&self, path: &str) -> VfsResult<Vec<String>>;

    /// Size of a file in bytes.
    fn file_size(&self, path: &str) -> VfsResult<u64>;

    /// Create an empty file (no-op if it exists).
    fn touch(&self, path: &str) -> VfsResult<()>;

    /// Block until the advisory lock on `path` is held.
    fn lock(&self, path: &str, kind: LockKind) -> VfsResult<LockHandle>;

    /// Try to take the lock without blocking; `None` when contended.
    fn try_lock(&self, path: &str, kind: LockKind) -> VfsResult<Option<LockHandle>>;

    /// Release a held lock.
    fn unlock(&self, lock: LockHandle) -> VfsResult<()>;
}
