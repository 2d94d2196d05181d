//! Virtual filesystem layer.
//!
//! The engine core talks to storage through [`Vfs`], which dispatches URIs
//! to a [`VfsBackend`] and adds the pieces every backend shares: whole-file
//! helpers, bulk region reads with coalescing, recursive walks, atomic
//! publish-by-rename, advisory lock guards, and a sharded read-ahead cache
//! for small reads.
//!
//! Only the local backend ships in-tree; object-store adapters implement
//! [`VfsBackend`] out of tree.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod backend;
mod error;
mod posix;
mod readahead;

pub use backend::{FileHandle, LockHandle, LockKind, OpenMode, VfsBackend};
pub use error::{VfsError, VfsResult};
pub use posix::PosixBackend;
pub use readahead::ReadAheadCache;

use std::sync::Arc;
use tessera_core::{EngineConfig, Result};

/// Traversal order for [`Vfs::walk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOrder {
    /// A directory before its children.
    Preorder,
    /// A directory after its children.
    Postorder,
}

/// An advisory lock held on a URI; released on drop.
pub struct LockGuard {
    backend: Arc<dyn VfsBackend>,
    handle: Option<LockHandle>,
}

impl LockGuard {
    /// Release the lock explicitly.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.backend.unlock(handle);
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// URI-dispatching front over a backend.
pub struct Vfs {
    backend: Arc<dyn VfsBackend>,
    cache: ReadAheadCache,
    cache_reads: bool,
    readahead_threshold: usize,
}

/// Strip a `file://` prefix; plain paths pass through.
fn resolve(uri: &str) -> &str {
    uri.strip_prefix("file://").unwrap_or(uri)
}

impl Vfs {
    /// A VFS over the local filesystem.
    pub fn posix(config: &EngineConfig) -> Vfs {
        Vfs::with_backend(Arc::new(PosixBackend::new()), config)
    }

    /// A VFS over an arbitrary backend.
    pub fn with_backend(backend: Arc<dyn VfsBackend>, config: &EngineConfig) -> Vfs {
        let cache_reads = !backend.is_local() || config.readahead_on_local;
        Vfs {
            backend,
            cache: ReadAheadCache::new(config.readahead_cache_size, config.readahead_shards),
            cache_reads,
            readahead_threshold: config.readahead_threshold,
        }
    }

    /// The underlying backend.
    pub fn backend(&self) -> &dyn VfsBackend {
        self.backend.as_ref()
    }

    // ------------------------------------------------------------------
    // Directory and file metadata
    // ------------------------------------------------------------------

    /// Whether `uri` is a directory.
    pub fn is_dir(&self, uri: &str) -> bool {
        self.backend.is_dir(resolve(uri))
    }

    /// Whether `uri` is a regular file.
    pub fn is_file(&self, uri: &str) -> bool {
        self.backend.is_file(resolve(uri))
    }

    /// Create a directory (with parents).
    pub fn mkdir(&self, uri: &str) -> Result<()> {
        Ok(self.backend.mkdir(resolve(uri))?)
    }

    /// Remove a directory tree.
    pub fn remove_dir(&self, uri: &str) -> Result<()> {
        Ok(self.backend.remove_dir(resolve(uri))?)
    }

    /// Delete a file and drop its cached ranges.
    pub fn delete_file(&self, uri: &str) -> Result<()> {
        let path = resolve(uri);
        self.cache.invalidate(path);
        Ok(self.backend.delete_file(path)?)
    }

    /// Create an empty file.
    pub fn touch(&self, uri: &str) -> Result<()> {
        Ok(self.backend.touch(resolve(uri))?)
    }

    /// Rename, replacing the destination.
    pub fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let src = resolve(src);
        let dst = resolve(dst);
        self.cache.invalidate(src);
        self.cache.invalidate(dst);
        Ok(self.backend.rename(src, dst)?)
    }

    /// Immediate children, as full paths, sorted.
    pub fn ls(&self, uri: &str) -> Result<Vec<String>> {
        Ok(self.backend.ls(resolve(uri))?)
    }

    /// File size in bytes.
    pub fn file_size(&self, uri: &str) -> Result<u64> {
        Ok(self.backend.file_size(resolve(uri))?)
    }

    // ------------------------------------------------------------------
    // Whole files
    // ------------------------------------------------------------------

    /// Read an entire file.
    pub fn read_file(&self, uri: &str) -> Result<Vec<u8>> {
        let path = resolve(uri);
        let size = self.backend.file_size(path)? as usize;
        let handle = self.backend.open(path, OpenMode::Read)?;
        let mut buf = vec![0u8; size];
        let result = if size > 0 {
            self.backend.read_at(handle, 0, &mut buf)
        } else {
            Ok(())
        };
        let _ = self.backend.close(handle);
        result?;
        Ok(buf)
    }

    /// Create or replace a file with `bytes`, synced.
    pub fn write_file(&self, uri: &str, bytes: &[u8]) -> Result<()> {
        let path = resolve(uri);
        self.cache.invalidate(path);
        let handle = self.backend.open(path, OpenMode::Write)?;
        let result = self
            .backend
            .write(handle, bytes)
            .and_then(|_| self.backend.sync(handle));
        let _ = self.backend.close(handle);
        Ok(result?)
    }

    /// Publish a file atomically: write a temporary sibling, sync, rename.
    ///
    /// On backends without atomic rename this degrades to write-then-rename
    /// with the same visibility discipline (readers gate on the rename
    /// target's existence, never on its content).
    pub fn publish_file(&self, uri: &str, bytes: &[u8]) -> Result<()> {
        let path = resolve(uri);
        if !self.backend.supports_atomic_rename() {
            tracing::debug!(
                backend = self.backend.name(),
                %path,
                "publishing without atomic rename"
            );
        }
        let tmp = format!("{path}.tmp");
        self.write_file(&tmp, bytes)?;
        self.rename(&tmp, path)
    }

    // ------------------------------------------------------------------
    // Handle pass-through (streaming writers)
    // ------------------------------------------------------------------

    /// Open a file handle.
    pub fn open(&self, uri: &str, mode: OpenMode) -> Result<FileHandle> {
        if matches!(mode, OpenMode::Write | OpenMode::Append) {
            self.cache.invalidate(resolve(uri));
        }
        Ok(self.backend.open(resolve(uri), mode)?)
    }

    /// Append to an open handle.
    pub fn write(&self, handle: FileHandle, buf: &[u8]) -> Result<()> {
        Ok(self.backend.write(handle, buf)?)
    }

    /// Sync an open handle.
    pub fn sync(&self, handle: FileHandle) -> Result<()> {
        Ok(self.backend.sync(handle)?)
    }

    /// Close a handle.
    pub fn close(&self, handle: FileHandle) -> Result<()> {
        Ok(self.backend.close(handle)?)
    }

    // ------------------------------------------------------------------
    // Ranged reads
    // ------------------------------------------------------------------

    /// Read `len` bytes at `offset`, through the read-ahead cache when the
    /// read is small and caching applies to this backend.
    pub fn read_at(&self, uri: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        let path = resolve(uri);
        let use_cache = self.cache_reads && len <= self.readahead_threshold;
        if use_cache {
            if let Some(bytes) = self.cache.get(path, offset, len) {
                return Ok(bytes);
            }
        }
        let handle = self.backend.open(path, OpenMode::Read)?;
        let mut buf = vec![0u8; len];
        let result = self.backend.read_at(handle, offset, &mut buf);
        let _ = self.backend.close(handle);
        result?;
        if use_cache {
            self.cache.insert(path, offset, buf.clone());
        }
        Ok(buf)
    }

    /// Bulk read: fetch every `(offset, len)` region of `uri` into one
    /// contiguous buffer, in order. Adjacent regions coalesce into single
    /// backend reads.
    pub fn read_regions(&self, uri: &str, regions: &[(u64, u64)]) -> Result<Vec<u8>> {
        let path = resolve(uri);
        let total: u64 = regions.iter().map(|&(_, len)| len).sum();
        let mut out = Vec::with_capacity(total as usize);
        if regions.is_empty() {
            return Ok(out);
        }

        let handle = self.backend.open(path, OpenMode::Read)?;
        let result = (|| -> VfsResult<()> {
            let mut i = 0;
            while i < regions.len() {
                let (start, mut len) = regions[i];
                let mut j = i + 1;
                while j < regions.len() && regions[j].0 == start + len {
                    len += regions[j].1;
                    j += 1;
                }
                let at = out.len();
                out.resize(at + len as usize, 0);
                self.backend.read_at(handle, start, &mut out[at..])?;
                i = j;
            }
            Ok(())
        })();
        let _ = self.backend.close(handle);
        result?;
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    /// Every directory under `uri` (excluding `uri` itself), in pre- or
    /// post-order.
    pub fn walk(&self, uri: &str, order: WalkOrder) -> Result<Vec<String>> {
        let mut out = Vec::new();
        self.walk_into(resolve(uri), order, &mut out)?;
        Ok(out)
    }

    fn walk_into(&self, path: &str, order: WalkOrder, out: &mut Vec<String>) -> Result<()> {
        for child in self.backend.ls(path)? {
            if self.backend.is_dir(&child) {
                if order == WalkOrder::Preorder {
                    out.push(child.clone());
                }
                self.walk_into(&child, order, out)?;
                if order == WalkOrder::Postorder {
                    out.push(child);
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Locks
    // ------------------------------------------------------------------

    /// Block until a shared lock on `uri` is held.
    pub fn lock_shared(&self, uri: &str) -> Result<LockGuard> {
        let handle = self.backend.lock(resolve(uri), LockKind::Shared)?;
        Ok(LockGuard {
            backend: Arc::clone(&self.backend),
            handle: Some(handle),
        })
    }

    /// Block until an exclusive lock on `uri` is held.
    pub fn lock_exclusive(&self, uri: &str) -> Result<LockGuard> {
        let handle = self.backend.lock(resolve(uri), LockKind::Exclusive)?;
        Ok(LockGuard {
            backend: Arc::clone(&self.backend),
            handle: Some(handle),
        })
    }

    /// Try an exclusive lock without blocking.
    pub fn try_lock_exclusive(&self, uri: &str) -> Result<Option<LockGuard>> {
        match self.backend.try_lock(resolve(uri), LockKind::Exclusive)? {
            Some(handle) => Ok(Some(LockGuard {
                backend: Arc::clone(&self.backend),
                handle: Some(handle),
            })),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vfs")
            .field("backend", &self.backend.name())
            .field("cache_reads", &self.cache_reads)
            .finish()
    }
}

/// Join a path segment onto a URI.
pub fn uri_join(uri: &str, name: &str) -> String {
    let base = uri.trim_end_matches('/');
    format!("{base}/{name}")
}

/// Last path segment of a URI.
pub fn uri_name(uri: &str) -> &str {
    resolve(uri)
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vfs() -> Vfs {
        Vfs::posix(&EngineConfig::default())
    }

    fn path_in(dir: &TempDir, name: &str) -> String {
        dir.path().join(name).to_string_lossy().into_owned()
    }

    #[test]
    fn whole_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let vfs = vfs();
        let uri = path_in(&dir, "x.tdb");
        vfs.write_file(&uri, b"payload").unwrap();
        assert_eq!(vfs.read_file(&uri).unwrap(), b"payload");
        assert_eq!(vfs.file_size(&uri).unwrap(), 7);
    }

    #[test]
    fn file_scheme_accepted() {
        let dir = TempDir::new().unwrap();
        let vfs = vfs();
        let plain = path_in(&dir, "x.tdb");
        let uri = format!("file://{plain}");
        vfs.write_file(&uri, b"abc").unwrap();
        assert!(vfs.is_file(&plain));
        assert_eq!(vfs.read_file(&plain).unwrap(), b"abc");
    }

    #[test]
    fn publish_is_visible_and_complete() {
        let dir = TempDir::new().unwrap();
        let vfs = vfs();
        let uri = path_in(&dir, "sealed.tdb");
        vfs.publish_file(&uri, b"final").unwrap();
        assert_eq!(vfs.read_file(&uri).unwrap(), b"final");
        assert!(!vfs.is_file(&format!("{uri}.tmp")));
    }

    #[test]
    fn read_regions_coalesces() {
        let dir = TempDir::new().unwrap();
        let vfs = vfs();
        let uri = path_in(&dir, "data.tdb");
        vfs.write_file(&uri, b"0123456789").unwrap();

        // Adjacent regions [2,2] + [4,3], then a gap, then [9,1].
        let out = vfs.read_regions(&uri, &[(2, 2), (4, 3), (9, 1)]).unwrap();
        assert_eq!(out, b"2345689");
    }

    #[test]
    fn read_at_empty_and_regions_empty() {
        let dir = TempDir::new().unwrap();
        let vfs = vfs();
        let uri = path_in(&dir, "data.tdb");
        vfs.write_file(&uri, b"abc").unwrap();
        assert_eq!(vfs.read_regions(&uri, &[]).unwrap(), Vec::<u8>::new());
        assert_eq!(vfs.read_at(&uri, 1, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn walk_orders() {
        let dir = TempDir::new().unwrap();
        let vfs = vfs();
        let root = dir.path().to_string_lossy().into_owned();
        vfs.mkdir(&path_in(&dir, "a/b")).unwrap();
        vfs.mkdir(&path_in(&dir, "c")).unwrap();

        let pre = vfs.walk(&root, WalkOrder::Preorder).unwrap();
        let a = path_in(&dir, "a");
        let ab = path_in(&dir, "a/b");
        let c = path_in(&dir, "c");
        assert_eq!(pre, vec![a.clone(), ab.clone(), c.clone()]);

        let post = vfs.walk(&root, WalkOrder::Postorder).unwrap();
        assert_eq!(post, vec![ab, a, c]);
    }

    #[test]
    fn uri_helpers() {
        assert_eq!(uri_join("/data/arrays/", "x"), "/data/arrays/x");
        assert_eq!(uri_name("/data/arrays/x/"), "x");
        assert_eq!(uri_name("file:///data/y"), "y");
    }

    #[test]
    fn lock_guard_releases_on_drop() {
        let dir = TempDir::new().unwrap();
        let vfs = vfs();
        let uri = path_in(&dir, "__lock.tdb");
        vfs.touch(&uri).unwrap();
        {
            let _shared = vfs.lock_shared(&uri).unwrap();
            assert!(vfs.try_lock_exclusive(&uri).unwrap().is_none());
        }
        let ex = vfs.try_lock_exclusive(&uri).unwrap();
        assert!(ex.is_some());
    }
}
