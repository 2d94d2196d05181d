//! Local-filesystem backend over `std::fs` with `fs2` advisory locks.

use crate::backend::{FileHandle, LockHandle, LockKind, OpenMode, VfsBackend};
use crate::error::{VfsError, VfsResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// POSIX/Windows local filesystem backend.
///
/// Open files live in a handle table; each file carries its own mutex so
/// seek+read pairs stay consistent under concurrent readers of distinct
/// handles.
pub struct PosixBackend {
    next_id: AtomicU64,
    files: Mutex<HashMap<u64, Arc<Mutex<File>>>>,
    locks: Mutex<HashMap<u64, File>>,
}

impl PosixBackend {
    /// Create a backend instance.
    pub fn new() -> PosixBackend {
        PosixBackend {
            next_id: AtomicU64::new(1),
            files: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn file(&self, handle: FileHandle) -> VfsResult<Arc<Mutex<File>>> {
        self.files
            .lock()
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| VfsError::Io(format!("stale file handle {}", handle.0)))
    }

    fn lock_file_open(&self, path: &str) -> VfsResult<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| VfsError::from_io(path, e))
    }

    fn register_lock(&self, file: File) -> LockHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.locks.lock().insert(id, file);
        LockHandle(id)
    }
}

impl Default for PosixBackend {
    fn default() -> Self {
        PosixBackend::new()
    }
}

impl VfsBackend for PosixBackend {
    fn name(&self) -> &'static str {
        "posix"
    }

    fn supports_atomic_rename(&self) -> bool {
        true
    }

    fn is_local(&self) -> bool {
        true
    }

    fn open(&self, path: &str, mode: OpenMode) -> VfsResult<FileHandle> {
        let file = match mode {
            OpenMode::Read => OpenOptions::new().read(true).open(path),
            OpenMode::Write => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path),
            OpenMode::Append => OpenOptions::new().append(true).create(true).open(path),
        }
        .map_err(|e| VfsError::from_io(path, e))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.files.lock().insert(id, Arc::new(Mutex::new(file)));
        Ok(FileHandle(id))
    }

    fn read_at(&self, handle: FileHandle, offset: u64, buf: &mut [u8]) -> VfsResult<()> {
        let file = self.file(handle)?;
        let mut file = file.lock();
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(buf))
            .map_err(|e| VfsError::Io(format!("read at {offset}: {e}")))
    }

    fn write(&self, handle: FileHandle, buf: &[u8]) -> VfsResult<()> {
        let file = self.file(handle)?;
        let mut file = file.lock();
        file.write_all(buf)
            .map_err(|e| VfsError::Io(format!("write: {e}")))
    }

    fn sync(&self, handle: FileHandle) -> VfsResult<()> {
        let file = self.file(handle)?;
        let file = file.lock();
        file.sync_all().map_err(|e| VfsError::Io(format!("sync: {e}")))
    }

    fn close(&self, handle: FileHandle) -> VfsResult<()> {
        self.files.lock().remove(&handle.0);
        Ok(())
    }

    fn rename(&self, src: &str, dst: &str) -> VfsResult<()> {
        std::fs::rename(src, dst).map_err(|e| VfsError::from_io(src, e))
    }

    fn delete_file(&self, path: &str) -> VfsResult<()> {
        std::fs::remove_file(path).map_err(|e| VfsError::from_io(path, e))
    }

    fn mkdir(&self, path: &str) -> VfsResult<()> {
        if Path::new(path).is_dir() {
            return Err(VfsError::Exists(path.to_string()));
        }
        std::fs::create_dir_all(path).map_err(|e| VfsError::from_io(path, e))
    }

    fn remove_dir(&self, path: &str) -> VfsResult<()> {
        std::fs::remove_dir_all(path).map_err(|e| VfsError::from_io(path, e))
    }

    fn is_dir(&self, path: &str) -> bool {
        Path::new(path).is_dir()
    }

    fn is_file(&self, path: &str) -> bool {
        Path::new(path).is_file()
    }

    fn ls(&self, path: &str) -> VfsResult<Vec<String>> {
        let entries = std::fs::read_dir(path).map_err(|e| VfsError::from_io(path, e))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| VfsError::from_io(path, e))?;
            out.push(entry.path().to_string_lossy().into_owned());
        }
        out.sort();
        Ok(out)
    }

    fn file_size(&self, path: &str) -> VfsResult<u64> {
        std::fs::metadata(path)
            .map(|m| m.len())
            .map_err(|e| VfsError::from_io(path, e))
    }

    fn touch(&self, path: &str) -> VfsResult<()> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map(|_| ())
            .map_err(|e| VfsError::from_io(path, e))
    }

    fn lock(&self, path: &str, kind: LockKind) -> VfsResult<LockHandle> {
        let file = self.lock_file_open(path)?;
        match kind {
            LockKind::Shared => file.lock_shared(),
            LockKind::Exclusive => file.lock_exclusive(),
        }
        .map_err(|e| VfsError::Io(format!("lock {path}: {e}")))?;
        Ok(self.register_lock(file))
    }

    fn try_lock(&self, path: &str, kind: LockKind) -> VfsResult<Option<LockHandle>> {
        let file = self.lock_file_open(path)?;
        let attempt = match kind {
            LockKind::Shared => fs2::FileExt::try_lock_shared(&file),
            LockKind::Exclusive => fs2::FileExt::try_lock_exclusive(&file),
        };
        match attempt {
            Ok(()) => Ok(Some(self.register_lock(file))),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => {
                // fs2 reports contention with a platform-specific error;
                // treat any lock failure on an openable file as contention.
                let _ = e;
                Ok(None)
            }
        }
    }

    fn unlock(&self, lock: LockHandle) -> VfsResult<()> {
        if let Some(file) = self.locks.lock().remove(&lock.0) {
            let _ = file.unlock();
        }
        Ok(())
    }
}
