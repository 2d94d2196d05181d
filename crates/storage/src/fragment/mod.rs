//! Fragment naming, discovery, and on-disk layout.
//!
//! A fragment directory is named `__<timestamp>_<nonce>`: a millisecond
//! timestamp pushed through a per-process monotonic clock, plus a writer
//! nonce so concurrently produced fragments sort deterministically.
//! A fragment is finalized iff its book-keeping file parses with a valid
//! CRC and the zero-byte `__ok.tdb` sentinel exists.

mod metadata;
mod reader;
mod writer;

pub use metadata::{AttrStreams, FragmentMetadata, StreamOffsets};
pub use reader::{FragmentReader, LoadedAttrTile};
pub use writer::{AttrData, FragmentWriter, WriteInput, WriterState};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tessera_core::constants::{
    FRAGMENT_METADATA_FILE, FRAGMENT_PREFIX, OK_FILE,
};
use tessera_core::Result;
use tessera_vfs::{uri_join, uri_name, Vfs};

/// Per-process fragment clock: strictly increasing even when the wall
/// clock stalls within one millisecond.
static FRAGMENT_CLOCK: AtomicU64 = AtomicU64::new(0);

fn next_timestamp() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let mut prev = FRAGMENT_CLOCK.load(Ordering::Relaxed);
    loop {
        let next = now.max(prev + 1);
        match FRAGMENT_CLOCK.compare_exchange_weak(
            prev,
            next,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return next,
            Err(observed) => prev = observed,
        }
    }
}

/// Identity of one fragment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FragmentId {
    /// Monotonic-per-process creation timestamp (milliseconds).
    pub timestamp: u64,
    /// Writer nonce.
    pub nonce: String,
}

impl FragmentId {
    /// Mint a fresh id.
    pub fn new() -> FragmentId {
        FragmentId {
            timestamp: next_timestamp(),
            nonce: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    /// The fragment's directory name.
    pub fn dir_name(&self) -> String {
        format!("{}{}_{}", FRAGMENT_PREFIX, self.timestamp, self.nonce)
    }

    /// Parse a directory name; `None` for non-fragment directories.
    pub fn parse(name: &str) -> Option<FragmentId> {
        let rest = name.strip_prefix(FRAGMENT_PREFIX)?;
        let (ts, nonce) = rest.split_once('_')?;
        if nonce.is_empty() {
            return None;
        }
        Some(FragmentId {
            timestamp: ts.parse().ok()?,
            nonce: nonce.to_string(),
        })
    }
}

impl Default for FragmentId {
    fn default() -> Self {
        FragmentId::new()
    }
}

/// Path of an attribute's fixed tile stream inside a fragment.
pub fn attr_file(frag_uri: &str, attr: &str) -> String {
    uri_join(frag_uri, &format!("{attr}.tdb"))
}

/// Path of a variable-length attribute's values stream.
pub fn attr_var_file(frag_uri: &str, attr: &str) -> String {
    uri_join(frag_uri, &format!("{attr}_var.tdb"))
}

/// Path of a nullable attribute's validity stream.
pub fn attr_validity_file(frag_uri: &str, attr: &str) -> String {
    uri_join(frag_uri, &format!("{attr}_validity.tdb"))
}

/// Path of the sparse coordinates stream.
pub fn coords_file(frag_uri: &str) -> String {
    uri_join(frag_uri, tessera_core::constants::COORDS_FILE)
}

/// Path of the book-keeping file.
pub fn metadata_file(frag_uri: &str) -> String {
    uri_join(frag_uri, FRAGMENT_METADATA_FILE)
}

/// Path of the finalized sentinel.
pub fn ok_file(frag_uri: &str) -> String {
    uri_join(frag_uri, OK_FILE)
}

/// Whether a fragment directory carries the finalized sentinel.
pub fn is_finalized(vfs: &Vfs, frag_uri: &str) -> bool {
    vfs.is_file(&ok_file(frag_uri))
}

/// All fragment directories of an array, sorted by (timestamp, nonce),
/// finalized or not.
pub fn list_fragment_dirs(vfs: &Vfs, array_uri: &str) -> Result<Vec<(FragmentId, String)>> {
    let mut out = Vec::new();
    for child in vfs.ls(array_uri)? {
        if !vfs.is_dir(&child) {
            continue;
        }
        if let Some(id) = FragmentId::parse(uri_name(&child)) {
            out.push((id, child));
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_strictly_increasing() {
        let a = FragmentId::new();
        let b = FragmentId::new();
        let c = FragmentId::new();
        assert!(a.timestamp < b.timestamp);
        assert!(b.timestamp < c.timestamp);
    }

    #[test]
    fn dir_name_round_trip() {
        let id = FragmentId::new();
        let name = id.dir_name();
        assert!(name.starts_with("__"));
        assert_eq!(FragmentId::parse(&name), Some(id));
    }

    #[test]
    fn non_fragment_names_rejected() {
        assert_eq!(FragmentId::parse("data"), None);
        assert_eq!(FragmentId::parse("__array_schema.tdb"), None);
        assert_eq!(FragmentId::parse("__12notime"), None);
    }

    #[test]
    fn file_paths() {
        assert_eq!(attr_file("/a/__1_x", "v"), "/a/__1_x/v.tdb");
        assert_eq!(attr_var_file("/a/__1_x", "v"), "/a/__1_x/v_var.tdb");
        assert_eq!(
            attr_validity_file("/a/__1_x", "v"),
            "/a/__1_x/v_validity.tdb"
        );
        assert_eq!(coords_file("/a/__1_x"), "/a/__1_x/__coords.tdb");
    }

    #[test]
    fn list_sorts_by_timestamp_then_nonce() {
        use tessera_core::EngineConfig;
        let dir = tempfile::TempDir::new().unwrap();
        let vfs = Vfs::posix(&EngineConfig::default());
        let root = dir.path().to_string_lossy().into_owned();
        for name in ["__20_b", "__20_a", "__5_z", "not_a_fragment"] {
            vfs.mkdir(&uri_join(&root, name)).unwrap();
        }
        let listed = list_fragment_dirs(&vfs, &root).unwrap();
        let names: Vec<String> = listed.iter().map(|(id, _)| id.dir_name()).collect();
        assert_eq!(names, vec!["__5_z", "__20_a", "__20_b"]);
    }
}
