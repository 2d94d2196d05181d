//! Sharded read-ahead cache for small reads.
//!
//! Object stores pay a round trip per `read`; tile fetches are small and
//! clustered, so a byte-range cache in front of the backend pays off.
//! Local filesystems bypass this by default and rely on the OS page cache.

use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: String,
    offset: u64,
    len: usize,
}

struct CacheEntry {
    bytes: Vec<u8>,
    last_used: u64,
}

struct Shard {
    entries: HashMap<CacheKey, CacheEntry>,
    bytes: usize,
    clock: u64,
}

impl Shard {
    fn new() -> Shard {
        Shard {
            entries: HashMap::new(),
            bytes: 0,
            clock: 0,
        }
    }

    fn get(&mut self, key: &CacheKey) -> Option<Vec<u8>> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(key).map(|e| {
            e.last_used = clock;
            e.bytes.clone()
        })
    }

    fn insert(&mut self, key: CacheKey, bytes: Vec<u8>, capacity: usize) {
        if bytes.len() > capacity {
            return;
        }
        self.clock += 1;
        self.bytes += bytes.len();
        self.entries.insert(
            key,
            CacheEntry {
                bytes,
                last_used: self.clock,
            },
        );
        while self.bytes > capacity {
            // Evict the least-recently-used entry.
            let victim = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match victim {
                Some(k) => {
                    if let Some(e) = self.entries.remove(&k) {
                        self.bytes -= e.bytes.len();
                    }
                }
                None => break,
            }
        }
    }

    fn invalidate_path(&mut self, path: &str) {
        let removed: Vec<CacheKey> = self
            .entries
            .keys()
            .filter(|k| k.path == path)
            .cloned()
            .collect();
        for k in removed {
            if let Some(e) = self.entries.remove(&k) {
                self.bytes -= e.bytes.len();
            }
        }
    }
}

/// LRU byte-range cache split into independently locked shards.
pub struct ReadAheadCache {
    shards: Vec<Mutex<Shard>>,
    shard_capacity: usize,
}

impl ReadAheadCache {
    /// Build a cache with `total_capacity` bytes split over `shards`.
    pub fn new(total_capacity: usize, shards: usize) -> ReadAheadCache {
        let shards = shards.max(1);
        ReadAheadCache {
            shards: (0..shards).map(|_| Mutex::new(Shard::new())).collect(),
            shard_capacity: (total_capacity / shards).max(1),
        }
    }

    fn shard_for(&self, key: &CacheKey) -> &Mutex<Shard> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Cached bytes for `(path, offset, len)`, if present.
    pub fn get(&self, path: &str, offset: u64, len: usize) -> Option<Vec<u8>> {
        let key = CacheKey {
            path: path.to_string(),
            offset,
            len,
        };
        self.shard_for(&key).lock().get(&key)
    }

    /// Insert bytes for `(path, offset, len)`.
    pub fn insert(&self, path: &str, offset: u64, bytes: Vec<u8>) {
        let key = CacheKey {
            path: path.to_string(),
            offset,
            len: bytes.len(),
        };
        let shard = self.shard_for(&key);
        shard.lock().insert(key, bytes, self.shard_capacity);
    }

    /// Drop every cached range of `path` (after delete or rewrite).
    pub fn invalidate(&self, path: &str) {
        for shard in &self.shards {
            shard.lock().invalidate_path(path);
        }
    }
}
