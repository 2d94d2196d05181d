//! Engine configuration.
//!
//! There is no process-wide state: a config value travels inside the
//! context that every operation receives.

/// Tunables for the engine core.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of the staging buffer for unordered writes, in bytes.
    /// When the staged cells exceed this, they are sorted and flushed as
    /// finished tiles.
    pub sort_buffer_size: usize,

    /// Total capacity of the VFS read-ahead cache, in bytes.
    pub readahead_cache_size: usize,

    /// Number of shards the read-ahead cache is split into; each shard has
    /// its own lock.
    pub readahead_shards: usize,

    /// Reads at or below this size are served through the read-ahead cache
    /// (when it is enabled for the backend).
    pub readahead_threshold: usize,

    /// Whether local-filesystem reads go through the read-ahead cache.
    /// Off by default; the OS page cache already covers this case.
    pub readahead_on_local: bool,

    /// Worker threads for async query submission and parallel tile work.
    /// `0` means the number of available CPUs.
    pub worker_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sort_buffer_size: 10 * 1024 * 1024,
            readahead_cache_size: 16 * 1024 * 1024,
            readahead_shards: 8,
            readahead_threshold: 128 * 1024,
            readahead_on_local: false,
            worker_threads: 0,
        }
    }
}

impl EngineConfig {
    /// Effective worker thread count.
    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}
