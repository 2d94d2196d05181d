//! The engine context.
//!
//! Every operation takes a context value; there is no process-wide state.
//! The context owns the configuration, the VFS, and the worker pool used
//! for async query submission and parallel tile work.

use rayon::ThreadPool;
use std::sync::Arc;
use tessera_core::{EngineConfig, Error, Result};
use tessera_vfs::Vfs;

/// Explicit state for one engine instance.
#[derive(Clone)]
pub struct Context {
    config: EngineConfig,
    vfs: Arc<Vfs>,
    pool: Arc<ThreadPool>,
}

impl Context {
    /// Context with default configuration over the local filesystem.
    pub fn new() -> Result<Context> {
        Context::with_config(EngineConfig::default())
    }

    /// Context with explicit configuration over the local filesystem.
    pub fn with_config(config: EngineConfig) -> Result<Context> {
        let vfs = Arc::new(Vfs::posix(&config));
        Context::with_vfs(config, vfs)
    }

    /// Context over an arbitrary VFS.
    pub fn with_vfs(config: EngineConfig, vfs: Arc<Vfs>) -> Result<Context> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.effective_worker_threads())
            .thread_name(|i| format!("tessera-worker-{i}"))
            .build()
            .map_err(|e| Error::internal(format!("worker pool: {e}")))?;
        Ok(Context {
            config,
            vfs,
            pool: Arc::new(pool),
        })
    }

    /// The configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The VFS.
    pub fn vfs(&self) -> &Arc<Vfs> {
        &self.vfs
    }

    /// The worker pool.
    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("vfs", &self.vfs)
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_context() {
        let ctx = Context::new().unwrap();
        assert!(ctx.pool().current_num_threads() >= 1);
        assert_eq!(ctx.config().sort_buffer_size, 10 * 1024 * 1024);
    }

    #[test]
    fn contexts_are_independent() {
        let a = Context::new().unwrap();
        let mut config = EngineConfig::default();
        config.worker_threads = 1;
        let b = Context::with_config(config).unwrap();
        assert_eq!(b.pool().current_num_threads(), 1);
        assert!(!Arc::ptr_eq(a.vfs(), b.vfs()));
    }
}
