//! Array handles.
//!
//! Opening an array loads its schema and the book-keeping of every
//! finalized fragment, and holds a shared lock on `__lock.tdb` for the
//! session so consolidation cannot delete fragments out from under it.
//! Fragments that fail their CRC or lack the sentinel are skipped with a
//! warning; [`Array::cleanup`] removes them.

use crate::context::Context;
use std::sync::Arc;
use tessera_core::constants::{ARRAY_SCHEMA_FILE, LOCK_FILE};
use tessera_core::{ArraySchema, Error, GlobalOrder, Mbr, Result, Subarray};
use tessera_storage::fragment::{self, FragmentMetadata, FragmentReader};
use tessera_vfs::{uri_join, LockGuard};
use tracing::warn;

/// What a query is allowed to do with an open array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Range-restricted reads.
    Read,
    /// Fragment-producing writes.
    Write,
}

/// An open array: schema plus the finalized fragments, ascending by
/// timestamp.
pub struct Array {
    uri: String,
    mode: QueryMode,
    schema: Arc<ArraySchema>,
    order: GlobalOrder,
    fragments: Vec<Arc<FragmentReader>>,
    _lock: LockGuard,
}

/// Path of the array's schema file.
pub fn schema_file(uri: &str) -> String {
    uri_join(uri, ARRAY_SCHEMA_FILE)
}

/// Path of the array's lock file.
pub fn lock_file(uri: &str) -> String {
    uri_join(uri, LOCK_FILE)
}

/// Whether `uri` holds an array.
pub fn is_array(ctx: &Context, uri: &str) -> bool {
    ctx.vfs().is_file(&schema_file(uri))
}

impl Array {
    /// Create a new array at `uri` with the given schema.
    pub fn create(ctx: &Context, uri: &str, schema: &ArraySchema) -> Result<()> {
        schema.validate()?;
        let vfs = ctx.vfs();
        if is_array(ctx, uri) {
            return Err(Error::already_exists(format!("array at {uri}")));
        }
        vfs.mkdir(uri)?;
        vfs.publish_file(&schema_file(uri), &schema.to_bytes())?;
        vfs.touch(&lock_file(uri))?;
        Ok(())
    }

    /// Open an array for reading or writing.
    pub fn open(ctx: &Context, uri: &str, mode: QueryMode) -> Result<Array> {
        let vfs = ctx.vfs();
        if !is_array(ctx, uri) {
            return Err(Error::not_found(format!("no array at {uri}")));
        }
        // Readers and writers both take the shared lock; only fragment
        // deletion takes the exclusive one.
        let lock_path = lock_file(uri);
        if !vfs.is_file(&lock_path) {
            vfs.touch(&lock_path)?;
        }
        let lock = vfs.lock_shared(&lock_path)?;

        let schema_bytes = vfs.read_file(&schema_file(uri))?;
        let schema = Arc::new(ArraySchema::from_bytes(&schema_bytes)?);
        let order = GlobalOrder::new(&schema)?;

        let mut fragments = Vec::new();
        for (id, frag_uri) in fragment::list_fragment_dirs(vfs, uri)? {
            if !fragment::is_finalized(vfs, &frag_uri) {
                warn!(fragment = %frag_uri, "skipping unfinalized fragment");
                continue;
            }
            match FragmentMetadata::load(vfs, &schema, &frag_uri) {
                Ok(meta) => {
                    fragments.push(Arc::new(FragmentReader::new(
                        Arc::clone(&schema),
                        Arc::new(meta),
                        id,
                        frag_uri,
                        &order,
                    )));
                }
                Err(e) if e.is_corruption() => {
                    warn!(fragment = %frag_uri, error = %e, "skipping corrupt fragment");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Array {
            uri: uri.to_string(),
            mode,
            schema,
            order,
            fragments,
            _lock: lock,
        })
    }

    /// Re-scan fragments (picks up writes finalized since open).
    pub fn reopen(self, ctx: &Context) -> Result<Array> {
        let mode = self.mode;
        let uri = self.uri.clone();
        drop(self);
        Array::open(ctx, &uri, mode)
    }

    /// The array URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The mode this handle was opened with.
    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    /// The schema.
    pub fn schema(&self) -> &Arc<ArraySchema> {
        &self.schema
    }

    /// The array's global order.
    pub fn order(&self) -> &GlobalOrder {
        &self.order
    }

    /// Finalized fragments, ascending by timestamp.
    pub fn fragments(&self) -> &[Arc<FragmentReader>] {
        &self.fragments
    }

    /// Union of the fragments' non-empty domains; `None` when nothing has
    /// been written.
    pub fn non_empty_domain(&self) -> Option<Subarray> {
        let dt = self.schema.coord_type();
        let mut bounds = Mbr::empty(self.schema.domain.dim_count());
        for frag in &self.fragments {
            bounds.expand_rect(dt, frag.non_empty_domain());
        }
        bounds.rect()
    }

    /// Remove unfinalized or corrupt fragment directories.
    ///
    /// Recovery operation: callers must ensure no writer is currently
    /// producing a fragment in this array.
    pub fn cleanup(ctx: &Context, uri: &str) -> Result<Vec<String>> {
        let vfs = ctx.vfs();
        if !is_array(ctx, uri) {
            return Err(Error::not_found(format!("no array at {uri}")));
        }
        let schema_bytes = vfs.read_file(&schema_file(uri))?;
        let schema = ArraySchema::from_bytes(&schema_bytes)?;
        let mut removed = Vec::new();
        for (_, frag_uri) in fragment::list_fragment_dirs(vfs, uri)? {
            let broken = if !fragment::is_finalized(vfs, &frag_uri) {
                true
            } else {
                match FragmentMetadata::load(vfs, &schema, &frag_uri) {
                    Ok(_) => false,
                    Err(e) if e.is_corruption() => true,
                    Err(e) => return Err(e),
                }
            };
            if broken {
                warn!(fragment = %frag_uri, "removing incomplete fragment");
                vfs.remove_dir(&frag_uri)?;
                removed.push(frag_uri);
            }
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for Array {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Array")
            .field("uri", &self.uri)
            .field("mode", &self.mode)
            .field("fragments", &self.fragments.len())
            .finish()
    }
}
