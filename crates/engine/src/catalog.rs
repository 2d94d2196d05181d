//! Object catalog.
//!
//! Groups, arrays, and key-value stores are directories tagged by a
//! reserved sentinel file; everything else is invisible to the catalog.
//! The key-value surface itself is not part of this engine, but its
//! sentinel is recognized so mixed trees list and move correctly.

use crate::array::schema_file;
use crate::context::Context;
use tessera_core::constants::{GROUP_FILE, KV_FILE};
use tessera_core::{Error, Result};
use tessera_vfs::{uri_join, WalkOrder};
use tracing::debug;

/// What a URI holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    /// An array directory (`__array_schema.tdb` present).
    Array,
    /// A group directory (`__tiledb_group.tdb` present).
    Group,
    /// A key-value store directory (`__tiledb_kv.tdb` present).
    KeyValue,
    /// Anything else.
    Invalid,
}

impl ObjectType {
    /// Lowercase name for listings.
    pub fn name(self) -> &'static str {
        match self {
            ObjectType::Array => "array",
            ObjectType::Group => "group",
            ObjectType::KeyValue => "kv",
            ObjectType::Invalid => "invalid",
        }
    }
}

/// Determine the type of `uri` by its sentinel file.
pub fn object_type(ctx: &Context, uri: &str) -> ObjectType {
    let vfs = ctx.vfs();
    if !vfs.is_dir(uri) {
        return ObjectType::Invalid;
    }
    if vfs.is_file(&schema_file(uri)) {
        ObjectType::Array
    } else if vfs.is_file(&uri_join(uri, GROUP_FILE)) {
        ObjectType::Group
    } else if vfs.is_file(&uri_join(uri, KV_FILE)) {
        ObjectType::KeyValue
    } else {
        ObjectType::Invalid
    }
}

/// Create a group directory.
pub fn group_create(ctx: &Context, uri: &str) -> Result<()> {
    let vfs = ctx.vfs();
    if object_type(ctx, uri) != ObjectType::Invalid {
        return Err(Error::already_exists(format!("object at {uri}")));
    }
    vfs.mkdir(uri)?;
    vfs.touch(&uri_join(uri, GROUP_FILE))?;
    Ok(())
}

/// Move an object, optionally replacing a destination of the same type.
pub fn object_move(ctx: &Context, src: &str, dst: &str, overwrite: bool) -> Result<()> {
    let vfs = ctx.vfs();
    let src_type = object_type(ctx, src);
    if src_type == ObjectType::Invalid {
        return Err(Error::not_found(format!("no object at {src}")));
    }
    let dst_type = object_type(ctx, dst);
    if vfs.is_dir(dst) || vfs.is_file(dst) {
        if !overwrite {
            return Err(Error::already_exists(format!("destination {dst}")));
        }
        if dst_type != src_type {
            return Err(Error::not_supported(format!(
                "cannot replace a {} with a {}",
                dst_type.name(),
                src_type.name()
            )));
        }
        vfs.remove_dir(dst)?;
    }
    debug!(src, dst, "moving object");
    vfs.rename(src, dst)
}

/// Remove an object; refuses paths the catalog does not recognize.
pub fn object_remove(ctx: &Context, uri: &str) -> Result<()> {
    match object_type(ctx, uri) {
        ObjectType::Invalid => Err(Error::not_supported(format!(
            "{uri} is not an array, group, or key-value store"
        ))),
        _ => {
            debug!(uri, "removing object");
            ctx.vfs().remove_dir(uri)
        }
    }
}

/// Typed immediate children of `uri`.
pub fn object_ls(ctx: &Context, uri: &str) -> Result<Vec<(String, ObjectType)>> {
    let mut out = Vec::new();
    for child in ctx.vfs().ls(uri)? {
        if !ctx.vfs().is_dir(&child) {
            continue;
        }
        let t = object_type(ctx, &child);
        if t != ObjectType::Invalid {
            out.push((child, t));
        }
    }
    Ok(out)
}

/// Every typed object under `uri`, in pre- or post-order.
pub fn object_walk(
    ctx: &Context,
    uri: &str,
    order: WalkOrder,
) -> Result<Vec<(String, ObjectType)>> {
    let mut out = Vec::new();
    for dir in ctx.vfs().walk(uri, order)? {
        let t = object_type(ctx, &dir);
        if t != ObjectType::Invalid {
            out.push((dir, t));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Array;
    use tessera_core::{
        ArraySchema, ArrayType, Attribute, Datatype, Dimension, Domain, Layout,
    };

    fn ctx() -> Context {
        Context::new().unwrap()
    }

    fn schema() -> ArraySchema {
        ArraySchema::new(
            ArrayType::Sparse,
            Layout::RowMajor,
            Layout::RowMajor,
            4,
            Domain::new(Datatype::Int32, vec![Dimension::new("d", 0, 9, 5)]),
            vec![Attribute::new("a", Datatype::Int32)],
        )
        .unwrap()
    }

    #[test]
    fn type_detection() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let ctx = ctx();

        let group = format!("{root}/g");
        group_create(&ctx, &group).unwrap();
        assert_eq!(object_type(&ctx, &group), ObjectType::Group);

        let array = format!("{root}/g/arr");
        Array::create(&ctx, &array, &schema()).unwrap();
        assert_eq!(object_type(&ctx, &array), ObjectType::Array);

        assert_eq!(object_type(&ctx, &root), ObjectType::Invalid);
        assert_eq!(object_type(&ctx, "/nonexistent"), ObjectType::Invalid);
    }

    #[test]
    fn ls_and_walk() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let ctx = ctx();

        group_create(&ctx, &format!("{root}/g")).unwrap();
        group_create(&ctx, &format!("{root}/g/inner")).unwrap();
        Array::create(&ctx, &format!("{root}/g/inner/arr"), &schema()).unwrap();
        ctx.vfs().mkdir(&format!("{root}/plain")).unwrap();

        let children = object_ls(&ctx, &root).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].1, ObjectType::Group);

        let pre = object_walk(&ctx, &root, WalkOrder::Preorder).unwrap();
        let types: Vec<ObjectType> = pre.iter().map(|(_, t)| *t).collect();
        assert_eq!(
            types,
            vec![ObjectType::Group, ObjectType::Group, ObjectType::Array]
        );

        let post = object_walk(&ctx, &root, WalkOrder::Postorder).unwrap();
        let types: Vec<ObjectType> = post.iter().map(|(_, t)| *t).collect();
        assert_eq!(
            types,
            vec![ObjectType::Array, ObjectType::Group, ObjectType::Group]
        );
    }

    #[test]
    fn move_and_remove() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let ctx = ctx();

        let a = format!("{root}/a");
        let b = format!("{root}/b");
        group_create(&ctx, &a).unwrap();
        object_move(&ctx, &a, &b, false).unwrap();
        assert_eq!(object_type(&ctx, &a), ObjectType::Invalid);
        assert_eq!(object_type(&ctx, &b), ObjectType::Group);

        // Destination exists: refused without overwrite.
        group_create(&ctx, &a).unwrap();
        assert!(object_move(&ctx, &a, &b, false).is_err());
        object_move(&ctx, &a, &b, true).unwrap();

        // Removing an untyped directory is refused.
        let plain = format!("{root}/plain");
        ctx.vfs().mkdir(&plain).unwrap();
        assert!(object_remove(&ctx, &plain).is_err());
        object_remove(&ctx, &b).unwrap();
        assert!(!ctx.vfs().is_dir(&b));
    }

    #[test]
    fn mismatched_overwrite_refused() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let ctx = ctx();

        let g = format!("{root}/g");
        let arr = format!("{root}/arr");
        group_create(&ctx, &g).unwrap();
        Array::create(&ctx, &arr, &schema()).unwrap();
        let err = object_move(&ctx, &g, &arr, true).unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }
}
