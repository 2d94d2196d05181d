//! Write-path glue: caller buffer bindings to writer input.

use crate::query::AttrBuffer;
use std::sync::Arc;
use tessera_core::{ArraySchema, Error, Result};
use tessera_storage::fragment::{AttrData, FragmentWriter, WriteInput};

/// Assemble a [`WriteInput`] from the query's bindings and hand it to the
/// fragment writer. Every schema attribute must be bound.
pub(crate) fn submit_to_writer(
    writer: &mut FragmentWriter,
    schema: &Arc<ArraySchema>,
    bindings: &[(usize, AttrBuffer)],
    coords: Option<&AttrBuffer>,
) -> Result<()> {
    let mut per_attr: Vec<Option<&AttrBuffer>> = vec![None; schema.attributes.len()];
    for (id, buffer) in bindings {
        per_attr[*id] = Some(buffer);
    }

    // Variable-length bindings carry offsets as u64 values; the writer
    // consumes them as a little-endian byte stream.
    let mut offset_bytes: Vec<Option<Vec<u8>>> = Vec::with_capacity(schema.attributes.len());
    for (id, attr) in schema.attributes.iter().enumerate() {
        let buffer = per_attr[id].ok_or_else(|| {
            Error::layout(format!("attribute `{}` has no buffer bound", attr.name))
        })?;
        if attr.cell_val_num.is_var() {
            let offsets = buffer.offsets.as_ref().ok_or_else(|| {
                Error::layout(format!(
                    "attribute `{}` is variable-length and needs an offsets buffer",
                    attr.name
                ))
            })?;
            let mut bytes = Vec::with_capacity(offsets.len() * 8);
            for &off in offsets {
                bytes.extend_from_slice(&off.to_le_bytes());
            }
            offset_bytes.push(Some(bytes));
        } else {
            offset_bytes.push(None);
        }
    }

    let mut attrs = Vec::with_capacity(schema.attributes.len());
    for (id, attr) in schema.attributes.iter().enumerate() {
        let buffer = per_attr[id].ok_or_else(|| {
            Error::layout(format!("attribute `{}` has no buffer bound", attr.name))
        })?;
        let (fixed, var): (&[u8], Option<&[u8]>) = if attr.cell_val_num.is_var() {
            (
                offset_bytes[id].as_deref().unwrap_or(&[]),
                Some(buffer.data.as_slice()),
            )
        } else {
            (buffer.data.as_slice(), None)
        };
        attrs.push(AttrData {
            fixed,
            var,
            validity: buffer.validity.as_deref(),
        });
    }

    let input = WriteInput {
        attrs,
        coords: coords.map(|c| c.data.as_slice()),
    };
    writer.submit(&input)
}
