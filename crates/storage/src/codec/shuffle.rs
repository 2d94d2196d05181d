//! Byte shuffle for fixed-width values.
//!
//! Transposes an array of `type_size`-byte values so that all first bytes
//! come first, then all second bytes, and so on. Like-significance bytes
//! compress far better under a generic entropy coder. Both directions are
//! exact inverses given only the payload length and the value width.

use super::{CodecError, CodecResult};

fn check(input: &[u8], type_size: usize) -> CodecResult<usize> {
    if type_size == 0 {
        return Err(CodecError::InvalidInput("zero value size".into()));
    }
    if input.len() % type_size != 0 {
        return Err(CodecError::InvalidInput(format!(
            "input of {} bytes is not a multiple of the {type_size}-byte value",
            input.len()
        )));
    }
    Ok(input.len() / type_size)
}

/// Group bytes by significance position.
pub fn shuffle(input: &[u8], type_size: usize) -> CodecResult<Vec<u8>> {
    let count = check(input, type_size)?;
    let mut out = vec![0u8; input.len()];
    for (i, value) in input.chunks_exact(type_size).enumerate() {
        for (b, &byte) in value.iter().enumerate() {
            out[b * count + i] = byte;
        }
    }
    Ok(out)
}

/// Inverse of [`shuffle`].
pub fn unshuffle(input: &[u8], type_size: usize) -> CodecResult<Vec<u8>> {
    let count = check(input, type_size)?;
    let mut out = vec![0u8; input.len()];
    for i in 0..count {
        for b in 0..type_size {
            out[i * type_size + b] = input[b * count + i];
        }
    }
    Ok(out)
}
