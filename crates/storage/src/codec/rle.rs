//! Run-length encoding of fixed-width values.
//!
//! The stream is a sequence of `(run_length: u64 LE, value: type_size
//! bytes)` pairs. Runs never exceed the input, so decoding is bounded by
//! construction.

use super::{CodecError, CodecResult};
use byteorder::{ByteOrder, LittleEndian};

/// Encode `input` as runs of `type_size`-byte values.
pub fn compress(input: &[u8], type_size: usize) -> CodecResult<Vec<u8>> {
    if type_size == 0 {
        return Err(CodecError::InvalidInput("zero value size".into()));
    }
    if input.len() % type_size != 0 {
        return Err(CodecError::InvalidInput(format!(
            "input of {} bytes is not a multiple of the {type_size}-byte value",
            input.len()
        )));
    }
    let mut out = Vec::new();
    let mut values = input.chunks_exact(type_size);
    let mut current: &[u8] = match values.next() {
        Some(v) => v,
        None => return Ok(out),
    };
    let mut run: u64 = 1;
    let mut len_buf = [0u8; 8];
    for value in values {
        if value == current {
            run += 1;
        } else {
            LittleEndian::write_u64(&mut len_buf, run);
            out.extend_from_slice(&len_buf);
            out.extend_from_slice(current);
            current = value;
            run = 1;
        }
    }
    LittleEndian::write_u64(&mut len_buf, run);
    out.extend_from_slice(&len_buf);
    out.extend_from_slice(current);
    Ok(out)
}

/// Decode a run stream back into flat values.
pub fn decompress(input: &[u8], type_size: usize) -> CodecResult<Vec<u8>> {
    if type_size == 0 {
        return Err(CodecError::InvalidInput("zero value size".into()));
    }
    let pair = 8 + type_size;
    if input.len() % pair != 0 {
        return Err(CodecError::Corrupt(format!(
            "run stream of {} bytes is not a multiple of the {pair}-byte pair",
            input.len()
        )));
    }
    let mut out = Vec::new();
    for chunk in input.chunks_exact(pair) {
        let run = LittleEndian::read_u64(&chunk[..8]);
        let value = &chunk[8..];
        let add = (run as usize).checked_mul(type_size).ok_or_else(|| {
            CodecError::Corrupt(format!("run length {run} overflows the payload"))
        })?;
        out.reserve(add);
        for _ in 0..run {
            out.extend_from_slice(value);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_collapse() {
        let input: Vec<u8> = [5i32, 5, 5, 5, 9, 9, 1]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let packed = compress(&input, 4).unwrap();
        // Three runs of (8 + 4) bytes each.
        assert_eq!(packed.len(), 3 * 12);
        assert_eq!(decompress(&packed, 4).unwrap(), input);
    }

    #[test]
    fn worst_case_alternating() {
        let input: Vec<u8> = (0..100u8).collect();
        let packed = compress(&input, 1).unwrap();
        assert_eq!(packed.len(), 100 * 9);
        assert_eq!(decompress(&packed, 1).unwrap(), input);
    }

    #[test]
    fn misaligned_input_rejected() {
        assert!(compress(&[1, 2, 3], 2).is_err());
        assert!(decompress(&[0u8; 11], 2).is_err());
    }
}
