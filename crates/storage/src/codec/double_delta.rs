//! Second-order delta coding for integer tiles.
//!
//! # Wire format (versioned with the fragment format)
//!
//! ```text
//! +---------------------------+
//! | value count      u64 LE   |
//! | first value      u64 LE   |  (if count >= 1)
//! | second value     u64 LE   |  (if count >= 2)
//! | count-2 deltas-of-deltas, |
//! |   zig-zag + LEB128        |
//! +---------------------------+
//! ```
//!
//! Values are zero-extended to `u64`; deltas use wrapping arithmetic, so
//! signedness never matters for the round trip. Non-integer payloads are
//! refused.

use super::{CodecError, CodecResult};
use byteorder::{ByteOrder, LittleEndian};
use tessera_core::Datatype;

fn read_value(bytes: &[u8], type_size: usize) -> u64 {
    let mut widened = [0u8; 8];
    widened[..type_size].copy_from_slice(bytes);
    u64::from_le_bytes(widened)
}

fn write_value(out: &mut Vec<u8>, v: u64, type_size: usize) {
    out.extend_from_slice(&v.to_le_bytes()[..type_size]);
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

fn write_varint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(input: &[u8], pos: &mut usize) -> CodecResult<u64> {
    let mut v = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *input
            .get(*pos)
            .ok_or_else(|| CodecError::Corrupt("truncated varint".into()))?;
        *pos += 1;
        if shift >= 64 {
            return Err(CodecError::Corrupt("varint exceeds 64 bits".into()));
        }
        v |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(v);
        }
        shift += 7;
    }
}

fn require_integer(datatype: Datatype) -> CodecResult<usize> {
    if !datatype.is_integer() {
        return Err(CodecError::InvalidInput(format!(
            "double-delta does not apply to {} payloads",
            datatype.name()
        )));
    }
    Ok(datatype.size())
}

/// Encode an integer payload.
pub fn compress(datatype: Datatype, input: &[u8]) -> CodecResult<Vec<u8>> {
    let type_size = require_integer(datatype)?;
    if input.len() % type_size != 0 {
        return Err(CodecError::InvalidInput(format!(
            "input of {} bytes is not a multiple of the {type_size}-byte value",
            input.len()
        )));
    }
    let count = (input.len() / type_size) as u64;
    let mut out = Vec::with_capacity(24 + input.len() / 2);
    let mut header = [0u8; 8];
    LittleEndian::write_u64(&mut header, count);
    out.extend_from_slice(&header);

    let mut values = input.chunks_exact(type_size).map(|c| read_value(c, type_size));
    let first = match values.next() {
        Some(v) => v,
        None => return Ok(out),
    };
    LittleEndian::write_u64(&mut header, first);
    out.extend_from_slice(&header);

    let second = match values.next() {
        Some(v) => v,
        None => return Ok(out),
    };
    LittleEndian::write_u64(&mut header, second);
    out.extend_from_slice(&header);

    let mut prev = second;
    let mut prev_delta = second.wrapping_sub(first);
    for v in values {
        let delta = v.wrapping_sub(prev);
        let dd = delta.wrapping_sub(prev_delta);
        write_varint(&mut out, zigzag(dd as i64));
        prev = v;
        prev_delta = delta;
    }
    Ok(out)
}

/// Decode an integer payload.
pub fn decompress(datatype: Datatype, input: &[u8]) -> CodecResult<Vec<u8>> {
    let type_size = require_integer(datatype)?;
    if input.len() < 8 {
        return Err(CodecError::Corrupt("double-delta stream too short".into()));
    }
    let count = LittleEndian::read_u64(&input[..8]);
    let mut out = Vec::with_capacity(count as usize * type_size);
    if count == 0 {
        return Ok(out);
    }
    if input.len() < 16 {
        return Err(CodecError::Corrupt("missing first value".into()));
    }
    let first = LittleEndian::read_u64(&input[8..16]);
    write_value(&mut out, first, type_size);
    if count == 1 {
        return Ok(out);
    }
    if input.len() < 24 {
        return Err(CodecError::Corrupt("missing second value".into()));
    }
    let second = LittleEndian::read_u64(&input[16..24]);
    write_value(&mut out, second, type_size);

    let mut pos = 24usize;
    let mut prev = second;
    let mut prev_delta = second.wrapping_sub(first);
    for _ in 2..count {
        let dd = unzigzag(read_varint(input, &mut pos)?) as u64;
        let delta = prev_delta.wrapping_add(dd);
        let v = prev.wrapping_add(delta);
        write_value(&mut out, v, type_size);
        prev = v;
        prev_delta = delta;
    }
    if pos != input.len() {
        return Err(CodecError::Corrupt("trailing bytes after last delta".into()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_trip(datatype: Datatype, input: &[u8]) {
        let packed = compress(datatype, input).unwrap();
        assert_eq!(decompress(datatype, &packed).unwrap(), input);
    }

    #[test]
    fn arithmetic_sequences_pack_tightly() {
        let input: Vec<u8> = (0..1000i64).flat_map(|v| (v * 3).to_le_bytes()).collect();
        let packed = compress(Datatype::Int64, &input).unwrap();
        // Constant second derivative: one varint byte per value after the
        // two seeds.
        assert!(packed.len() < 24 + 1000);
        assert_eq!(decompress(Datatype::Int64, &packed).unwrap(), input);
    }

    #[test]
    fn short_payloads() {
        round_trip(Datatype::Int32, &[]);
        round_trip(Datatype::Int32, &42i32.to_le_bytes());
        let two: Vec<u8> = [7i32, -9].iter().flat_map(|v| v.to_le_bytes()).collect();
        round_trip(Datatype::Int32, &two);
    }

    #[test]
    fn negative_jumps() {
        let input: Vec<u8> = [i16::MIN, 0, i16::MAX, -1, 1]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        round_trip(Datatype::Int16, &input);
    }

    #[test]
    fn zigzag_inverse() {
        for v in [0i64, 1, -1, i64::MAX, i64::MIN, 123456, -987654] {
            assert_eq!(unzigzag(zigzag(v)), v);
        }
    }

    #[test]
    fn float_refused() {
        assert!(compress(Datatype::Float64, &[0u8; 8]).is_err());
    }

    #[test]
    fn truncated_stream_detected() {
        let input: Vec<u8> = (0..10u8).flat_map(|v| (v as u32).to_le_bytes()).collect();
        let packed = compress(Datatype::UInt32, &input).unwrap();
        assert!(decompress(Datatype::UInt32, &packed[..packed.len() - 1]).is_err());
    }

    proptest! {
        #[test]
        fn prop_round_trip_u8(values in proptest::collection::vec(any::<u8>(), 0..300)) {
            round_trip(Datatype::UInt8, &values);
        }

        #[test]
        fn prop_round_trip_i64(values in proptest::collection::vec(any::<i64>(), 0..128)) {
            let input: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            round_trip(Datatype::Int64, &input);
        }
    }
}
