//! Generic entropy coder wrappers.
//!
//! Thin, level-configurable wrappers over zstd, gzip, bzip2 and LZ4.
//! Library failures surface as [`CodecError::Backend`] or
//! [`CodecError::Corrupt`]; nothing panics on bad input.

use super::{CodecError, CodecResult};
use std::io::{Read, Write};

/// zstd. Level `-1` maps to the library default.
pub fn zstd_compress(level: i32, input: &[u8]) -> CodecResult<Vec<u8>> {
    let level = if level < 0 { 0 } else { level };
    zstd::stream::encode_all(input, level)
        .map_err(|e| CodecError::Backend(format!("zstd encode: {e}")))
}

/// zstd inverse.
pub fn zstd_decompress(input: &[u8]) -> CodecResult<Vec<u8>> {
    zstd::stream::decode_all(input)
        .map_err(|e| CodecError::Corrupt(format!("zstd decode: {e}")))
}

/// gzip (DEFLATE with gzip framing). Level `-1` maps to 6.
pub fn gzip_compress(level: i32, input: &[u8]) -> CodecResult<Vec<u8>> {
    let level = if (0..=9).contains(&level) {
        level as u32
    } else {
        6
    };
    let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(level));
    encoder
        .write_all(input)
        .and_then(|_| encoder.finish())
        .map_err(|e| CodecError::Backend(format!("gzip encode: {e}")))
}

/// gzip inverse.
pub fn gzip_decompress(input: &[u8]) -> CodecResult<Vec<u8>> {
    let mut decoder = flate2::read::GzDecoder::new(input);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Corrupt(format!("gzip decode: {e}")))?;
    Ok(out)
}

/// bzip2. Level `-1` maps to 6.
pub fn bzip2_compress(level: i32, input: &[u8]) -> CodecResult<Vec<u8>> {
    let level = if (1..=9).contains(&level) {
        level as u32
    } else {
        6
    };
    let mut encoder =
        bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::new(level));
    encoder
        .write_all(input)
        .and_then(|_| encoder.finish())
        .map_err(|e| CodecError::Backend(format!("bzip2 encode: {e}")))
}

/// bzip2 inverse.
pub fn bzip2_decompress(input: &[u8]) -> CodecResult<Vec<u8>> {
    let mut decoder = bzip2::read::BzDecoder::new(input);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Corrupt(format!("bzip2 decode: {e}")))?;
    Ok(out)
}

/// LZ4 block format with a length prefix; no levels.
pub fn lz4_compress(input: &[u8]) -> CodecResult<Vec<u8>> {
    Ok(lz4_flex::block::compress_prepend_size(input))
}

/// LZ4 inverse.
pub fn lz4_decompress(input: &[u8]) -> CodecResult<Vec<u8>> {
    lz4_flex::block::decompress_size_prepended(input)
        .map_err(|e| CodecError::Corrupt(format!("lz4 decode: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"the quick brown fox jumps over the lazy dog, twice over";

    #[test]
    fn zstd_levels() {
        for level in [-1, 1, 9] {
            let packed = zstd_compress(level, SAMPLE).unwrap();
            assert_eq!(zstd_decompress(&packed).unwrap(), SAMPLE);
        }
    }

    #[test]
    fn gzip_round_trip() {
        let packed = gzip_compress(-1, SAMPLE).unwrap();
        assert_eq!(gzip_decompress(&packed).unwrap(), SAMPLE);
    }

    #[test]
    fn bzip2_round_trip() {
        let packed = bzip2_compress(9, SAMPLE).unwrap();
        assert_eq!(bzip2_decompress(&packed).unwrap(), SAMPLE);
    }

    #[test]
    fn lz4_round_trip() {
        let packed = lz4_compress(SAMPLE).unwrap();
        assert_eq!(lz4_decompress(&packed).unwrap(), SAMPLE);
    }

    #[test]
    fn garbage_rejected() {
        let garbage = [0xde, 0xad, 0xbe, 0xef, 0x00];
        assert!(gzip_decompress(&garbage).is_err());
        assert!(zstd_decompress(&garbage).is_err());
        assert!(bzip2_decompress(&garbage).is_err());
    }
}
