//! Tile codecs.
//!
//! Codecs operate on a single decompressed tile payload at a time; they
//! own no files and carry no state. The codec identity comes from the
//! attribute's schema entry, so tile blobs need no in-band headers. Every
//! variant can decompress without knowing the decoded size up front, which
//! is what lets the last, partial tile of a fragment round-trip.

mod double_delta;
mod entropy;
mod rle;
mod shuffle;

use tessera_core::{Compressor, Datatype};
use thiserror::Error;

/// Result alias for codec operations.
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Codec failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The input violates the codec's preconditions.
    #[error("invalid codec input: {0}")]
    InvalidInput(String),

    /// The compressed stream is corrupt.
    #[error("corrupt compressed data: {0}")]
    Corrupt(String),

    /// The underlying compression library failed.
    #[error("compression backend error: {0}")]
    Backend(String),
}

impl From<CodecError> for tessera_core::Error {
    fn from(e: CodecError) -> tessera_core::Error {
        tessera_core::Error::Compression(e.to_string())
    }
}

/// Pure upper bound on the compressed size of `input_len` bytes of
/// `type_size`-byte values.
pub fn compress_bound(compressor: Compressor, input_len: usize, type_size: usize) -> usize {
    match compressor {
        Compressor::None => input_len,
        Compressor::Rle => {
            let n = input_len / type_size.max(1);
            2 * n * (type_size + 8)
        }
        Compressor::DoubleDelta => {
            let n = input_len / type_size.max(1);
            24 + 10 * n
        }
        Compressor::Gzip => input_len + (input_len >> 9) + 128,
        Compressor::Zstd => input_len + (input_len >> 8) + 512,
        Compressor::Lz4 => lz4_flex::block::get_maximum_output_size(input_len) + 4,
        Compressor::Bzip2 => input_len + input_len / 100 + 600,
        Compressor::ShuffleGzip | Compressor::ShuffleZstd | Compressor::ShuffleLz4 => {
            let inner = compressor
                .shuffle_inner()
                .unwrap_or(Compressor::None);
            compress_bound(inner, input_len, type_size)
        }
    }
}

/// Compress a tile payload of `datatype` values.
///
/// `level` of `-1` selects the codec's default.
pub fn compress(
    compressor: Compressor,
    level: i32,
    datatype: Datatype,
    input: &[u8],
) -> CodecResult<Vec<u8>> {
    let type_size = datatype.size();
    match compressor {
        Compressor::None => Ok(input.to_vec()),
        Compressor::Rle => rle::compress(input, type_size),
        Compressor::DoubleDelta => double_delta::compress(datatype, input),
        Compressor::Gzip => entropy::gzip_compress(level, input),
        Compressor::Zstd => entropy::zstd_compress(level, input),
        Compressor::Lz4 => entropy::lz4_compress(input),
        Compressor::Bzip2 => entropy::bzip2_compress(level, input),
        Compressor::ShuffleGzip | Compressor::ShuffleZstd | Compressor::ShuffleLz4 => {
            let shuffled = shuffle::shuffle(input, type_size)?;
            let inner = compressor
                .shuffle_inner()
                .ok_or_else(|| CodecError::InvalidInput("shuffle without inner codec".into()))?;
            compress(inner, level, datatype, &shuffled)
        }
    }
}

/// Decompress a tile payload of `datatype` values.
pub fn decompress(
    compressor: Compressor,
    datatype: Datatype,
    input: &[u8],
) -> CodecResult<Vec<u8>> {
    let type_size = datatype.size();
    match compressor {
        Compressor::None => Ok(input.to_vec()),
        Compressor::Rle => rle::decompress(input, type_size),
        Compressor::DoubleDelta => double_delta::decompress(datatype, input),
        Compressor::Gzip => entropy::gzip_decompress(input),
        Compressor::Zstd => entropy::zstd_decompress(input),
        Compressor::Lz4 => entropy::lz4_decompress(input),
        Compressor::Bzip2 => entropy::bzip2_decompress(input),
        Compressor::ShuffleGzip | Compressor::ShuffleZstd | Compressor::ShuffleLz4 => {
            let inner = compressor
                .shuffle_inner()
                .ok_or_else(|| CodecError::InvalidInput("shuffle without inner codec".into()))?;
            let shuffled = decompress(inner, datatype, input)?;
            shuffle::unshuffle(&shuffled, type_size)
        }
    }
}
