//! Compressor identities carried by attribute schema entries.
//!
//! Only the *identity* lives here; the codec implementations are in the
//! storage layer. The byte-shuffle variants are flat enum members so the
//! schema entry stays a single `u8` tag.

use crate::error::{Error, Result};

/// Compressor applied to an attribute's tile payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compressor {
    /// Raw copy.
    None,
    /// DEFLATE via gzip framing.
    Gzip,
    /// Zstandard.
    Zstd,
    /// LZ4 block format.
    Lz4,
    /// Bzip2.
    Bzip2,
    /// Run-length encoding of fixed-width values.
    Rle,
    /// Second-order delta coding; integer payloads only.
    DoubleDelta,
    /// Byte shuffle, then gzip.
    ShuffleGzip,
    /// Byte shuffle, then zstd.
    ShuffleZstd,
    /// Byte shuffle, then LZ4.
    ShuffleLz4,
}

impl Compressor {
    /// All compressors, in tag order.
    pub const ALL: [Compressor; 10] = [
        Compressor::None,
        Compressor::Gzip,
        Compressor::Zstd,
        Compressor::Lz4,
        Compressor::Bzip2,
        Compressor::Rle,
        Compressor::DoubleDelta,
        Compressor::ShuffleGzip,
        Compressor::ShuffleZstd,
        Compressor::ShuffleLz4,
    ];

    /// Numeric tag used in on-disk formats.
    pub fn tag(self) -> u8 {
        Compressor::ALL
            .iter()
            .position(|c| *c == self)
            .unwrap_or(0) as u8
    }

    /// Inverse of [`Compressor::tag`].
    pub fn from_tag(tag: u8) -> Result<Compressor> {
        Compressor::ALL
            .get(tag as usize)
            .copied()
            .ok_or_else(|| Error::format(format!("unknown compressor tag {tag}")))
    }

    /// Lowercase name, as used in schema descriptions and the CLI.
    pub fn name(self) -> &'static str {
        match self {
            Compressor::None => "none",
            Compressor::Gzip => "gzip",
            Compressor::Zstd => "zstd",
            Compressor::Lz4 => "lz4",
            Compressor::Bzip2 => "bzip2",
            Compressor::Rle => "rle",
            Compressor::DoubleDelta => "double-delta",
            Compressor::ShuffleGzip => "shuffle-gzip",
            Compressor::ShuffleZstd => "shuffle-zstd",
            Compressor::ShuffleLz4 => "shuffle-lz4",
        }
    }

    /// Inverse of [`Compressor::name`].
    pub fn from_name(name: &str) -> Result<Compressor> {
        Compressor::ALL
            .iter()
            .copied()
            .find(|c| c.name() == name)
            .ok_or_else(|| Error::schema(format!("unknown compressor `{name}`")))
    }

    /// The inner entropy coder of a shuffle variant.
    pub fn shuffle_inner(self) -> Option<Compressor> {
        match self {
            Compressor::ShuffleGzip => Some(Compressor::Gzip),
            Compressor::ShuffleZstd => Some(Compressor::Zstd),
            Compressor::ShuffleLz4 => Some(Compressor::Lz4),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trip() {
        for c in Compressor::ALL {
            assert_eq!(Compressor::from_tag(c.tag()).unwrap(), c);
            assert_eq!(Compressor::from_name(c.name()).unwrap(), c);
        }
        assert!(Compressor::from_tag(200).is_err());
    }

    #[test]
    fn shuffle_inner_mapping() {
        assert_eq!(Compressor::ShuffleZstd.shuffle_inner(), Some(Compressor::Zstd));
        assert_eq!(Compressor::Rle.shuffle_inner(), None);
    }
}
