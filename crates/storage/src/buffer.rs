//! Byte buffers with explicit cursors.
//!
//! [`Buffer`] is the growable write-side region tiles accumulate into;
//! [`ConstBuffer`] is a borrowed read cursor used when draining caller
//! input and reassembling results. `read_with_shift` rebases 64-bit
//! offsets of variable-length data while copying.

use byteorder::{ByteOrder, LittleEndian};
use tessera_core::{Error, Result};

/// Growable byte region with an explicit write cursor.
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    /// An empty buffer.
    pub fn new() -> Buffer {
        Buffer { data: Vec::new() }
    }

    /// An empty buffer with reserved capacity.
    pub fn with_capacity(capacity: usize) -> Buffer {
        Buffer {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Wrap existing bytes.
    pub fn from_vec(data: Vec<u8>) -> Buffer {
        Buffer { data }
    }

    /// Bytes written so far.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Allocated capacity.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// The write cursor; appends land here.
    pub fn offset(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append raw bytes at the cursor.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Append one little-endian `u64`.
    pub fn write_u64(&mut self, v: u64) {
        let mut b = [0u8; 8];
        LittleEndian::write_u64(&mut b, v);
        self.data.extend_from_slice(&b);
    }

    /// Discard contents, keeping capacity.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Contents as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Take the contents.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

/// Borrowed read cursor.
#[derive(Debug, Clone)]
pub struct ConstBuffer<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ConstBuffer<'a> {
    /// Wrap a byte slice.
    pub fn new(data: &'a [u8]) -> ConstBuffer<'a> {
        ConstBuffer { data, offset: 0 }
    }

    /// Current cursor position.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Whether the cursor reached the end.
    pub fn end(&self) -> bool {
        self.remaining() == 0
    }

    /// Read `n` bytes, advancing the cursor.
    pub fn read(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::format(format!(
                "buffer underrun: need {n} bytes, have {}",
                self.remaining()
            )));
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    /// Read one little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.read(4)?))
    }

    /// Read one little-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.read(8)?))
    }

    /// Read `n` bytes of 64-bit words, adding `shift` to each word while
    /// appending to `out`. `n` must be a multiple of 8.
    pub fn read_with_shift(&mut self, n: usize, shift: u64, out: &mut Buffer) -> Result<()> {
        if n % 8 != 0 {
            return Err(Error::internal(format!(
                "shifted read of {n} bytes is not u64-aligned"
            )));
        }
        let src = self.read(n)?;
        for chunk in src.chunks_exact(8) {
            out.write_u64(LittleEndian::read_u64(chunk).wrapping_add(shift));
        }
        Ok(())
    }

    /// Skip `n` bytes.
    pub fn advance(&mut self, n: usize) -> Result<()> {
        self.read(n).map(|_| ())
    }
}
