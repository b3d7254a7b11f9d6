//! Bounds-checked byte window over ROM-extracted sequence data
//!
//! Sequence data is addressed by the *virtual* offset it occupied in the
//! original binary, not by a zero-based index, so that loop targets and
//! track pointers read from the stream can be used directly. All reads are
//! side-effect-free; decoders never write through the window.

use crate::{Result, SeqError};

/// Byte order for fixed-width reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Least significant byte first
    Little,
    /// Most significant byte first
    Big,
}

/// A bounds-checked view over an immutable byte buffer, addressed by
/// absolute virtual offsets.
///
/// The valid range is `[start, start + len)`. Reads outside it fail with
/// [`SeqError::OutOfRange`]; they never panic.
#[derive(Debug, Clone)]
pub struct ByteWindow {
    data: Vec<u8>,
    start: u32,
}

impl ByteWindow {
    /// Load a buffer whose first byte sits at `virtual_start` in the
    /// original binary.
    pub fn load(buffer: Vec<u8>, virtual_start: u32) -> Self {
        Self {
            data: buffer,
            start: virtual_start,
        }
    }

    /// Load from a borrowed slice (copies the bytes).
    pub fn from_slice(bytes: &[u8], virtual_start: u32) -> Self {
        Self::load(bytes.to_vec(), virtual_start)
    }

    /// First valid virtual offset.
    #[inline]
    pub fn start(&self) -> u32 {
        self.start
    }

    /// One past the last valid virtual offset.
    #[inline]
    pub fn end(&self) -> u32 {
        self.start + self.data.len() as u32
    }

    /// Window size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the window holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether `offset` falls inside the valid window.
    #[inline]
    pub fn is_valid_offset(&self, offset: u32) -> bool {
        offset >= self.start && offset < self.end()
    }

    /// Translate a virtual offset into a buffer index, checking that
    /// `needed` bytes are available from it.
    fn index(&self, offset: u32, needed: u32) -> Result<usize> {
        if offset < self.start || offset as u64 + needed as u64 > self.end() as u64 {
            return Err(SeqError::OutOfRange {
                offset,
                needed,
                start: self.start,
                end: self.end(),
            });
        }
        Ok((offset - self.start) as usize)
    }

    /// Read one byte at `offset`.
    pub fn get_u8(&self, offset: u32) -> Result<u8> {
        let i = self.index(offset, 1)?;
        Ok(self.data[i])
    }

    /// Read one byte at `offset` as a signed value.
    pub fn get_i8(&self, offset: u32) -> Result<i8> {
        Ok(self.get_u8(offset)? as i8)
    }

    /// Read a 16-bit value at `offset`.
    pub fn get_u16(&self, offset: u32, endian: Endian) -> Result<u16> {
        let i = self.index(offset, 2)?;
        let b = [self.data[i], self.data[i + 1]];
        Ok(match endian {
            Endian::Little => u16::from_le_bytes(b),
            Endian::Big => u16::from_be_bytes(b),
        })
    }

    /// Read a 16-bit signed value at `offset`.
    pub fn get_i16(&self, offset: u32, endian: Endian) -> Result<i16> {
        Ok(self.get_u16(offset, endian)? as i16)
    }

    /// Read a 32-bit value at `offset`.
    pub fn get_u32(&self, offset: u32, endian: Endian) -> Result<u32> {
        let i = self.index(offset, 4)?;
        let b = [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ];
        Ok(match endian {
            Endian::Little => u32::from_le_bytes(b),
            Endian::Big => u32::from_be_bytes(b),
        })
    }

    /// Borrow `len` bytes starting at `offset`.
    pub fn slice(&self, offset: u32, len: u32) -> Result<&[u8]> {
        let i = self.index(offset, len)?;
        Ok(&self.data[i..i + len as usize])
    }

    /// Slide the valid window to begin at `new_start`, preserving bytes at
    /// virtual offsets covered by both the old and the new range
    /// (shift-copy semantics). Offsets only covered by the new range read
    /// as zero afterwards.
    pub fn reposition(&mut self, new_start: u32) {
        if new_start == self.start {
            return;
        }
        let len = self.data.len();
        let mut moved = vec![0u8; len];
        let old_start = self.start as i64;
        let shift = new_start as i64 - old_start;
        for (i, slot) in moved.iter_mut().enumerate() {
            let old_index = i as i64 + shift;
            if old_index >= 0 && (old_index as usize) < len {
                *slot = self.data[old_index as usize];
            }
        }
        self.data = moved;
        self.start = new_start;
    }
}
