//! Bounds-checked access to instance linear memory.

use wasm_embed_common::MemoryError;

/// Borrowed view of one linear memory.
///
/// The view borrows the instance, so it cannot be held across a call into
/// the guest (which may grow or move the memory).
#[derive(Debug, Clone, Copy)]
pub struct MemoryView<'a> {
    data: &'a [u8],
}

impl<'a> MemoryView<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Current size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the memory has no pages.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] if the range does not fit.
    pub fn read(&self, offset: usize, len: usize) -> Result<&'a [u8], MemoryError> {
        let range = checked_range(offset, len, self.data.len())?;
        Ok(&self.data[range])
    }

    /// The NUL-terminated string starting at `offset`, without the
    /// terminator. Invalid UTF-8 is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if `offset` is out of bounds or no terminator
    /// follows it.
    pub fn read_c_str(&self, offset: usize) -> Result<String, MemoryError> {
        let tail = self
            .data
            .get(offset..)
            .ok_or(MemoryError::OutOfBounds {
                offset,
                length: 1,
                size: self.data.len(),
            })?;
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(MemoryError::Unterminated { offset })?;
        Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
    }

    /// The whole memory.
    pub fn as_slice(&self) -> &'a [u8] {
        self.data
    }
}

/// `offset..offset + len` if it fits in `size` bytes.
pub(crate) fn checked_range(
    offset: usize,
    len: usize,
    size: usize,
) -> Result<std::ops::Range<usize>, MemoryError> {
    offset
        .checked_add(len)
        .filter(|&end| end <= size)
        .map(|end| offset..end)
        .ok_or(MemoryError::OutOfBounds {
            offset,
            length: len,
            size,
        })
}
