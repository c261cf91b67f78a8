//! Non-volatile storage access
//!
//! [`Flash`] is the byte-addressed interface the board support crate
//! provides. Offsets are relative to the start of the authenticator's
//! partition. Any erase-before-write the medium needs is the
//! implementation's job; the store only calls [`Flash::erase`] when it
//! formats the partition or clears a slot.

use alloc::vec;
use alloc::vec::Vec;

/// Value of an erased byte
pub const ERASED: u8 = 0xFF;

/// Flash access failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// Range falls outside the partition
    OutOfBounds,
    /// The device reported a failure
    Device,
}

pub trait Flash {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError>;

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Reset `len` bytes starting at `offset` to [`ERASED`]
    fn erase(&mut self, offset: u32, len: u32) -> Result<(), FlashError>;
}

impl<F: Flash + ?Sized> Flash for &mut F {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        (**self).read(offset, buf)
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        (**self).write(offset, data)
    }

    fn erase(&mut self, offset: u32, len: u32) -> Result<(), FlashError> {
        (**self).erase(offset, len)
    }
}

/// Flash held in memory, for hosts and tests
#[derive(Debug, Clone)]
pub struct RamFlash {
    data: Vec<u8>,
}

impl RamFlash {
    /// An erased partition of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![ERASED; size],
        }
    }

    /// Raw contents, for inspection
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Raw contents, for fault injection
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn range(&self, offset: u32, len: usize) -> Result<core::ops::Range<usize>, FlashError> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(FlashError::OutOfBounds)?;
        if end > self.data.len() {
            return Err(FlashError::OutOfBounds);
        }
        Ok(start..end)
    }
}

impl Flash for RamFlash {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        let range = self.range(offset, data.len())?;
        self.data[range].copy_from_slice(data);
        Ok(())
    }

    fn erase(&mut self, offset: u32, len: u32) -> Result<(), FlashError> {
        let range = self.range(offset, len as usize)?;
        self.data[range].fill(ERASED);
        Ok(())
    }
}
