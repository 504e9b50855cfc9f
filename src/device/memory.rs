//! RAM-resident device.
//!
//! Byte offsets are limited to 31 bits, which caps a memory device at 2 GiB
//! regardless of block size.

use super::{Access, BaseDevice, DeviceError, Medium};

/// Largest byte offset a memory device may address.
pub const MEMORY_LIMIT: u64 = 0x7fff_ffff;

pub type MemoryDevice = BaseDevice<MemoryMedium>;

#[derive(Debug)]
pub struct MemoryMedium {
    buf:        Vec<u8>,
    block_size: usize,
}

fn num_to_ofs(num: u64, block_size: usize) -> Result<usize, DeviceError> {
    match num.checked_mul(block_size as u64) {
        Some(ofs) if ofs <= MEMORY_LIMIT => Ok(ofs as usize),
        _ => Err(DeviceError::MemoryRange { num }),
    }
}

impl MemoryMedium {
    fn range(&self, num: u64) -> Result<std::ops::Range<usize>, DeviceError> {
        let start = num_to_ofs(num, self.block_size)?;
        let end = start + self.block_size;
        if end > self.buf.len() {
            return Err(DeviceError::MemoryRange { num });
        }
        Ok(start..end)
    }
}

impl Medium for MemoryMedium {
    fn read_block(&mut self, num: u64, block: &mut [u8]) -> Result<(), DeviceError> {
        let range = self.range(num)?;
        block.copy_from_slice(&self.buf[range]);
        Ok(())
    }

    fn write_block(&mut self, num: u64, block: &[u8]) -> Result<(), DeviceError> {
        let range = self.range(num)?;
        self.buf[range].copy_from_slice(block);
        Ok(())
    }

    fn close(&mut self, _: bool) -> Result<(), DeviceError> {
        Ok(())
    }
}

impl MemoryDevice {
    /// Zero-filled device of `size` blocks.
    pub fn with_size(block_size: usize, size: u64, access: Access) -> Result<Self, DeviceError> {
        if block_size == 0 {
            return Err(DeviceError::InvalidBlockSize(block_size));
        }
        let len = num_to_ofs(size, block_size)?;
        Self::from_vec(block_size, vec![0u8; len], access)
    }

    /// Adopt `buf` as the device content.  Its length must be a whole
    /// number of blocks.
    pub fn from_vec(block_size: usize, buf: Vec<u8>, access: Access) -> Result<Self, DeviceError> {
        if block_size == 0 {
            return Err(DeviceError::InvalidBlockSize(block_size));
        }
        if buf.len() % block_size != 0 {
            return Err(DeviceError::Misaligned { len: buf.len(), block_size });
        }
        let size = (buf.len() / block_size) as u64;
        BaseDevice::with_medium(MemoryMedium { buf, block_size }, access, block_size, size)
    }

    pub fn buffer(&self) -> &[u8] {
        &self.medium().buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.into_medium().buf
    }
}
