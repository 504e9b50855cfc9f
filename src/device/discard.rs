use super::{Access, BaseDevice, DeviceError, Medium};

/// Write-only sink of unbounded size.  Everything written is dropped.
pub type DiscardDevice = BaseDevice<DiscardMedium>;

#[derive(Debug, Default)]
pub struct DiscardMedium;

impl Medium for DiscardMedium {
    fn read_block(&mut self, _: u64, _: &mut [u8]) -> Result<(), DeviceError> {
        Err(DeviceError::WriteOnly)
    }

    fn write_block(&mut self, _: u64, _: &[u8]) -> Result<(), DeviceError> {
        Ok(())
    }

    fn close(&mut self, _: bool) -> Result<(), DeviceError> {
        Ok(())
    }
}

impl DiscardDevice {
    pub fn with_block_size(block_size: usize) -> Result<Self, DeviceError> {
        BaseDevice::with_medium(DiscardMedium, Access::WRITE_ONLY, block_size, u64::MAX)
    }
}
