//! Append-only device over an output stream.
//!
//! A stream cannot seek or report its length, so the device is serial and
//! write-only, and its block count has to be fixed up front.

use std::io::Write;

use super::{Access, BaseDevice, DeviceError, Medium};

pub type StreamDevice<W> = BaseDevice<StreamMedium<W>>;

#[derive(Debug)]
pub struct StreamMedium<W> {
    out: Option<W>,
}

impl<W: Write> Medium for StreamMedium<W> {
    fn read_block(&mut self, _: u64, _: &mut [u8]) -> Result<(), DeviceError> {
        Err(DeviceError::WriteOnly)
    }

    fn write_block(&mut self, _: u64, block: &[u8]) -> Result<(), DeviceError> {
        let out = self.out.as_mut().ok_or(DeviceError::Closed)?;
        out.write_all(block)?;
        Ok(())
    }

    fn close(&mut self, err: bool) -> Result<(), DeviceError> {
        match self.out.take() {
            Some(mut out) if !err => Ok(out.flush()?),
            _ => Ok(()),
        }
    }
}

impl<W: Write> StreamDevice<W> {
    pub fn new(out: W, size: u64, block_size: usize) -> Result<Self, DeviceError> {
        BaseDevice::with_medium(StreamMedium { out: Some(out) }, Access::SERIAL, block_size, size)
    }
}
