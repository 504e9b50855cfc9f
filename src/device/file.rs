//! Seek-based device over a random-access medium (usually a [`std::fs::File`]).

use std::io::{Read, Seek, SeekFrom, Write};

use super::{Access, BaseDevice, DeviceError, Medium};

/// Block device on top of any `Read + Write + Seek` medium.
pub type FileDevice<F> = BaseDevice<FileMedium<F>>;

#[derive(Debug)]
pub struct FileMedium<F> {
    file:       Option<F>,
    block_size: u64,
}

impl<F: Read + Write + Seek> FileMedium<F> {
    fn file(&mut self) -> Result<&mut F, DeviceError> {
        self.file.as_mut().ok_or(DeviceError::Closed)
    }

    fn seek_to(&mut self, num: u64) -> Result<&mut F, DeviceError> {
        let pos = num
            .checked_mul(self.block_size)
            .ok_or(DeviceError::OutOfRange { num, size: u64::MAX })?;
        let file = self.file()?;
        file.seek(SeekFrom::Start(pos))?;
        Ok(file)
    }
}

impl<F: Read + Write + Seek> Medium for FileMedium<F> {
    fn read_block(&mut self, num: u64, block: &mut [u8]) -> Result<(), DeviceError> {
        let file = self.seek_to(num)?;
        let mut filled = 0;
        while filled < block.len() {
            match file.read(&mut block[filled..]) {
                Ok(0) => return Err(DeviceError::ShortRead { num }),
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn write_block(&mut self, num: u64, block: &[u8]) -> Result<(), DeviceError> {
        self.seek_to(num)?.write_all(block)?;
        Ok(())
    }

    fn close(&mut self, err: bool) -> Result<(), DeviceError> {
        match self.file.take() {
            Some(mut file) if !err => Ok(file.flush()?),
            _ => Ok(()),
        }
    }
}

impl<F: Read + Write + Seek> FileDevice<F> {
    /// Wrap `file`.  With `size == None` the block count is the medium
    /// length divided by `block_size` (a trailing partial block is ignored).
    pub fn open(mut file: F, block_size: usize, size: Option<u64>, access: Access) -> Result<Self, DeviceError> {
        if block_size == 0 {
            return Err(DeviceError::InvalidBlockSize(block_size));
        }
        let size = match size {
            Some(size) => size,
            None => {
                let len = file.seek(SeekFrom::End(0))?;
                len / block_size as u64
            }
        };
        let medium = FileMedium { file: Some(file), block_size: block_size as u64 };
        BaseDevice::with_medium(medium, access, block_size, size)
    }
}
