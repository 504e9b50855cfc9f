//! Block device contract and the invariant-enforcing base implementation.
//!
//! # Contract
//! A [`BlockDevice`] is a medium divided into `size()` blocks of exactly
//! `block_size()` bytes.  Every read and write moves one whole block between
//! the device and the window `buf[ofs .. ofs + block_size]` of a caller
//! buffer; bytes outside that window are never touched.
//!
//! # Access modes
//! [`Access`] carries the three mode flags.  `read_only` excludes both
//! `write_only` and `serial_write`; a serial device accepts block numbers
//! strictly ascending from 0 with no gaps.
//!
//! # Base implementation
//! [`BaseDevice`] enforces the contract once for every backing medium and
//! hands the actual byte movement to a [`Medium`], which only ever sees
//! validated block numbers and exact block-sized slices.

use std::io::{self, Write};

use thiserror::Error;

pub mod discard;
pub mod file;
pub mod hook;
pub mod memory;
pub mod stream;

pub use discard::DiscardDevice;
pub use file::FileDevice;
pub use hook::{Hook, HookDevice, Op};
pub use memory::MemoryDevice;
pub use stream::StreamDevice;

/// Block size used when the caller has no preference.
pub const DEFAULT_BLOCK_SIZE: usize = 512;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("block device is read-only")]
    ReadOnly,
    #[error("block device is write-only")]
    WriteOnly,
    #[error("illegal block number {num} (size={size})")]
    OutOfRange { num: u64, size: u64 },
    #[error("illegal seek ({num}<>{expected})")]
    OutOfSequence { num: u64, expected: u64 },
    #[error("buffer of {len} bytes cannot hold a {block_size} byte block at offset {ofs}")]
    ShortBuffer { len: usize, ofs: usize, block_size: usize },
    #[error("invalid access mode: {0}")]
    InvalidAccess(&'static str),
    #[error("invalid block size {0}")]
    InvalidBlockSize(usize),
    #[error("memory out of range (block {num})")]
    MemoryRange { num: u64 },
    #[error("buffer of {len} bytes not aligned to block size {block_size}")]
    Misaligned { len: usize, block_size: usize },
    #[error("reading block {num} failed: medium ended early")]
    ShortRead { num: u64 },
    /// Raised by a [`HookDevice`] whose hook vetoed the operation.
    #[error("I/O aborted")]
    Aborted,
    #[error("block device is closed")]
    Closed,
    #[error("transform failed: {0}")]
    Transform(Box<dyn std::error::Error + Send + Sync>),
    #[error("filter worker panicked: {0}")]
    WorkerPanic(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl DeviceError {
    /// Wrap a filter's own error type.
    pub fn transform<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        DeviceError::Transform(err.into())
    }
}

// ── Access flags ─────────────────────────────────────────────────────────────

/// Mode flags of a device, fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Access {
    read_only:    bool,
    write_only:   bool,
    serial_write: bool,
}

impl Access {
    pub const READ_WRITE: Access = Access { read_only: false, write_only: false, serial_write: false };
    pub const READ_ONLY:  Access = Access { read_only: true,  write_only: false, serial_write: false };
    pub const WRITE_ONLY: Access = Access { read_only: false, write_only: true,  serial_write: false };
    /// Append-only media: write-only and strictly sequential.
    pub const SERIAL:     Access = Access { read_only: false, write_only: true,  serial_write: true  };

    pub fn from_flags(read_only: bool, write_only: bool, serial_write: bool) -> Result<Self, DeviceError> {
        if read_only && write_only {
            return Err(DeviceError::InvalidAccess("read-only and write-only are mutually exclusive"));
        }
        if read_only && serial_write {
            return Err(DeviceError::InvalidAccess("read-only and serial-write are mutually exclusive"));
        }
        Ok(Self { read_only, write_only, serial_write })
    }

    #[inline]
    pub fn read_only(self) -> bool { self.read_only }
    #[inline]
    pub fn write_only(self) -> bool { self.write_only }
    #[inline]
    pub fn serial_write(self) -> bool { self.serial_write }
}

// ── Contract ─────────────────────────────────────────────────────────────────

pub trait BlockDevice {
    /// Bytes per block.
    fn block_size(&self) -> usize;

    /// Number of blocks the device can hold.
    fn size(&self) -> u64;

    fn access(&self) -> Access;

    fn read_only(&self) -> bool { self.access().read_only() }
    fn write_only(&self) -> bool { self.access().write_only() }
    fn serial_write(&self) -> bool { self.access().serial_write() }

    /// Read block `num` into `buf[ofs .. ofs + block_size]`.
    fn read(&mut self, num: u64, buf: &mut [u8], ofs: usize) -> Result<(), DeviceError>;

    /// Write block `num` from `buf[ofs .. ofs + block_size]`.
    fn write(&mut self, num: u64, buf: &[u8], ofs: usize) -> Result<(), DeviceError>;

    /// Run every check `write(num, ..)` would run without touching the
    /// medium or advancing the serial cursor.
    fn probe_write(&mut self, num: u64) -> Result<(), DeviceError>;

    /// Release the device.  `err` marks a close after a failure: only
    /// cleanup is required, the written sequence may be incomplete.
    fn close(&mut self, err: bool) -> Result<(), DeviceError>;
}

impl<D: BlockDevice + ?Sized> BlockDevice for Box<D> {
    fn block_size(&self) -> usize { (**self).block_size() }
    fn size(&self) -> u64 { (**self).size() }
    fn access(&self) -> Access { (**self).access() }
    fn read(&mut self, num: u64, buf: &mut [u8], ofs: usize) -> Result<(), DeviceError> {
        (**self).read(num, buf, ofs)
    }
    fn write(&mut self, num: u64, buf: &[u8], ofs: usize) -> Result<(), DeviceError> {
        (**self).write(num, buf, ofs)
    }
    fn probe_write(&mut self, num: u64) -> Result<(), DeviceError> {
        (**self).probe_write(num)
    }
    fn close(&mut self, err: bool) -> Result<(), DeviceError> {
        (**self).close(err)
    }
}

/// Check that `buf` holds a whole block at `ofs`.
pub(crate) fn block_window(len: usize, ofs: usize, block_size: usize) -> Result<std::ops::Range<usize>, DeviceError> {
    match ofs.checked_add(block_size) {
        Some(end) if end <= len => Ok(ofs..end),
        _ => Err(DeviceError::ShortBuffer { len, ofs, block_size }),
    }
}

// ── Base implementation ──────────────────────────────────────────────────────

/// The byte-moving primitives a backing medium supplies to [`BaseDevice`].
///
/// Block numbers are already range- and sequence-checked and the slices
/// are exactly one block long.
pub trait Medium {
    fn read_block(&mut self, num: u64, block: &mut [u8]) -> Result<(), DeviceError>;
    fn write_block(&mut self, num: u64, block: &[u8]) -> Result<(), DeviceError>;
    fn close(&mut self, err: bool) -> Result<(), DeviceError>;
}

/// Contract enforcement shared by every concrete device.
#[derive(Debug)]
pub struct BaseDevice<M> {
    medium:       M,
    access:       Access,
    block_size:   usize,
    size:         u64,
    last_written: Option<u64>,
}

impl<M: Medium> BaseDevice<M> {
    pub fn with_medium(medium: M, access: Access, block_size: usize, size: u64) -> Result<Self, DeviceError> {
        if block_size == 0 {
            return Err(DeviceError::InvalidBlockSize(block_size));
        }
        Ok(Self { medium, access, block_size, size, last_written: None })
    }

    /// Number of the last block accepted by `write`, if any.
    pub fn last_written(&self) -> Option<u64> { self.last_written }

    pub fn medium(&self) -> &M { &self.medium }

    pub fn into_medium(self) -> M { self.medium }

    fn check_write(&self, num: u64) -> Result<(), DeviceError> {
        if self.access.read_only() {
            return Err(DeviceError::ReadOnly);
        }
        if num >= self.size {
            return Err(DeviceError::OutOfRange { num, size: self.size });
        }
        if self.access.serial_write() {
            let expected = self.last_written.map_or(0, |n| n + 1);
            if num != expected {
                return Err(DeviceError::OutOfSequence { num, expected });
            }
        }
        Ok(())
    }
}

impl<M: Medium> BlockDevice for BaseDevice<M> {
    fn block_size(&self) -> usize { self.block_size }
    fn size(&self) -> u64 { self.size }
    fn access(&self) -> Access { self.access }

    fn read(&mut self, num: u64, buf: &mut [u8], ofs: usize) -> Result<(), DeviceError> {
        if self.access.write_only() {
            return Err(DeviceError::WriteOnly);
        }
        let window = block_window(buf.len(), ofs, self.block_size)?;
        self.medium.read_block(num, &mut buf[window])
    }

    fn write(&mut self, num: u64, buf: &[u8], ofs: usize) -> Result<(), DeviceError> {
        self.check_write(num)?;
        let window = block_window(buf.len(), ofs, self.block_size)?;
        self.medium.write_block(num, &buf[window])?;
        self.last_written = Some(num);
        Ok(())
    }

    fn probe_write(&mut self, num: u64) -> Result<(), DeviceError> {
        self.check_write(num)
    }

    fn close(&mut self, err: bool) -> Result<(), DeviceError> {
        self.medium.close(err)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Read every block `0..size` in order and write it to `out`.
///
/// Returns the number of blocks copied.  `out` is flushed at the end.
pub fn dump<D, W>(device: &mut D, mut out: W) -> Result<u64, DeviceError>
where
    D: BlockDevice + ?Sized,
    W: Write,
{
    let mut block = vec![0u8; device.block_size()];
    let size = device.size();
    for num in 0..size {
        device.read(num, &mut block, 0)?;
        out.write_all(&block)?;
    }
    out.flush()?;
    Ok(size)
}
