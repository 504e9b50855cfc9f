//! Decorator that lets a caller veto or observe every block I/O, e.g. for
//! progress reporting or user-initiated cancellation.

use super::{Access, BlockDevice, DeviceError};

/// Which operation a hook is asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Read,
    Write,
}

pub trait Hook {
    /// Return `false` to abort the read of block `num`.
    fn on_read(&mut self, num: u64) -> bool;
    /// Return `false` to abort the write of block `num`.
    fn on_write(&mut self, num: u64) -> bool;
}

impl<F: FnMut(Op, u64) -> bool> Hook for F {
    fn on_read(&mut self, num: u64) -> bool { self(Op::Read, num) }
    fn on_write(&mut self, num: u64) -> bool { self(Op::Write, num) }
}

/// Forwards to `inner` once `hook` agrees; otherwise fails with
/// [`DeviceError::Aborted`] without touching `inner`.
pub struct HookDevice<D, H> {
    inner: D,
    hook:  H,
}

impl<D: BlockDevice, H: Hook> HookDevice<D, H> {
    pub fn new(inner: D, hook: H) -> Self {
        Self { inner, hook }
    }

    pub fn inner(&self) -> &D { &self.inner }

    pub fn into_parts(self) -> (D, H) { (self.inner, self.hook) }
}

impl<D: BlockDevice, H: Hook> BlockDevice for HookDevice<D, H> {
    fn block_size(&self) -> usize { self.inner.block_size() }
    fn size(&self) -> u64 { self.inner.size() }
    fn access(&self) -> Access { self.inner.access() }

    fn read(&mut self, num: u64, buf: &mut [u8], ofs: usize) -> Result<(), DeviceError> {
        if !self.hook.on_read(num) {
            return Err(DeviceError::Aborted);
        }
        self.inner.read(num, buf, ofs)
    }

    fn write(&mut self, num: u64, buf: &[u8], ofs: usize) -> Result<(), DeviceError> {
        if !self.hook.on_write(num) {
            return Err(DeviceError::Aborted);
        }
        self.inner.write(num, buf, ofs)
    }

    /// The hook is asked about a probe exactly as about a real write.
    fn probe_write(&mut self, num: u64) -> Result<(), DeviceError> {
        if !self.hook.on_write(num) {
            return Err(DeviceError::Aborted);
        }
        self.inner.probe_write(num)
    }

    fn close(&mut self, err: bool) -> Result<(), DeviceError> {
        self.inner.close(err)
    }
}
