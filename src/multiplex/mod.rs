//! Ordered, multi-threaded filtering in front of a block device.
//!
//! # Write path
//! [`MultiplexDevice`] owns `workers` buffers of `depth` blocks each, every
//! buffer with its own background thread.  Incoming blocks are copied into
//! the current buffer; once it is full its worker runs the write filter
//! over every block in place while the caller moves on to the next buffer
//! in round-robin order.
//!
//! A transformed buffer is written to the target only when the caller comes
//! back around to that same buffer.  Buffers are revisited in the order they
//! were filled, so the target sees blocks in exactly the order they were
//! written, however the workers happen to be scheduled.
//!
//! # Errors
//! A failing (or panicking) filter does not interrupt the caller.  The error
//! is parked on its buffer and returned by the next `write` that reuses the
//! buffer, or by `close`.  After any error the device should only be closed
//! with `err = true`.
//!
//! # Read path
//! Reads are not multiplexed: the first buffer's read filter maps the block
//! number and transforms the data on the calling thread.
//!
//! ```
//! use blockmux::device::{Access, BlockDevice, MemoryDevice};
//! use blockmux::filter::IdentityFactory;
//! use blockmux::multiplex::{MultiplexDevice, MultiplexOptions};
//!
//! let target = MemoryDevice::with_size(16, 8, Access::READ_WRITE)?;
//! let mut dev = MultiplexDevice::new(&mut IdentityFactory, target, MultiplexOptions::new(2, 3))?;
//! for num in 0..8u64 {
//!     dev.write(num, &[num as u8; 16], 0)?;
//! }
//! dev.close(false)?;
//! assert_eq!(dev.into_target().buffer()[7 * 16], 7);
//! # Ok::<(), blockmux::DeviceError>(())
//! ```

mod options;
mod slot;

pub use options::{MultiplexOptions, DEFAULT_DEPTH};

use tracing::debug;

use crate::device::{block_window, Access, BlockDevice, DeviceError};
use crate::filter::FilterFactory;
use slot::Slot;

pub struct MultiplexDevice<D> {
    target:       D,
    slots:        Vec<Slot>,
    idx:          usize,
    depth:        usize,
    sync_process: bool,
    closed:       bool,
}

impl<D: BlockDevice> MultiplexDevice<D> {
    /// Initialise `factory` with the target's block size and start one
    /// worker per buffer.  Write filters are only created for a target that
    /// is not read-only, read filters only for one that is not write-only.
    pub fn new<F>(factory: &mut F, target: D, options: MultiplexOptions) -> Result<Self, DeviceError>
    where
        F: FilterFactory + ?Sized,
    {
        options.validate()?;
        let block_size = target.block_size();
        factory.initialize(block_size)?;

        let workers = options.worker_count();
        let mut slots = Vec::with_capacity(workers);
        for id in 0..workers {
            let write_filter = (!target.read_only()).then(|| factory.create_write());
            let read_filter = (!target.write_only()).then(|| factory.create_read());
            slots.push(Slot::spawn(
                id,
                options.depth,
                block_size,
                write_filter,
                read_filter,
                options.worker_delay(),
            )?);
        }

        debug!(workers, depth = options.depth, block_size, "multiplexed device started");
        Ok(Self {
            target,
            slots,
            idx: 0,
            depth: options.depth,
            sync_process: options.sync_process,
            closed: false,
        })
    }

    pub fn workers(&self) -> usize { self.slots.len() }

    pub fn depth(&self) -> usize { self.depth }

    pub fn target(&self) -> &D { &self.target }

    /// Give back the wrapped device.  Workers still running are stopped
    /// without flushing, so call [`BlockDevice::close`] first; that also
    /// closes the target.
    pub fn into_target(self) -> D {
        let MultiplexDevice { target, .. } = self;
        target
    }

    fn rotate(&mut self) {
        self.idx = (self.idx + 1) % self.slots.len();
    }
}

impl<D: BlockDevice> BlockDevice for MultiplexDevice<D> {
    fn block_size(&self) -> usize { self.target.block_size() }
    fn size(&self) -> u64 { self.target.size() }
    fn access(&self) -> Access { self.target.access() }

    fn read(&mut self, num: u64, buf: &mut [u8], ofs: usize) -> Result<(), DeviceError> {
        if self.closed {
            return Err(DeviceError::Closed);
        }
        let window = block_window(buf.len(), ofs, self.target.block_size())?;
        let filter = self.slots[0].read_filter().ok_or(DeviceError::WriteOnly)?;
        let num = filter.map(num);
        self.target.read(num, buf, ofs)?;
        filter.transform(num, &mut buf[window])
    }

    fn write(&mut self, num: u64, buf: &[u8], ofs: usize) -> Result<(), DeviceError> {
        if self.closed {
            return Err(DeviceError::Closed);
        }
        if self.target.read_only() {
            return Err(DeviceError::ReadOnly);
        }
        let window = block_window(buf.len(), ofs, self.target.block_size())?;
        let slot = &self.slots[self.idx];
        if slot.add(num, &buf[window], &mut self.target, self.sync_process)? {
            self.rotate();
        }
        Ok(())
    }

    /// Only what can be known before the block is mapped and queued: the
    /// device is open and writable and `num` lies within the target.
    fn probe_write(&mut self, num: u64) -> Result<(), DeviceError> {
        if self.closed {
            return Err(DeviceError::Closed);
        }
        if self.target.read_only() {
            return Err(DeviceError::ReadOnly);
        }
        let size = self.target.size();
        if num >= size {
            return Err(DeviceError::OutOfRange { num, size });
        }
        Ok(())
    }

    /// Drain every buffer in rotation order, stop the workers, then close
    /// the target.  With `err` set nothing more is written to the target,
    /// but a transform error already parked on a buffer is still returned.
    ///
    /// The target is closed here too, so [`MultiplexDevice::into_target`]
    /// afterwards hands back an already closed device.
    fn close(&mut self, err: bool) -> Result<(), DeviceError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!(err, "closing multiplexed device");

        if self.slots[self.idx].submit_partial() {
            self.rotate();
        }

        let mut result = Ok(());
        for _ in 0..self.slots.len() {
            let drained = self.slots[self.idx].drain(&mut self.target, err || result.is_err());
            if result.is_ok() {
                result = drained;
            }
            self.rotate();
        }

        for slot in &mut self.slots {
            let stopped = slot.terminate();
            if result.is_ok() {
                result = stopped;
            }
        }

        let closed = self.target.close(err || result.is_err());
        result.and(closed)
    }
}
