//! One worker buffer: storage, block numbers, status and its dedicated thread.
//!
//! The storage belongs to the caller while the slot is `Idle` and to the
//! worker while it is `Busy`.  The worker takes the vectors out of the
//! shared state for the duration of a batch and puts them back before
//! flipping to `Idle`, so neither side ever holds the lock during a
//! transform.

use std::any::Any;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{trace, warn};

use crate::device::{BlockDevice, DeviceError};
use crate::filter::Filter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Idle,
    Busy,
    Terminating,
}

struct State {
    status: Status,
    data:   Vec<u8>,
    nums:   Vec<u64>,
    pos:    usize,
    error:  Option<DeviceError>,
}

struct Shared {
    state: Mutex<State>,
    /// Caller to worker: a batch is ready, or stop.
    work:  Condvar,
    /// Worker to caller: batch finished.
    done:  Condvar,
}

pub(crate) struct Slot {
    shared:      Arc<Shared>,
    depth:       usize,
    block_size:  usize,
    read_filter: Option<Box<dyn Filter>>,
    worker:      Option<JoinHandle<()>>,
}

impl Slot {
    pub(crate) fn spawn(
        id:           usize,
        depth:        usize,
        block_size:   usize,
        write_filter: Option<Box<dyn Filter>>,
        read_filter:  Option<Box<dyn Filter>>,
        delay:        Option<Duration>,
    ) -> Result<Self, DeviceError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                status: Status::Idle,
                data:   vec![0u8; depth * block_size],
                nums:   vec![0u64; depth],
                pos:    0,
                error:  None,
            }),
            work: Condvar::new(),
            done: Condvar::new(),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("blockmux-worker-{id}"))
                .spawn(move || run(shared, write_filter, block_size, delay))?
        };

        Ok(Self { shared, depth, block_size, read_filter, worker: Some(worker) })
    }

    pub(crate) fn read_filter(&mut self) -> Option<&mut (dyn Filter + 'static)> {
        self.read_filter.as_deref_mut()
    }

    /// Block until the worker has let go of the buffer.  A transform error
    /// captured since the last visit is returned here, once.
    fn wait_idle(&self) -> Result<MutexGuard<'_, State>, DeviceError> {
        let mut st = self.shared.state.lock();
        while st.status == Status::Busy {
            self.shared.done.wait(&mut st);
        }
        match st.error.take() {
            Some(err) => Err(err),
            None      => Ok(st),
        }
    }

    fn submit(&self, st: &mut State) {
        st.status = Status::Busy;
        self.shared.work.notify_one();
    }

    fn flush<D: BlockDevice + ?Sized>(&self, st: &mut State, target: &mut D) -> Result<(), DeviceError> {
        for (i, num) in st.nums[..st.pos].iter().enumerate() {
            target.write(*num, &st.data, i * self.block_size)?;
        }
        trace!(blocks = st.pos, first = st.nums.first().copied(), "flushed buffer");
        st.pos = 0;
        Ok(())
    }

    /// Append one raw block.  A full buffer left over from the previous
    /// round is flushed to `target` first; that is the only place flushes
    /// happen outside of close.  Returns `true` when this block filled the
    /// buffer and it was handed to the worker.
    pub(crate) fn add<D: BlockDevice + ?Sized>(
        &self,
        num:    u64,
        block:  &[u8],
        target: &mut D,
        sync:   bool,
    ) -> Result<bool, DeviceError> {
        let mut st = self.wait_idle()?;
        if st.pos == self.depth {
            self.flush(&mut st, target)?;
        }

        let at = st.pos * self.block_size;
        st.data[at..at + self.block_size].copy_from_slice(block);
        let pos = st.pos;
        st.nums[pos] = num;
        st.pos += 1;

        if st.pos < self.depth {
            return Ok(false);
        }
        self.submit(&mut st);
        if sync {
            while st.status == Status::Busy {
                self.shared.done.wait(&mut st);
            }
        }
        Ok(true)
    }

    /// Hand a partially filled, idle buffer to the worker.
    pub(crate) fn submit_partial(&self) -> bool {
        let mut st = self.shared.state.lock();
        if st.status == Status::Idle && st.pos > 0 && st.pos < self.depth {
            self.submit(&mut st);
            return true;
        }
        false
    }

    /// Wait for the worker, then write out whatever the buffer holds unless
    /// `discard` is set.
    pub(crate) fn drain<D: BlockDevice + ?Sized>(&self, target: &mut D, discard: bool) -> Result<(), DeviceError> {
        let mut st = self.wait_idle()?;
        if discard {
            st.pos = 0;
            return Ok(());
        }
        if st.pos > 0 {
            self.flush(&mut st, target)?;
        }
        Ok(())
    }

    /// Stop the worker and join it.
    pub(crate) fn terminate(&mut self) -> Result<(), DeviceError> {
        {
            let mut st = self.shared.state.lock();
            st.status = Status::Terminating;
            self.shared.work.notify_one();
        }
        match self.worker.take() {
            Some(handle) => handle
                .join()
                .map_err(|payload| DeviceError::WorkerPanic(panic_message(payload))),
            None => Ok(()),
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if self.worker.is_some() {
            warn!("buffer dropped without close, stopping worker");
            let _ = self.terminate();
        }
    }
}

fn run(shared: Arc<Shared>, mut filter: Option<Box<dyn Filter>>, block_size: usize, delay: Option<Duration>) {
    loop {
        let (mut data, mut nums, pos) = {
            let mut st = shared.state.lock();
            while st.status == Status::Idle {
                shared.work.wait(&mut st);
            }
            if st.status == Status::Terminating {
                return;
            }
            (mem::take(&mut st.data), mem::take(&mut st.nums), st.pos)
        };

        let result = match filter.as_mut() {
            Some(filter) => panic::catch_unwind(AssertUnwindSafe(|| {
                apply(&mut **filter, &mut data, &mut nums[..pos], block_size)
            }))
            .unwrap_or_else(|payload| Err(DeviceError::WorkerPanic(panic_message(payload)))),
            None => Ok(()),
        };

        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let mut st = shared.state.lock();
        st.data = data;
        st.nums = nums;
        if let Err(err) = result {
            warn!(error = %err, "transform failed, reporting on next visit");
            st.error = Some(err);
        }
        if st.status == Status::Busy {
            st.status = Status::Idle;
        }
        shared.done.notify_all();
    }
}

fn apply(filter: &mut dyn Filter, data: &mut [u8], nums: &mut [u64], block_size: usize) -> Result<(), DeviceError> {
    for (num, block) in nums.iter_mut().zip(data.chunks_exact_mut(block_size)) {
        *num = filter.map(*num);
        filter.transform(*num, block)?;
    }
    Ok(())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return (*msg).to_string();
    }
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(_)  => "unknown panic".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Access, MemoryDevice};
    use crate::filter::Identity;

    #[test]
    fn panic_message_variants() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42u8)), "unknown panic");
    }

    #[test]
    fn full_buffer_flushes_on_revisit_only() {
        let mut target = MemoryDevice::with_size(2, 4, Access::READ_WRITE).unwrap();
        let slot = Slot::spawn(0, 2, 2, Some(Box::new(Identity)), None, None).unwrap();

        assert!(!slot.add(0, &[1, 1], &mut target, false).unwrap());
        assert!(slot.add(1, &[2, 2], &mut target, true).unwrap());
        assert_eq!(target.buffer(), &[0u8; 8]);

        assert!(!slot.add(2, &[3, 3], &mut target, false).unwrap());
        assert_eq!(target.buffer(), &[1, 1, 2, 2, 0, 0, 0, 0]);

        assert!(slot.submit_partial());
        slot.drain(&mut target, false).unwrap();
        assert_eq!(target.buffer(), &[1, 1, 2, 2, 3, 3, 0, 0]);
    }

    #[test]
    fn terminate_is_idempotent() {
        let mut slot = Slot::spawn(0, 1, 1, None, None, None).unwrap();
        slot.terminate().unwrap();
        slot.terminate().unwrap();
    }
}
