#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use blockmux::device::{Access, BlockDevice, DeviceError};
use blockmux::filter::{Filter, FilterFactory};
use byteorder::{LittleEndian, WriteBytesExt};

pub const PREFIX: u8 = 0xcc;

/// Block content for `num`: the number stamped little-endian into the first
/// eight bytes (when they fit), `num as u8` everywhere else.
pub fn pattern(num: u64, block_size: usize) -> Vec<u8> {
    let mut block = vec![num as u8; block_size];
    if block_size >= 8 {
        (&mut block[..8]).write_u64::<LittleEndian>(num).unwrap();
    }
    block
}

/// `pattern(num)` preceded by one `PREFIX` byte, to exercise offsets.
pub fn prefixed(num: u64, block_size: usize) -> Vec<u8> {
    let mut buf = vec![PREFIX];
    buf.extend(pattern(num, block_size));
    buf
}

pub fn shifted(block: &[u8], inc: u8) -> Vec<u8> {
    block.iter().map(|b| b.wrapping_add(inc)).collect()
}

// ── Filters ─────────────────────────────────────────────────────────────────

/// Adds `inc` to every byte on write, subtracts it on read.
pub struct IncFilter {
    inc:        u8,
    remap:      fn(u64) -> u64,
    delay:      Option<Duration>,
    fail_on:    Option<u64>,
    panic_on:   Option<u64>,
    transforms: Arc<AtomicUsize>,
}

impl Filter for IncFilter {
    fn map(&mut self, num: u64) -> u64 {
        (self.remap)(num)
    }

    fn transform(&mut self, num: u64, block: &mut [u8]) -> Result<(), DeviceError> {
        if self.fail_on == Some(num) {
            return Err(DeviceError::transform(format!("refusing block {num}")));
        }
        if self.panic_on == Some(num) {
            panic!("filter blew up on block {num}");
        }
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        for b in block.iter_mut() {
            *b = b.wrapping_add(self.inc);
        }
        self.transforms.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct IncFactory {
    pub inc:          u8,
    pub remap:        fn(u64) -> u64,
    /// Per-block delay of the n-th write filter created.
    pub delays:       Vec<Duration>,
    pub fail_on:      Option<u64>,
    pub panic_on:     Option<u64>,
    pub allow_read:   bool,
    pub block_size:   Option<usize>,
    pub created:      usize,
    pub transforms:   Arc<AtomicUsize>,
}

impl IncFactory {
    pub fn new(inc: u8) -> Self {
        Self {
            inc,
            remap:      |n| n,
            delays:     Vec::new(),
            fail_on:    None,
            panic_on:   None,
            allow_read: true,
            block_size: None,
            created:    0,
            transforms: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn transforms(&self) -> usize {
        self.transforms.load(Ordering::SeqCst)
    }
}

impl FilterFactory for IncFactory {
    fn initialize(&mut self, block_size: usize) -> Result<(), DeviceError> {
        assert!(self.block_size.is_none(), "initialized twice");
        self.block_size = Some(block_size);
        Ok(())
    }

    fn create_read(&mut self) -> Box<dyn Filter> {
        assert!(self.allow_read, "read filter requested for a write-only target");
        Box::new(IncFilter {
            inc:        self.inc.wrapping_neg(),
            remap:      self.remap,
            delay:      None,
            fail_on:    None,
            panic_on:   None,
            transforms: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn create_write(&mut self) -> Box<dyn Filter> {
        assert!(self.block_size.is_some(), "filter requested before initialize");
        let delay = self.delays.get(self.created).copied();
        self.created += 1;
        Box::new(IncFilter {
            inc:        self.inc,
            remap:      self.remap,
            delay,
            fail_on:    self.fail_on,
            panic_on:   self.panic_on,
            transforms: Arc::clone(&self.transforms),
        })
    }
}

// ── Recording target ────────────────────────────────────────────────────────

/// Write-only target that keeps every block it receives, in arrival order.
pub struct Recorder {
    pub block_size: usize,
    pub size:       u64,
    pub access:     Access,
    pub writes:     Vec<(u64, Vec<u8>)>,
    pub closed:     Option<bool>,
}

impl Recorder {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            size:   0x1234_5678_9abc,
            access: Access::WRITE_ONLY,
            writes: Vec::new(),
            closed: None,
        }
    }

    pub fn nums(&self) -> Vec<u64> {
        self.writes.iter().map(|(n, _)| *n).collect()
    }
}

impl BlockDevice for Recorder {
    fn block_size(&self) -> usize { self.block_size }
    fn size(&self) -> u64 { self.size }
    fn access(&self) -> Access { self.access }

    fn read(&mut self, _: u64, _: &mut [u8], _: usize) -> Result<(), DeviceError> {
        Err(DeviceError::WriteOnly)
    }

    fn write(&mut self, num: u64, buf: &[u8], ofs: usize) -> Result<(), DeviceError> {
        self.writes.push((num, buf[ofs..ofs + self.block_size].to_vec()));
        Ok(())
    }

    fn probe_write(&mut self, _: u64) -> Result<(), DeviceError> {
        Ok(())
    }

    fn close(&mut self, err: bool) -> Result<(), DeviceError> {
        self.closed = Some(err);
        Ok(())
    }
}
