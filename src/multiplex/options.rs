//! Configuration for [`MultiplexDevice`](super::MultiplexDevice).
//!
//! ```
//! use blockmux::multiplex::MultiplexOptions;
//!
//! let opts = MultiplexOptions::from_json(br#"{ "workers": 4, "depth": 32 }"#)?;
//! assert_eq!(opts.workers, 4);
//! assert!(!opts.sync_process);
//! # Ok::<(), blockmux::DeviceError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::DeviceError;

/// Default number of blocks collected per worker before a batch is handed off.
pub const DEFAULT_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MultiplexOptions {
    /// Number of buffers, each with its own worker thread.  0 is treated as 1.
    pub workers:         usize,
    /// Blocks per buffer.
    pub depth:           usize,
    /// Wait for every submitted batch to finish transforming before the
    /// write that submitted it returns.  Removes all overlap; for tests.
    pub sync_process:    bool,
    /// Sleep this long in a worker after every batch.  For tests.
    pub worker_delay_ms: Option<u64>,
}

impl Default for MultiplexOptions {
    fn default() -> Self {
        Self {
            workers:         std::thread::available_parallelism().map_or(1, |n| n.get()),
            depth:           DEFAULT_DEPTH,
            sync_process:    false,
            worker_delay_ms: None,
        }
    }
}

impl MultiplexOptions {
    pub fn new(workers: usize, depth: usize) -> Self {
        Self { workers, depth, sync_process: false, worker_delay_ms: None }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, DeviceError> {
        let opts: Self = serde_json::from_slice(bytes)
            .map_err(|e| DeviceError::InvalidConfig(e.to_string()))?;
        opts.validate()?;
        Ok(opts)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DeviceError> {
        Self::from_json(&std::fs::read(path)?)
    }

    pub fn validate(&self) -> Result<(), DeviceError> {
        if self.depth == 0 {
            return Err(DeviceError::InvalidConfig("depth must be at least 1".into()));
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }

    pub fn worker_delay(&self) -> Option<Duration> {
        self.worker_delay_ms.map(Duration::from_millis)
    }
}
