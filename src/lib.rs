//! Block-addressed I/O with an ordered, multi-threaded filter pipeline.
//!
//! - [`device`]: the [`BlockDevice`] contract, its invariant-enforcing base
//!   and the file, stream, memory, discard and hook devices.
//! - [`filter`]: the per-block [`Filter`] extension point and its factory.
//! - [`multiplex`]: [`MultiplexDevice`], which runs write filters on worker
//!   threads and still lands every block on the target in order.

pub mod device;
pub mod filter;
pub mod multiplex;

pub use device::{Access, BlockDevice, DeviceError, DEFAULT_BLOCK_SIZE};
pub use filter::{Filter, FilterFactory};
pub use multiplex::{MultiplexDevice, MultiplexOptions};
