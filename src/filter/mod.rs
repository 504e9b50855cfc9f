//! Per-block filters and the factories that mint them.
//!
//! A [`Filter`] may renumber a block ([`Filter::map`]) and rewrite its bytes
//! in place ([`Filter::transform`]).  Filters may carry state (a running
//! checksum, a cipher stream), so a [`FilterFactory`] hands every worker its
//! own instances; a filter is never shared between threads.

use crate::device::DeviceError;

pub trait Filter: Send {
    /// Where block `num` ends up.  May return `num` unchanged.
    fn map(&mut self, num: u64) -> u64;

    /// Rewrite `block` (exactly one block long) in place.  `num` is the
    /// already mapped block number.
    fn transform(&mut self, num: u64, block: &mut [u8]) -> Result<(), DeviceError>;
}

impl<F: Filter + ?Sized> Filter for Box<F> {
    fn map(&mut self, num: u64) -> u64 { (**self).map(num) }
    fn transform(&mut self, num: u64, block: &mut [u8]) -> Result<(), DeviceError> {
        (**self).transform(num, block)
    }
}

pub trait FilterFactory {
    /// Called once, before any filter is created.
    fn initialize(&mut self, block_size: usize) -> Result<(), DeviceError>;

    fn create_read(&mut self) -> Box<dyn Filter>;

    fn create_write(&mut self) -> Box<dyn Filter>;
}

/// Leaves numbers and bytes untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Filter for Identity {
    fn map(&mut self, num: u64) -> u64 { num }
    fn transform(&mut self, _: u64, _: &mut [u8]) -> Result<(), DeviceError> { Ok(()) }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityFactory;

impl FilterFactory for IdentityFactory {
    fn initialize(&mut self, _: usize) -> Result<(), DeviceError> { Ok(()) }
    fn create_read(&mut self) -> Box<dyn Filter> { Box::new(Identity) }
    fn create_write(&mut self) -> Box<dyn Filter> { Box::new(Identity) }
}
