//! Frequency histograms of large integer datasets on a massively parallel
//! device, checked against a sequential reference count.

pub mod config;
pub mod device;
pub mod engine;
mod error;
pub mod harness;
pub mod io;
pub mod kernels;
pub mod plan;
pub mod reference;

#[cfg(test)]
mod test;

use std::{fmt, mem::size_of};

pub use config::{DeviceConfig, EngineConfig};
pub use engine::{compute, Engine};
pub use error::{Error, MemoryKind, Result};
pub use kernels::Strategy;

pub const I32_SIZE: u64 = size_of::<i32>() as u64;
pub const U32_SIZE: u64 = size_of::<u32>() as u64;
/// Bytes of one histogram counter, on the device and on disk.
pub const COUNT_SIZE: usize = size_of::<u32>();

/// An empty vector with room for `len` elements, or `ResourceExhausted` when
/// the host cannot provide it.
pub(crate) fn try_with_capacity<T>(len: usize) -> Result<Vec<T>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| Error::ResourceExhausted {
            memory: MemoryKind::Host,
            requested: (len as u64).saturating_mul(size_of::<T>() as u64),
            available: 0,
        })?;
    Ok(data)
}

/// `len` elements produced by `fill`, allocated without aborting on failure.
pub(crate) fn try_alloc<T, F>(len: usize, fill: F) -> Result<Vec<T>>
where
    F: FnMut() -> T,
{
    let mut data = try_with_capacity(len)?;
    data.resize_with(len, fill);
    Ok(data)
}

/// Sample counts in bin-index order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Histogram {
    counts: Box<[u32]>,
}

impl Histogram {
    pub fn zeros(bins: usize) -> Self {
        Self {
            counts: vec![0; bins].into_boxed_slice(),
        }
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    /// Number of samples counted across all bins.
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }
}

impl From<Vec<u32>> for Histogram {
    fn from(counts: Vec<u32>) -> Self {
        Self {
            counts: counts.into_boxed_slice(),
        }
    }
}

/// Lists the occupied bins, e.g. `{0=2, 3=1}`.
impl fmt::Display for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        let occupied = self.counts.iter().enumerate().filter(|(_, &c)| c > 0);
        for (i, (bin, count)) in occupied.enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_fmt(format_args!("{}={}", bin, count))?;
        }
        f.write_str("}")
    }
}
