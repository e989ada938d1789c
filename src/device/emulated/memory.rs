use std::{
    mem::size_of,
    sync::{
        atomic::{AtomicU64, Ordering},
        PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use log::trace;

use crate::{try_alloc, Error, MemoryKind, Result};

/// Byte budget of one kind of device-visible memory.
#[derive(Debug)]
pub struct MemoryPool {
    kind: MemoryKind,
    capacity: u64,
    used: AtomicU64,
}

impl MemoryPool {
    pub fn new(kind: MemoryKind, capacity: u64) -> Self {
        Self {
            kind,
            capacity,
            used: AtomicU64::new(0),
        }
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    fn reserve(&self, bytes: u64) -> Result<()> {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&total| total <= self.capacity)
            })
            .map(|_| trace!("reserve memory={} bytes={}", self.kind, bytes))
            .map_err(|used| Error::ResourceExhausted {
                memory: self.kind,
                requested: bytes,
                available: self.capacity.saturating_sub(used),
            })
    }

    fn release(&self, bytes: u64) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
        trace!("release memory={} bytes={}", self.kind, bytes);
    }
}

/// Host samples registered with the device as transfer source.
///
/// The registration is charged to the pinned pool and undone on drop.
pub struct PinnedStaging<'a> {
    samples: &'a [i32],
    pool: &'a MemoryPool,
}

impl<'a> PinnedStaging<'a> {
    pub fn register(pool: &'a MemoryPool, samples: &'a [i32]) -> Result<Self> {
        pool.reserve(byte_len::<i32>(samples.len()))?;
        Ok(Self { samples, pool })
    }

    pub fn as_slice(&self) -> &'a [i32] {
        self.samples
    }
}

impl Drop for PinnedStaging<'_> {
    fn drop(&mut self) {
        self.pool.release(byte_len::<i32>(self.samples.len()));
    }
}

/// Device-resident memory, charged to the global pool until dropped.
///
/// Contents sit behind a lock so that queued commands on another thread can
/// write them while the host keeps a shared reference.
pub struct DeviceBuffer<'a, T> {
    data: RwLock<Box<[T]>>,
    len: usize,
    pool: &'a MemoryPool,
}

impl<'a, T> DeviceBuffer<'a, T> {
    /// Allocates `len` elements produced by `init`. Fresh device memory holds
    /// garbage, so callers pass a fill that a missing initialisation would
    /// expose.
    pub fn alloc_with<F>(pool: &'a MemoryPool, len: usize, init: F) -> Result<Self>
    where
        F: FnMut() -> T,
    {
        let bytes = byte_len::<T>(len);
        pool.reserve(bytes)?;
        let data = match try_alloc(len, init) {
            Ok(data) => data,
            Err(err) => {
                pool.release(bytes);
                return Err(err);
            }
        };
        Ok(Self {
            data: RwLock::new(data.into_boxed_slice()),
            len,
            pool,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Box<[T]>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[T]>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Drop for DeviceBuffer<'_, T> {
    fn drop(&mut self) {
        self.pool.release(byte_len::<T>(self.len));
    }
}

fn byte_len<T>(len: usize) -> u64 {
    (len as u64).saturating_mul(size_of::<T>() as u64)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;

    #[test]
    fn test_pool_accounting() {
        let pool = MemoryPool::new(MemoryKind::Global, 64);
        let a = DeviceBuffer::alloc_with(&pool, 8, || 0u32).unwrap();
        assert_eq!(pool.used(), 32);
        let b = DeviceBuffer::alloc_with(&pool, 8, || AtomicU32::new(0)).unwrap();
        assert_eq!(pool.used(), 64);

        let err = DeviceBuffer::alloc_with(&pool, 1, || 0u32).err().unwrap();
        match err {
            Error::ResourceExhausted {
                memory,
                requested,
                available,
            } => {
                assert_eq!(memory, MemoryKind::Global);
                assert_eq!(requested, 4);
                assert_eq!(available, 0);
            }
            other => panic!("unexpected error {:?}", other),
        }

        drop(a);
        assert_eq!(pool.used(), 32);
        drop(b);
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_pinned_registration() {
        let pool = MemoryPool::new(MemoryKind::Pinned, 16);
        let samples = [1, 2, 3, 4];
        {
            let staging = PinnedStaging::register(&pool, &samples).unwrap();
            assert_eq!(staging.as_slice(), &samples);
            assert_eq!(pool.used(), 16);
            assert!(PinnedStaging::register(&pool, &samples[..1]).is_err());
        }
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_buffer_contents() {
        let pool = MemoryPool::new(MemoryKind::Global, 1024);
        let buffer = DeviceBuffer::alloc_with(&pool, 3, || 7i32).unwrap();
        assert_eq!(buffer.len(), 3);
        assert_eq!(&buffer.read()[..], &[7, 7, 7]);
        buffer.write().copy_from_slice(&[1, 2, 3]);
        assert_eq!(&buffer.read()[..], &[1, 2, 3]);
    }
}
