//! A SIMT device emulated with host threads.
//!
//! Each host worker plays one execution unit at a time, pulling unit indices
//! from a shared counter until the grid is exhausted. A worker owns a single
//! block of on-chip memory that it carries from unit to unit without clearing,
//! just like real hardware hands a new thread group whatever the last one
//! left behind.

pub mod memory;
pub mod stream;

use std::{
    iter,
    sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    thread,
    time::Instant,
};

use log::debug;

use self::{
    memory::{DeviceBuffer, MemoryPool, PinnedStaging},
    stream::Stream,
};
use super::{Device, DeviceCaps};
use crate::{
    kernels::{
        HierarchicalKernel, Kernel, Lane, NaiveKernel, SharedKernel, Strategy, UNINITIALIZED,
    },
    plan::LaunchPlan,
    try_alloc, DeviceConfig, Error, MemoryKind, Result, COUNT_SIZE,
};

const MAX_THREADS_PER_UNIT: usize = 1024;
const RESIDENT_THREADS_PER_UNIT: usize = 2048;

pub struct EmulatedDevice {
    caps: DeviceCaps,
    global: MemoryPool,
    pinned: MemoryPool,
}

impl EmulatedDevice {
    pub fn new(config: &DeviceConfig) -> Result<Self> {
        let execution_units = match config.execution_units {
            Some(units) => units,
            None => thread::available_parallelism()?.get(),
        };
        Ok(Self {
            caps: DeviceCaps {
                execution_units,
                max_threads_per_unit: MAX_THREADS_PER_UNIT,
                resident_threads_per_unit: RESIDENT_THREADS_PER_UNIT,
                shared_memory_per_unit: config.shared_memory,
            },
            global: MemoryPool::new(MemoryKind::Global, config.global_memory),
            pinned: MemoryPool::new(MemoryKind::Pinned, config.pinned_memory),
        })
    }

    pub fn global_memory_in_use(&self) -> u64 {
        self.global.used()
    }

    pub fn pinned_memory_in_use(&self) -> u64 {
        self.pinned.used()
    }

    fn launch(&self, plan: &LaunchPlan, samples: &[i32], histogram: &[AtomicU32]) -> Result<()> {
        let workers = self.caps.execution_units;
        match plan.strategy {
            Strategy::Naive => {
                let fault = AtomicBool::new(false);
                let kernel = NaiveKernel {
                    samples,
                    histogram,
                    fault: &fault,
                };
                execute(plan, workers, &kernel);
                if fault.load(Ordering::Relaxed) {
                    return Err(Error::DeviceFault(format!(
                        "naive kernel addressed a bin outside [0, {})",
                        histogram.len()
                    )));
                }
            }
            Strategy::Shared => execute(plan, workers, &SharedKernel { samples, histogram }),
            Strategy::Hierarchical => execute(
                plan,
                workers,
                &HierarchicalKernel {
                    samples,
                    histogram,
                    local_bins: plan.local_bins,
                },
            ),
        }
        Ok(())
    }
}

impl Device for EmulatedDevice {
    fn name(&self) -> &str {
        "emulated"
    }

    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn histogram(&self, samples: &[i32], bins: usize, plan: &LaunchPlan) -> Result<Vec<u32>> {
        let staging = PinnedStaging::register(&self.pinned, samples)?;
        let device_samples =
            DeviceBuffer::alloc_with(&self.global, samples.len(), || UNINITIALIZED as i32)?;
        let device_histogram =
            DeviceBuffer::alloc_with(&self.global, bins, || AtomicU32::new(UNINITIALIZED))?;
        let mut counts = try_alloc(bins, || 0u32)?;

        thread::scope(|s| -> Result<()> {
            let stream = Stream::new(s);
            let (staging, device_samples, device_histogram) =
                (&staging, &device_samples, &device_histogram);

            stream.enqueue("upload", move || {
                device_samples.write().copy_from_slice(staging.as_slice());
                Ok(())
            })?;
            stream.enqueue("zero_histogram", move || {
                for bin in device_histogram.read().iter() {
                    bin.store(0, Ordering::Relaxed);
                }
                Ok(())
            })?;
            stream.enqueue("launch", move || {
                self.launch(plan, &device_samples.read(), &device_histogram.read())
            })?;
            stream.synchronize()?;

            let counts = &mut counts;
            stream.enqueue("download", move || {
                for (count, bin) in counts.iter_mut().zip(device_histogram.read().iter()) {
                    *count = bin.load(Ordering::Relaxed);
                }
                Ok(())
            })?;
            stream.synchronize()
        })?;

        Ok(counts)
    }
}

/// Runs every unit of `plan` through all phases of `kernel` on up to
/// `workers` host threads, returning once the whole grid has finished.
pub fn execute<K: Kernel>(plan: &LaunchPlan, workers: usize, kernel: &K) {
    let start = Instant::now();
    let next_unit = AtomicUsize::new(0);
    let shared_len = plan.shared_bytes / COUNT_SIZE;
    let workers = workers.clamp(1, plan.units.max(1));

    thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| {
                let shared = iter::repeat_with(|| AtomicU32::new(UNINITIALIZED))
                    .take(shared_len)
                    .collect::<Vec<_>>();
                loop {
                    let unit_idx = next_unit.fetch_add(1, Ordering::Relaxed);
                    if unit_idx >= plan.units {
                        break;
                    }
                    for phase in 0..K::PHASES {
                        for thread_idx in 0..plan.threads_per_unit {
                            let lane = Lane {
                                thread_idx,
                                threads_per_unit: plan.threads_per_unit,
                                unit_idx,
                                units: plan.units,
                                shared: &shared,
                            };
                            kernel.execute(phase, &lane);
                        }
                    }
                }
            });
        }
    });

    debug!(
        "execute strategy={} units={} workers={} elapsed={:.2}ms",
        plan.strategy,
        plan.units,
        workers,
        start.elapsed().as_secs_f64() * 1000.
    );
}
