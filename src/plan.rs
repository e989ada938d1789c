//! Launch geometry from device capabilities.

use log::debug;

use crate::{
    device::DeviceCaps,
    kernels::{Strategy, UNROLL},
    EngineConfig, Error, Result, COUNT_SIZE,
};

/// Everything a device needs to launch one histogram kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchPlan {
    pub strategy: Strategy,
    pub units: usize,
    pub threads_per_unit: usize,
    /// On-chip memory requested per execution unit.
    pub shared_bytes: usize,
    /// Register accumulator capacity; zero outside the hierarchical strategy.
    pub local_bins: usize,
}

impl LaunchPlan {
    pub fn total_threads(&self) -> usize {
        self.units * self.threads_per_unit
    }
}

/// Derives the launch for `n` samples over `bins` bins.
///
/// The naive strategy gets one lane per sample. The on-chip strategies take
/// the smaller of two unit counts: enough units to saturate the device, and
/// enough to give every lane a full unrolled batch. Fails before any device
/// work when the on-chip histogram does not fit one execution unit.
pub fn plan(n: usize, bins: usize, caps: &DeviceCaps, config: &EngineConfig) -> Result<LaunchPlan> {
    let strategy = config.strategy;
    let threads_per_unit = config.threads_per_unit.min(caps.max_threads_per_unit).max(1);

    let plan = if strategy.uses_shared_memory() {
        let shared_bytes = bins.saturating_mul(COUNT_SIZE);
        if shared_bytes > caps.shared_memory_per_unit {
            return Err(Error::SharedMemoryExceeded {
                bins,
                required: shared_bytes,
                available: caps.shared_memory_per_unit,
            });
        }
        let occupancy_units =
            (caps.execution_units * caps.resident_threads_per_unit).div_ceil(threads_per_unit);
        let work_units = n.div_ceil(threads_per_unit * UNROLL);
        LaunchPlan {
            strategy,
            units: occupancy_units.min(work_units).max(1),
            threads_per_unit,
            shared_bytes,
            local_bins: match strategy {
                Strategy::Hierarchical => config.local_bins,
                _ => 0,
            },
        }
    } else {
        LaunchPlan {
            strategy,
            units: n.div_ceil(threads_per_unit).max(1),
            threads_per_unit,
            shared_bytes: 0,
            local_bins: 0,
        }
    };

    debug!(
        "plan strategy={} n={} bins={} units={} threads_per_unit={} shared_bytes={}",
        strategy, n, bins, plan.units, plan.threads_per_unit, plan.shared_bytes
    );
    Ok(plan)
}
