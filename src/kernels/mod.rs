//! Histogram kernels for the emulated device.
//!
//! A launch is `units` execution units of `threads_per_unit` lanes each. The
//! lanes of one unit share a block of on-chip memory and meet at barriers. A
//! kernel is cut at its barriers into phases, and the executor runs every
//! lane of a unit through phase `k` before any lane of that unit starts phase
//! `k + 1`. Lanes of different units never synchronise.

pub mod hierarchical;
pub mod naive;
pub mod shared;

use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicU32, Ordering},
};

pub use hierarchical::HierarchicalKernel;
pub use naive::NaiveKernel;
pub use shared::SharedKernel;

/// Samples each lane fetches per grid-stride step before classifying any.
pub const UNROLL: usize = 12;
/// Largest register accumulator a lane can hold.
pub const MAX_LOCAL_BINS: usize = 64;
/// Fill value of freshly allocated device and on-chip memory.
pub const UNINITIALIZED: u32 = 0xCDCD_CDCD;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// One lane per sample, global atomics only.
    Naive,
    /// Per-unit on-chip accumulator, folded into global memory at unit exit.
    Shared,
    /// Register accumulator for the lowest bins on top of `Shared`.
    Hierarchical,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Strategy::Naive, Strategy::Shared, Strategy::Hierarchical];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Naive => "naive",
            Strategy::Shared => "shared",
            Strategy::Hierarchical => "hierarchical",
        }
    }

    pub fn uses_shared_memory(&self) -> bool {
        !matches!(self, Strategy::Naive)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| "unknown strategy, expected one of naive, shared, hierarchical".to_string())
    }
}

/// One thread of a launch, as seen by a kernel.
pub struct Lane<'a> {
    pub thread_idx: usize,
    pub threads_per_unit: usize,
    pub unit_idx: usize,
    pub units: usize,
    /// On-chip memory of this lane's execution unit.
    pub shared: &'a [AtomicU32],
}

impl Lane<'_> {
    pub fn global_idx(&self) -> usize {
        self.unit_idx * self.threads_per_unit + self.thread_idx
    }

    /// Total lanes in the launch, the step of a grid-stride loop.
    pub fn grid_size(&self) -> usize {
        self.units * self.threads_per_unit
    }
}

pub trait Kernel: Sync {
    /// Number of barrier-separated phases.
    const PHASES: usize;

    fn execute(&self, phase: usize, lane: &Lane<'_>);
}

/// Bin of `sample`, or `None` when it falls outside `[0, bins)`.
#[inline]
pub(crate) fn bin_index(sample: i32, bins: usize) -> Option<usize> {
    usize::try_from(sample).ok().filter(|&bin| bin < bins)
}

/// Lanes clear disjoint strided slices of the unit's on-chip accumulator.
pub(crate) fn zero_shared(lane: &Lane<'_>, bins: usize) {
    for bin in (lane.thread_idx..bins).step_by(lane.threads_per_unit) {
        lane.shared[bin].store(0, Ordering::Relaxed);
    }
}

/// Lanes fold disjoint strided slices of the on-chip accumulator into the
/// global histogram. Empty bins are skipped to keep global atomics down.
pub(crate) fn flush_shared(lane: &Lane<'_>, histogram: &[AtomicU32]) {
    for bin in (lane.thread_idx..histogram.len()).step_by(lane.threads_per_unit) {
        let count = lane.shared[bin].load(Ordering::Relaxed);
        if count != 0 {
            histogram[bin].fetch_add(count, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("naive".parse::<Strategy>(), Ok(Strategy::Naive));
        assert_eq!("Shared".parse::<Strategy>(), Ok(Strategy::Shared));
        assert_eq!("HIERARCHICAL".parse::<Strategy>(), Ok(Strategy::Hierarchical));
        assert!("atomic".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_bin_index() {
        assert_eq!(bin_index(0, 4), Some(0));
        assert_eq!(bin_index(3, 4), Some(3));
        assert_eq!(bin_index(4, 4), None);
        assert_eq!(bin_index(-1, 4), None);
        assert_eq!(bin_index(i32::MIN, 4), None);
        assert_eq!(bin_index(0, 0), None);
    }

    #[test]
    fn test_lane_indices() {
        let shared: [AtomicU32; 0] = [];
        let lane = Lane {
            thread_idx: 3,
            threads_per_unit: 8,
            unit_idx: 2,
            units: 5,
            shared: &shared,
        };
        assert_eq!(lane.global_idx(), 19);
        assert_eq!(lane.grid_size(), 40);
    }
}
