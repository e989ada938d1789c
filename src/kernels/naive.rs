use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::{Kernel, Lane};

/// One lane per sample, each issuing a single global atomic increment.
///
/// Samples are not range-filtered. A sample that addresses a bin outside the
/// histogram raises `fault` instead of being dropped.
pub struct NaiveKernel<'a> {
    pub samples: &'a [i32],
    pub histogram: &'a [AtomicU32],
    pub fault: &'a AtomicBool,
}

impl Kernel for NaiveKernel<'_> {
    const PHASES: usize = 1;

    fn execute(&self, _phase: usize, lane: &Lane<'_>) {
        let Some(&sample) = self.samples.get(lane.global_idx()) else {
            return;
        };
        // Negative samples wrap to huge indices and land in the fault path.
        match self.histogram.get(sample as usize) {
            Some(bin) => {
                bin.fetch_add(1, Ordering::Relaxed);
            }
            None => self.fault.store(true, Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{kernels::Strategy, test};

    #[test]
    fn test_correctness() {
        test::correctness(|samples, bins| test::run_kernel(Strategy::Naive, samples, bins, 0));
    }

    #[test]
    fn test_out_of_range_sample_faults() {
        let histogram = test::atomic_zeros(4);
        let fault = AtomicBool::new(false);
        let kernel = NaiveKernel {
            samples: &[0, 1, 7, 2],
            histogram: &histogram,
            fault: &fault,
        };
        test::execute(&kernel, 1, 8, 0);
        assert!(fault.load(Ordering::Relaxed));
        assert_eq!(test::load(&histogram), vec![1, 1, 1, 0]);

        let fault = AtomicBool::new(false);
        let kernel = NaiveKernel {
            samples: &[-1],
            histogram: &histogram,
            fault: &fault,
        };
        test::execute(&kernel, 1, 1, 0);
        assert!(fault.load(Ordering::Relaxed));
    }

    #[test]
    fn test_surplus_lanes_idle() {
        let histogram = test::atomic_zeros(2);
        let fault = AtomicBool::new(false);
        let kernel = NaiveKernel {
            samples: &[1, 1, 0],
            histogram: &histogram,
            fault: &fault,
        };
        // 4 units x 8 lanes for 3 samples.
        test::execute(&kernel, 4, 8, 0);
        assert!(!fault.load(Ordering::Relaxed));
        assert_eq!(test::load(&histogram), vec![1, 2]);
    }
}
