use std::sync::atomic::{AtomicU32, Ordering};

use seq_macro::seq;

use super::{bin_index, flush_shared, zero_shared, Kernel, Lane, MAX_LOCAL_BINS, UNROLL};

const _: () = assert!(UNROLL == 12, "batch stages below are unrolled for 12 samples");

/// Three-tier accumulation: lane registers, then unit on-chip memory, then
/// global memory.
///
/// Each lane keeps private counters for bins `[0, local_bins)` and sends every
/// other in-range sample to the unit's on-chip histogram. The two paths are
/// disjoint, so the result does not depend on how skewed the samples are.
/// Samples outside `[0, bins)` are dropped.
pub struct HierarchicalKernel<'a> {
    pub samples: &'a [i32],
    pub histogram: &'a [AtomicU32],
    pub local_bins: usize,
}

impl HierarchicalKernel<'_> {
    fn accumulate(&self, lane: &Lane<'_>) {
        let n = self.samples.len();
        let bins = self.histogram.len();
        let local_bins = self.local_bins.min(bins).min(MAX_LOCAL_BINS);
        let stride = lane.grid_size();
        let mut local = [0u32; MAX_LOCAL_BINS];

        let mut base = lane.global_idx();
        while base < n {
            // Issue every load of the batch before consuming any of them.
            let mut batch = [-1i32; UNROLL];
            seq!(K in 0..12 {
                if let Some(&sample) = self.samples.get(base + K * stride) {
                    batch[K] = sample;
                }
            });
            seq!(K in 0..12 {
                if let Some(bin) = bin_index(batch[K], bins) {
                    if bin < local_bins {
                        local[bin] += 1;
                    } else {
                        lane.shared[bin].fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
            base += stride * UNROLL;
        }

        for (bin, &count) in local[..local_bins].iter().enumerate() {
            if count != 0 {
                lane.shared[bin].fetch_add(count, Ordering::Relaxed);
            }
        }
    }
}

impl Kernel for HierarchicalKernel<'_> {
    const PHASES: usize = 3;

    fn execute(&self, phase: usize, lane: &Lane<'_>) {
        match phase {
            0 => zero_shared(lane, self.histogram.len()),
            1 => self.accumulate(lane),
            _ => flush_shared(lane, self.histogram),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{kernels::Strategy, reference, test};

    #[test]
    fn test_correctness() {
        test::correctness(|samples, bins| {
            test::run_kernel(Strategy::Hierarchical, samples, bins, 32)
        });
    }

    #[test]
    fn test_local_capacity_does_not_change_result() {
        let samples = test::skewed_samples(50_000, 300, 7);
        let expected = reference::count(&samples, 300).unwrap();
        for local_bins in [0, 1, 16, 32, 64] {
            let actual = test::run_kernel(Strategy::Hierarchical, &samples, 300, local_bins);
            assert_eq!(actual, expected, "local_bins={}", local_bins);
        }
    }

    #[test]
    fn test_fewer_bins_than_local_capacity() {
        // Values in [bins, local_bins) must still be dropped.
        let histogram = test::atomic_zeros(4);
        let kernel = HierarchicalKernel {
            samples: &[0, 3, 4, 5, 31, 3, -2],
            histogram: &histogram,
            local_bins: 32,
        };
        test::execute(&kernel, 1, 4, 4);
        assert_eq!(test::load(&histogram), vec![1, 0, 0, 2]);
    }

    #[test]
    fn test_partial_batches() {
        // Sample counts that leave the last grid-stride batch partly empty.
        for n in [1, 11, 12, 13, 95, 96, 97, 1000] {
            let samples = (0..n).map(|i| (i % 40) as i32).collect::<Vec<_>>();
            let expected = reference::count(&samples, 40).unwrap();
            let histogram = test::atomic_zeros(40);
            let kernel = HierarchicalKernel {
                samples: &samples,
                histogram: &histogram,
                local_bins: 32,
            };
            test::execute(&kernel, 2, 4, 40);
            assert_eq!(test::load(&histogram), expected.counts(), "n={}", n);
        }
    }
}
