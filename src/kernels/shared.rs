use std::sync::atomic::{AtomicU32, Ordering};

use super::{bin_index, flush_shared, zero_shared, Kernel, Lane};

/// Grid-stride accumulation into a per-unit on-chip histogram, folded into
/// the global histogram once every lane of the unit is done.
///
/// Samples outside `[0, bins)` are dropped.
pub struct SharedKernel<'a> {
    pub samples: &'a [i32],
    pub histogram: &'a [AtomicU32],
}

impl Kernel for SharedKernel<'_> {
    const PHASES: usize = 3;

    fn execute(&self, phase: usize, lane: &Lane<'_>) {
        let bins = self.histogram.len();
        match phase {
            0 => zero_shared(lane, bins),
            1 => {
                let stride = lane.grid_size();
                for i in (lane.global_idx()..self.samples.len()).step_by(stride) {
                    if let Some(bin) = bin_index(self.samples[i], bins) {
                        lane.shared[bin].fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            _ => flush_shared(lane, self.histogram),
        }
    }
}
