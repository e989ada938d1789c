//! Sequential ground truth for the device strategies.

use std::time::Instant;

use log::debug;

use crate::{kernels::bin_index, try_alloc, Error, Histogram, Result};

/// Counts `samples` into `bins` bins in a single pass.
///
/// Every sample must lie in `[0, bins)`. The first one that does not is
/// reported as an error.
pub fn count(samples: &[i32], bins: usize) -> Result<Histogram> {
    let start = Instant::now();
    let mut counts = try_alloc(bins, || 0u32)?;
    for (index, &value) in samples.iter().enumerate() {
        let bin = bin_index(value, bins).ok_or(Error::SampleOutOfRange { index, value, bins })?;
        counts[bin] += 1;
    }
    debug!(
        "reference n={} bins={} elapsed={:.2}ms",
        samples.len(),
        bins,
        start.elapsed().as_secs_f64() * 1000.
    );
    Ok(Histogram::from(counts))
}
