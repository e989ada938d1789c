//! The histogram engine: plan, run on a device, persist.

use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use log::debug;

use crate::{
    device::{self, Device},
    io::{self, Samples},
    plan::{self, LaunchPlan},
    try_alloc, EngineConfig, Error, Histogram, Result,
};

pub struct Engine {
    device: Box<dyn Device>,
    config: EngineConfig,
}

impl Engine {
    /// Opens the configured backend.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let device = device::open(config.backend, &config.device)?;
        Ok(Self { device, config })
    }

    /// Uses an already opened device. `config.backend` is ignored.
    pub fn with_device(device: Box<dyn Device>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { device, config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn device(&self) -> &dyn Device {
        self.device.as_ref()
    }

    /// Plans a launch over `n` samples and `bins` bins without touching the
    /// device. Fails with the same error a later run would.
    pub fn plan(&self, n: usize, bins: usize) -> Result<LaunchPlan> {
        // Samples are indexed and counts stored as i32.
        if n > i32::MAX as usize {
            return Err(Error::config(format!(
                "{} samples exceeds the limit of {}",
                n,
                i32::MAX
            )));
        }
        plan::plan(n, bins, &self.device.caps(), &self.config)
    }

    /// Counts `samples` into `bins` bins on the device.
    ///
    /// The launch is planned before anything touches the device, so an
    /// oversized histogram fails without side effects. Empty inputs and zero
    /// bins skip the device entirely.
    pub fn histogram(&self, samples: &[i32], bins: usize) -> Result<Histogram> {
        let plan = self.plan(samples.len(), bins)?;
        if samples.is_empty() || bins == 0 {
            return try_alloc(bins, || 0u32).map(Histogram::from);
        }

        let start = Instant::now();
        let counts = self.device.histogram(samples, bins, &plan)?;
        debug!(
            "histogram device={} strategy={} n={} bins={} elapsed={:.2}ms",
            self.device.name(),
            plan.strategy,
            samples.len(),
            bins,
            start.elapsed().as_secs_f64() * 1000.
        );
        Ok(Histogram::from(counts))
    }

    /// Counts the first `n` samples of the file at `input` into `bins` bins
    /// and writes the result to a new file, whose path is returned.
    pub fn compute(&self, input: impl AsRef<Path>, n: usize, bins: usize) -> Result<PathBuf> {
        let start = Instant::now();
        self.plan(n, bins)?;
        let samples = Samples::open(input, n)?;
        let histogram = self.histogram(samples.as_slice(), bins)?;
        let output = io::write_histogram(&histogram)?;
        debug!(
            "compute n={} bins={} output={} elapsed={:.2}ms",
            n,
            bins,
            output.display(),
            start.elapsed().as_secs_f64() * 1000.
        );
        Ok(output)
    }
}

/// [`Engine::compute`] with the configuration taken from the environment.
pub fn compute(input: impl AsRef<Path>, n: usize, bins: usize) -> Result<PathBuf> {
    Engine::new(EngineConfig::from_env()?)?.compute(input, n, bins)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use proptest::strategy::Strategy as _;
    use proptest::prelude::*;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        device::{Backend, EmulatedDevice},
        reference, test, DeviceConfig, Error, Strategy,
    };

    fn engine(strategy: Strategy) -> Engine {
        let config = EngineConfig {
            backend: Backend::Emulated,
            threads_per_unit: 64,
            device: DeviceConfig {
                execution_units: Some(4),
                ..Default::default()
            },
            ..Default::default()
        };
        Engine::new(config.with_strategy(strategy)).unwrap()
    }

    #[test]
    fn test_correctness() {
        for strategy in Strategy::ALL {
            println!("Strategy {}", strategy);
            let engine = engine(strategy);
            test::correctness(|samples, bins| engine.histogram(samples, bins).unwrap());
        }
    }

    #[test]
    fn test_out_of_range_samples_dropped() {
        let samples = [0, -5, 1, 7, 1, i32::MAX, 3, 4];
        for strategy in [Strategy::Shared, Strategy::Hierarchical] {
            let histogram = engine(strategy).histogram(&samples, 4).unwrap();
            assert_eq!(histogram.counts(), &[1, 2, 0, 1]);
            assert_eq!(histogram.total(), 4);
        }
        let err = engine(Strategy::Naive).histogram(&samples, 4).unwrap_err();
        assert!(matches!(err, Error::DeviceFault(_)));
    }

    #[test]
    fn test_zero_bins() {
        for strategy in Strategy::ALL {
            let histogram = engine(strategy).histogram(&[1, 2, 3], 0).unwrap();
            assert_eq!(histogram.bins(), 0);
        }
    }

    #[test]
    fn test_idempotent() {
        let engine = engine(Strategy::Hierarchical);
        let samples = test::skewed_samples(30_000, 100, 9);
        let first = engine.histogram(&samples, 100).unwrap();
        let second = engine.histogram(&samples, 100).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_oversized_histogram_rejected_before_device_work() {
        let device = EmulatedDevice::new(&DeviceConfig {
            execution_units: Some(2),
            shared_memory: 64,
            global_memory: 0,
            pinned_memory: 0,
        })
        .unwrap();
        let engine = Engine::with_device(Box::new(device), EngineConfig::default()).unwrap();
        let err = engine.histogram(&[0, 1], 17).unwrap_err();
        assert!(matches!(err, Error::SharedMemoryExceeded { bins: 17, .. }));

        // Empty input is still held to the same limit.
        assert!(engine.histogram(&[], 17).is_err());
    }

    #[test]
    fn test_sample_count_bounded() {
        let engine = engine(Strategy::Hierarchical);
        assert!(engine.plan(i32::MAX as usize, 4).is_ok());
        let err = engine.plan(i32::MAX as usize + 1, 4).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        // Rejected before the input is opened.
        let dir = TempDir::new().unwrap();
        let err = engine
            .compute(dir.path().join("missing.dat"), i32::MAX as usize + 1, 4)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_compute_file() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input.dat");
        io::write_values(&input, &[0, 1, 1, 2, 3, 3, 3, 0, 2, 1]).unwrap();

        let output = engine(Strategy::Hierarchical).compute(&input, 10, 4).unwrap();
        assert_eq!(io::read_counts(&output, 4).unwrap(), vec![2, 3, 2, 3]);
        fs::remove_file(output).unwrap();

        let output = engine(Strategy::Shared).compute(&input, 0, 5).unwrap();
        assert_eq!(io::read_counts(&output, 5).unwrap(), vec![0; 5]);
        fs::remove_file(output).unwrap();
    }

    #[test]
    fn test_compute_missing_input() {
        let dir = TempDir::new().unwrap();
        let err = engine(Strategy::Hierarchical)
            .compute(dir.path().join("missing.dat"), 10, 4)
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_strategies_agree_with_reference(
            (bins, samples) in (1usize..300).prop_flat_map(|bins| {
                (Just(bins), prop::collection::vec(0..bins as i32, 0..5000))
            })
        ) {
            let expected = reference::count(&samples, bins).unwrap();
            for strategy in Strategy::ALL {
                let actual = engine(strategy).histogram(&samples, bins).unwrap();
                prop_assert_eq!(&actual, &expected, "strategy={}", strategy);
            }
        }

        #[test]
        fn test_total_counts_in_range_samples(
            samples in prop::collection::vec(-50i32..150, 0..5000),
            bins in 1usize..100,
        ) {
            let in_range = samples.iter().filter(|&&s| s >= 0 && (s as usize) < bins).count();
            for strategy in [Strategy::Shared, Strategy::Hierarchical] {
                let histogram = engine(strategy).histogram(&samples, bins).unwrap();
                prop_assert_eq!(histogram.total(), in_range as u64);
            }
        }
    }
}
