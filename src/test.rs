use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    device::{emulated, DeviceCaps},
    kernels::{HierarchicalKernel, Kernel, NaiveKernel, SharedKernel, Strategy},
    plan::{self, LaunchPlan},
    reference, EngineConfig, Histogram, COUNT_SIZE,
};

const WORKERS: usize = 4;

struct Scenario {
    name: &'static str,
    samples: Vec<i32>,
    bins: usize,
    expected: Vec<u32>,
}

fn scenarios() -> Vec<Scenario> {
    let mut scenarios = vec![
        Scenario {
            name: "ten-samples",
            samples: vec![0, 1, 1, 2, 3, 3, 3, 0, 2, 1],
            bins: 4,
            expected: vec![2, 3, 2, 3],
        },
        Scenario {
            name: "empty",
            samples: vec![],
            bins: 5,
            expected: vec![0; 5],
        },
        Scenario {
            name: "single-value",
            samples: vec![0; 5],
            bins: 2,
            expected: vec![5, 0],
        },
        Scenario {
            name: "one-bin",
            samples: vec![0; 777],
            bins: 1,
            expected: vec![777],
        },
    ];
    for (name, samples, bins) in [
        ("skewed", skewed_samples(40_000, 256, 1), 256),
        ("wide", random_samples(20_000, 3000, 2), 3000),
        ("random", random_samples(100_003, 256, 111), 256),
    ] {
        let expected = reference::count(&samples, bins).unwrap().counts().to_vec();
        scenarios.push(Scenario {
            name,
            samples,
            bins,
            expected,
        });
    }
    scenarios
}

/// Checks `compute` against every fixed scenario. Samples are always in range.
pub fn correctness<F>(compute: F)
where
    F: Fn(&[i32], usize) -> Histogram,
{
    for scenario in scenarios() {
        println!("Scenario {}", scenario.name);
        let actual = compute(&scenario.samples, scenario.bins);
        assert_eq!(actual.counts(), &scenario.expected[..], "{}", scenario.name);
    }
}

fn caps() -> DeviceCaps {
    DeviceCaps {
        execution_units: WORKERS,
        max_threads_per_unit: 1024,
        resident_threads_per_unit: 256,
        shared_memory_per_unit: 48 * 1024,
    }
}

/// Plans and runs one kernel launch on host threads, bypassing the transfer
/// pipeline.
pub fn run_kernel(strategy: Strategy, samples: &[i32], bins: usize, local_bins: usize) -> Histogram {
    let config = EngineConfig {
        threads_per_unit: 64,
        local_bins,
        ..Default::default()
    }
    .with_strategy(strategy);
    let plan = plan::plan(samples.len(), bins, &caps(), &config).unwrap();
    let histogram = atomic_zeros(bins);
    match strategy {
        Strategy::Naive => {
            let fault = AtomicBool::new(false);
            let kernel = NaiveKernel {
                samples,
                histogram: &histogram,
                fault: &fault,
            };
            emulated::execute(&plan, WORKERS, &kernel);
            assert!(!fault.load(Ordering::Relaxed), "naive kernel faulted");
        }
        Strategy::Shared => emulated::execute(
            &plan,
            WORKERS,
            &SharedKernel {
                samples,
                histogram: &histogram,
            },
        ),
        Strategy::Hierarchical => emulated::execute(
            &plan,
            WORKERS,
            &HierarchicalKernel {
                samples,
                histogram: &histogram,
                local_bins: plan.local_bins,
            },
        ),
    }
    Histogram::from(load(&histogram))
}

/// Runs `kernel` over a hand-picked geometry with `shared_bins` counters of
/// on-chip memory per unit.
pub fn execute<K: Kernel>(kernel: &K, units: usize, threads_per_unit: usize, shared_bins: usize) {
    let plan = LaunchPlan {
        strategy: if shared_bins == 0 {
            Strategy::Naive
        } else {
            Strategy::Shared
        },
        units,
        threads_per_unit,
        shared_bytes: shared_bins * COUNT_SIZE,
        local_bins: 0,
    };
    emulated::execute(&plan, 2, kernel);
}

pub fn atomic_zeros(n: usize) -> Vec<AtomicU32> {
    (0..n).map(|_| AtomicU32::new(0)).collect()
}

pub fn load(histogram: &[AtomicU32]) -> Vec<u32> {
    histogram
        .iter()
        .map(|bin| bin.load(Ordering::Relaxed))
        .collect()
}

/// Uniform samples in `[0, bins)`.
pub fn random_samples(n: usize, bins: usize, seed: u64) -> Vec<i32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(0..bins as i32)).collect()
}

/// Samples in `[0, bins)` with most of the mass on the first few bins.
pub fn skewed_samples(n: usize, bins: usize, seed: u64) -> Vec<i32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let hot = bins.min(8) as i32;
    (0..n)
        .map(|_| {
            if rng.gen_bool(0.8) {
                rng.gen_range(0..hot)
            } else {
                rng.gen_range(0..bins as i32)
            }
        })
        .collect()
}
