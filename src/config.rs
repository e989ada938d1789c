use std::{env, fmt::Display, str::FromStr};

use crate::{
    device::Backend,
    kernels::{Strategy, MAX_LOCAL_BINS},
    Error, Result,
};

pub const DEFAULT_THREADS_PER_UNIT: usize = 256;
pub const DEFAULT_LOCAL_BINS: usize = 32;

const KIB: usize = 1024;
const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Overrides the number of execution units the device reports. Metal does
    /// not expose its core count, so the Metal backend depends on this.
    pub execution_units: Option<usize>,
    /// On-chip memory per execution unit of the emulated device, in bytes.
    pub shared_memory: usize,
    /// Global memory capacity of the emulated device, in bytes.
    pub global_memory: u64,
    /// Host memory the emulated device will accept as pinned staging.
    pub pinned_memory: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            execution_units: None,
            shared_memory: 48 * KIB,
            global_memory: 8 * GIB,
            pinned_memory: 4 * GIB,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub backend: Backend,
    pub strategy: Strategy,
    pub threads_per_unit: usize,
    /// Capacity of the per-thread register accumulator. Bins below this index
    /// never touch on-chip atomics in the hierarchical strategy.
    pub local_bins: usize,
    pub device: DeviceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            strategy: Strategy::Hierarchical,
            threads_per_unit: DEFAULT_THREADS_PER_UNIT,
            local_bins: DEFAULT_LOCAL_BINS,
            device: DeviceConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Default configuration with `HISTOGRAM_*` environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(backend) = env_var("HISTOGRAM_BACKEND")? {
            config.backend = backend;
        }
        if let Some(strategy) = env_var("HISTOGRAM_STRATEGY")? {
            config.strategy = strategy;
        }
        if let Some(threads) = env_var("HISTOGRAM_THREADS_PER_UNIT")? {
            config.threads_per_unit = threads;
        }
        if let Some(local_bins) = env_var("HISTOGRAM_LOCAL_BINS")? {
            config.local_bins = local_bins;
        }
        if let Some(units) = env_var("HISTOGRAM_EXECUTION_UNITS")? {
            config.device.execution_units = Some(units);
        }
        if let Some(bytes) = env_var("HISTOGRAM_SHARED_MEMORY")? {
            config.device.shared_memory = bytes;
        }
        if let Some(bytes) = env_var("HISTOGRAM_GLOBAL_MEMORY")? {
            config.device.global_memory = bytes;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads_per_unit == 0 {
            return Err(Error::config("threads per unit must be positive"));
        }
        if self.local_bins > MAX_LOCAL_BINS {
            return Err(Error::config(format!(
                "local accumulator holds at most {} bins, got {}",
                MAX_LOCAL_BINS, self.local_bins
            )));
        }
        if self.device.execution_units == Some(0) {
            return Err(Error::config("execution unit count must be positive"));
        }
        Ok(())
    }
}

fn env_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    env::var(name)
        .ok()
        .map(|x| {
            x.trim()
                .parse::<T>()
                .map_err(|e| Error::config(format!("{}={:?}: {}", name, x, e)))
        })
        .transpose()
}
