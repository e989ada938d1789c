//! Compute devices and capability negotiation.

pub mod emulated;
#[cfg(target_os = "macos")]
pub mod gpu;

use std::{fmt, str::FromStr};

use log::info;

use crate::{plan::LaunchPlan, DeviceConfig, Result};

pub use emulated::EmulatedDevice;

/// What the planner needs to know about a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCaps {
    /// Execution units that run concurrently.
    pub execution_units: usize,
    pub max_threads_per_unit: usize,
    /// Threads one execution unit keeps in flight at full occupancy.
    pub resident_threads_per_unit: usize,
    /// On-chip memory available to one execution unit, in bytes.
    pub shared_memory_per_unit: usize,
}

pub trait Device {
    fn name(&self) -> &str;

    fn caps(&self) -> DeviceCaps;

    /// Runs one complete computation: stage and upload `samples`, zero a
    /// `bins`-long device histogram, launch `plan`, and download the counts.
    ///
    /// Every resource acquired here is released before returning, on success
    /// and on failure alike.
    fn histogram(&self, samples: &[i32], bins: usize, plan: &LaunchPlan) -> Result<Vec<u32>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Host threads emulating a SIMT device. Available everywhere.
    Emulated,
    /// The system GPU through Metal. macOS only.
    Metal,
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(target_os = "macos") {
            Backend::Metal
        } else {
            Backend::Emulated
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Emulated => "emulated",
            Backend::Metal => "metal",
        })
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "emulated" => Ok(Backend::Emulated),
            "metal" => Ok(Backend::Metal),
            _ => Err("unknown backend, expected emulated or metal".to_string()),
        }
    }
}

/// Opens the device behind `backend`.
pub fn open(backend: Backend, config: &DeviceConfig) -> Result<Box<dyn Device>> {
    let device: Box<dyn Device> = match backend {
        Backend::Emulated => Box::new(EmulatedDevice::new(config)?),
        #[cfg(target_os = "macos")]
        Backend::Metal => Box::new(gpu::MetalDevice::new(config)?),
        #[cfg(not(target_os = "macos"))]
        Backend::Metal => {
            return Err(crate::Error::DeviceUnavailable(
                "the Metal backend requires macOS".to_string(),
            ))
        }
    };
    info!(
        "opened device backend={} name={} caps={:?}",
        backend,
        device.name(),
        device.caps()
    );
    Ok(device)
}
