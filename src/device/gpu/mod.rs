//! The system GPU through Metal.
//!
//! Apple GPUs share memory with the host, so the staging buffer wraps the
//! caller's samples without a copy whenever they are page aligned, which is
//! always the case for a memory-mapped input. The samples are then blitted
//! into a private buffer, mirroring the upload of a discrete device.

use std::{env, ffi, mem::size_of, time::Instant};

use log::{debug, warn};
use metal::{
    objc::rc::autoreleasepool, Buffer, CommandBufferRef, CommandQueue, ComputePipelineState,
    MTLCommandBufferStatus, MTLResourceOptions, MTLSize, NSRange,
};

use super::{Device, DeviceCaps};
use crate::{
    kernels::Strategy, plan::LaunchPlan, DeviceConfig, Error, MemoryKind, Result, I32_SIZE,
    U32_SIZE,
};

const METALLIB: &str = concat!(env!("OUT_DIR"), "/histogram.metallib");
const PAGE_SIZE: usize = 16 * 1024;
/// Metal does not report its core count.
const DEFAULT_EXECUTION_UNITS: usize = 8;
const RESIDENT_THREADS_PER_UNIT: usize = 2048;

#[repr(C)]
struct KernelParams {
    n: u32,
    bins: u32,
    local_bins: u32,
}

pub struct MetalDevice {
    device: metal::Device,
    queue: CommandQueue,
    naive: ComputePipelineState,
    shared: ComputePipelineState,
    hierarchical: ComputePipelineState,
    caps: DeviceCaps,
}

impl MetalDevice {
    pub fn new(config: &DeviceConfig) -> Result<Self> {
        let device = metal::Device::system_default()
            .ok_or_else(|| Error::DeviceUnavailable("no Metal device found".to_string()))?;
        let library = device
            .new_library_with_file(METALLIB)
            .map_err(Error::DeviceUnavailable)?;
        let pipeline = |name: &str| {
            let function = library
                .get_function(name, None)
                .map_err(Error::DeviceUnavailable)?;
            device
                .new_compute_pipeline_state_with_function(&function)
                .map_err(Error::DeviceUnavailable)
        };
        let naive = pipeline("histogram_naive")?;
        let shared = pipeline("histogram_shared")?;
        let hierarchical = pipeline("histogram_hierarchical")?;

        let max_threads_per_unit = [&naive, &shared, &hierarchical]
            .iter()
            .map(|p| p.max_total_threads_per_threadgroup() as usize)
            .min()
            .unwrap_or(1);
        let caps = DeviceCaps {
            execution_units: config.execution_units.unwrap_or(DEFAULT_EXECUTION_UNITS),
            max_threads_per_unit,
            resident_threads_per_unit: RESIDENT_THREADS_PER_UNIT,
            shared_memory_per_unit: device.max_threadgroup_memory_length() as usize,
        };
        Ok(Self {
            queue: device.new_command_queue(),
            device,
            naive,
            shared,
            hierarchical,
            caps,
        })
    }

    fn pipeline(&self, strategy: Strategy) -> &ComputePipelineState {
        match strategy {
            Strategy::Naive => &self.naive,
            Strategy::Shared => &self.shared,
            Strategy::Hierarchical => &self.hierarchical,
        }
    }

    fn check_buffer_len(&self, bytes: u64) -> Result<()> {
        let available = self.device.max_buffer_length();
        if bytes > available {
            return Err(Error::ResourceExhausted {
                memory: MemoryKind::Global,
                requested: bytes,
                available,
            });
        }
        Ok(())
    }

    /// Wraps `samples` without copying when Metal allows it.
    fn staging_buffer(&self, samples: &[i32]) -> Buffer {
        let bytes = samples.len() * size_of::<i32>();
        if samples.as_ptr() as usize % PAGE_SIZE == 0 && bytes % PAGE_SIZE == 0 {
            device_buffer(&self.device, samples)
        } else {
            self.device.new_buffer_with_data(
                c_void(samples.as_ptr()),
                bytes as u64,
                MTLResourceOptions::StorageModeShared,
            )
        }
    }
}

impl Device for MetalDevice {
    fn name(&self) -> &str {
        self.device.name()
    }

    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn histogram(&self, samples: &[i32], bins: usize, plan: &LaunchPlan) -> Result<Vec<u32>> {
        if samples.is_empty() || bins == 0 {
            return Ok(vec![0; bins]);
        }
        let params = KernelParams {
            n: u32::try_from(samples.len())
                .ok()
                .filter(|&n| n <= i32::MAX as u32)
                .ok_or_else(|| Error::config("Metal kernels index at most 2^31 - 1 samples"))?,
            bins: u32::try_from(bins).map_err(|_| Error::config("too many bins"))?,
            local_bins: plan.local_bins as u32,
        };
        let samples_len = samples.len() as u64 * I32_SIZE;
        let histogram_len = bins as u64 * U32_SIZE;
        self.check_buffer_len(samples_len)?;
        self.check_buffer_len(histogram_len)?;

        autoreleasepool(|| -> Result<Vec<u32>> {
            let _guard = metal_frame_capture(&self.device);
            let private = MTLResourceOptions::StorageModePrivate;

            let start = Instant::now();
            let staging = self.staging_buffer(samples);
            let device_samples = self.device.new_buffer(samples_len, private);
            let device_histogram = self.device.new_buffer(histogram_len, private);
            let fault = self.device.new_buffer_with_data(
                c_void(&0u32),
                U32_SIZE,
                MTLResourceOptions::StorageModeShared,
            );

            // Upload, zero, launch: one ordered command buffer.
            let cmd_buf = self.queue.new_command_buffer();
            let blit = cmd_buf.new_blit_command_encoder();
            blit.copy_from_buffer(&staging, 0, &device_samples, 0, samples_len);
            blit.fill_buffer(&device_histogram, NSRange::new(0, histogram_len), 0);
            blit.end_encoding();

            let encoder = cmd_buf.new_compute_command_encoder();
            encoder.set_compute_pipeline_state(self.pipeline(plan.strategy));
            encoder.set_buffer(0, Some(&device_samples), 0);
            encoder.set_buffer(1, Some(&device_histogram), 0);
            encoder.set_buffer(2, Some(&fault), 0);
            encoder.set_bytes(3, size_of::<KernelParams>() as u64, c_void(&params));
            if plan.shared_bytes > 0 {
                let shared_bytes = plan.shared_bytes.next_multiple_of(16) as u64;
                encoder.set_threadgroup_memory_length(0, shared_bytes);
            }
            encoder.dispatch_thread_groups(
                MTLSize::new(plan.units as u64, 1, 1),
                MTLSize::new(plan.threads_per_unit as u64, 1, 1),
            );
            encoder.end_encoding();
            commit_and_wait(cmd_buf, "launch")?;
            debug!(
                "metal launch units={} threads_per_unit={} elapsed={:.2}ms",
                plan.units,
                plan.threads_per_unit,
                start.elapsed().as_secs_f64() * 1000.
            );

            if unsafe { *(fault.contents() as *const u32) } != 0 {
                return Err(Error::DeviceFault(format!(
                    "naive kernel addressed a bin outside [0, {})",
                    bins
                )));
            }

            let readback = self
                .device
                .new_buffer(histogram_len, MTLResourceOptions::StorageModeShared);
            let cmd_buf = self.queue.new_command_buffer();
            let blit = cmd_buf.new_blit_command_encoder();
            blit.copy_from_buffer(&device_histogram, 0, &readback, 0, histogram_len);
            blit.end_encoding();
            commit_and_wait(cmd_buf, "download")?;

            let counts =
                unsafe { std::slice::from_raw_parts(readback.contents() as *const u32, bins) };
            Ok(counts.to_vec())
        })
    }
}

fn commit_and_wait(cmd_buf: &CommandBufferRef, label: &str) -> Result<()> {
    cmd_buf.commit();
    cmd_buf.wait_until_completed();
    match cmd_buf.status() {
        MTLCommandBufferStatus::Completed => Ok(()),
        status => Err(Error::DeviceFault(format!(
            "{} command buffer ended with {:?}",
            label, status
        ))),
    }
}

fn c_void<T>(value: *const T) -> *const ffi::c_void {
    value as *const ffi::c_void
}

fn device_buffer<T>(device: &metal::Device, buf: &[T]) -> Buffer {
    device.new_buffer_with_bytes_no_copy(
        c_void(buf.as_ptr()),
        (buf.len() * size_of::<T>()) as u64,
        MTLResourceOptions::StorageModeShared,
        None,
    )
}

struct MetalCaptureGuard;

impl Drop for MetalCaptureGuard {
    fn drop(&mut self) {
        metal::CaptureManager::shared().stop_capture();
    }
}

/// Records a GPU trace to `METAL_CAPTURE_PATH` while the guard lives, if
/// `METAL_CAPTURE_ENABLED=1`.
fn metal_frame_capture(device: &metal::Device) -> Option<MetalCaptureGuard> {
    if !env::var("METAL_CAPTURE_ENABLED")
        .ok()
        .is_some_and(|x| &x == "1")
    {
        return None;
    }
    let output_url =
        env::var("METAL_CAPTURE_PATH").unwrap_or_else(|_| "histogram.gputrace".to_string());
    let capture_manager = metal::CaptureManager::shared();
    let capture_descriptor = metal::CaptureDescriptor::new();
    capture_descriptor.set_capture_device(device);
    capture_descriptor.set_output_url(&output_url);
    capture_descriptor.set_destination(metal::MTLCaptureDestination::GpuTraceDocument);

    match capture_manager.start_capture(&capture_descriptor) {
        Ok(()) => Some(MetalCaptureGuard),
        Err(err) => {
            warn!("metal capture to {} failed: {}", output_url, err);
            None
        }
    }
}
