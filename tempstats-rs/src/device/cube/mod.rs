//! CubeCL backend on the wgpu runtime
//!
//! The kernels use 64-bit integers in shared memory, so the adapter must
//! support `SHADER_INT64` (Vulkan and Metal adapters generally do).

mod kernels;

use super::{validate_launch, ComputeDevice, DeviceInfo, KernelLaunch, Program};
use crate::error::{status, Result, TempStatsError};
use cubecl::prelude::*;
use cubecl::server::Handle;
use cubecl::wgpu::{WgpuDevice, WgpuRuntime};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

static ADAPTER_CHECKED: AtomicBool = AtomicBool::new(false);
static ADAPTER_AVAILABLE: AtomicBool = AtomicBool::new(false);

/// Whether a wgpu adapter can be opened on this machine
///
/// The wgpu runtime panics when no adapter exists, so the first call probes
/// it once and caches the answer.
pub fn is_available() -> bool {
    if ADAPTER_CHECKED.load(Ordering::Relaxed) {
        return ADAPTER_AVAILABLE.load(Ordering::Relaxed);
    }
    let available = catch_unwind(AssertUnwindSafe(|| {
        let _client = WgpuRuntime::client(&WgpuDevice::DefaultDevice);
    }))
    .is_ok();
    if !available {
        warn!("no wgpu adapter available");
    }
    ADAPTER_AVAILABLE.store(available, Ordering::Relaxed);
    ADAPTER_CHECKED.store(true, Ordering::Relaxed);
    available
}

/// Workgroup limit assumed for wgpu adapters (WebGPU default)
const WGPU_MAX_WORKGROUP_SIZE: usize = 256;
const WGPU_LOCAL_MEMORY_BYTES: usize = 16 * 1024;
/// Per-dimension dispatch limit of a wgpu adapter (WebGPU default)
const WGPU_MAX_WORKGROUPS: usize = 65_535;

/// Device slots addressable with `-d` on the CubeCL platform
const DEVICE_SLOTS: [&str; 4] = ["default adapter", "discrete GPU 0", "integrated GPU 0", "CPU adapter"];

fn wgpu_device(device_id: usize) -> Option<WgpuDevice> {
    match device_id {
        0 => Some(WgpuDevice::DefaultDevice),
        1 => Some(WgpuDevice::DiscreteGpu(0)),
        2 => Some(WgpuDevice::IntegratedGpu(0)),
        3 => Some(WgpuDevice::Cpu),
        _ => None,
    }
}

/// Device memory handle and its element count
pub struct CubeclBuffer {
    handle: Handle,
    len: usize,
}

impl CubeclBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for CubeclBuffer {
    fn drop(&mut self) {
        trace!(len = self.len, "releasing device buffer");
    }
}

/// A wgpu adapter driven through CubeCL
pub struct CubeclDevice {
    device: WgpuDevice,
    info: DeviceInfo,
}

impl CubeclDevice {
    pub fn new(device_id: usize) -> Result<Self> {
        let device = wgpu_device(device_id).ok_or_else(|| {
            TempStatsError::device(
                status::INVALID_DEVICE,
                format!(
                    "platform 1 has {} devices, requested device {}",
                    DEVICE_SLOTS.len(),
                    device_id
                ),
            )
        })?;
        if !is_available() {
            return Err(TempStatsError::device(
                status::INVALID_DEVICE,
                "no wgpu adapter could be opened",
            ));
        }
        Ok(Self {
            device,
            info: Self::describe(device_id),
        })
    }

    fn describe(device_id: usize) -> DeviceInfo {
        DeviceInfo {
            name: format!("wgpu {}", DEVICE_SLOTS[device_id]),
            vendor: "wgpu".to_string(),
            platform: "CubeCL (wgpu)".to_string(),
            max_workgroup_size: WGPU_MAX_WORKGROUP_SIZE,
            max_workgroups: WGPU_MAX_WORKGROUPS,
            local_memory_bytes: WGPU_LOCAL_MEMORY_BYTES,
            compute_units: 0,
        }
    }

    /// Every device slot; slots are marked when no adapter can be opened
    pub(crate) fn describe_all() -> Vec<DeviceInfo> {
        let available = is_available();
        (0..DEVICE_SLOTS.len())
            .map(|device_id| {
                let mut info = Self::describe(device_id);
                if !available {
                    info.name.push_str(" (no adapter)");
                }
                info
            })
            .collect()
    }

    /// Launch one kernel; used both for real work and for the build probe
    fn dispatch(
        &self,
        entry_point: &str,
        input: &CubeclBuffer,
        output: &CubeclBuffer,
        workgroups: u32,
        local_size: u32,
        mean: i64,
    ) -> std::result::Result<(), String> {
        let client = WgpuRuntime::client(&self.device);
        let cube_count = CubeCount::Static(workgroups, 1, 1);
        let cube_dim = CubeDim::new_1d(local_size);
        let input_arg = unsafe { ArrayArg::from_raw_parts::<i32>(&input.handle, input.len, 1) };
        let output_arg = unsafe { ArrayArg::from_raw_parts::<i64>(&output.handle, output.len, 1) };

        let launched = unsafe {
            match entry_point {
                "minimum" => kernels::minimum::launch_unchecked::<WgpuRuntime>(
                    &client, cube_count, cube_dim, input_arg, output_arg, local_size,
                ),
                "maximum" => kernels::maximum::launch_unchecked::<WgpuRuntime>(
                    &client, cube_count, cube_dim, input_arg, output_arg, local_size,
                ),
                "reduce_add_4" => kernels::reduce_add_4::launch_unchecked::<WgpuRuntime>(
                    &client, cube_count, cube_dim, input_arg, output_arg, local_size,
                ),
                "standardDeviation" => kernels::standard_deviation::launch_unchecked::<WgpuRuntime>(
                    &client,
                    cube_count,
                    cube_dim,
                    input_arg,
                    output_arg,
                    ScalarArg::new(mean),
                    local_size,
                ),
                other => return Err(format!("unknown entry point '{}'", other)),
            }
        };
        launched.map_err(|e| format!("{:?}", e))
    }

    /// Block until every queued command has finished
    ///
    /// Reading a fresh buffer back waits on the queue; a short read means the
    /// queue did not drain.
    fn finish(&self) -> Result<()> {
        let client = WgpuRuntime::client(&self.device);
        let expected = std::mem::size_of::<i64>();
        let synced = client.read_one(client.empty(expected));
        if synced.len() != expected {
            return Err(TempStatsError::device(
                status::OUT_OF_RESOURCES,
                format!(
                    "queue sync on {} returned {} of {} bytes",
                    self.info.name,
                    synced.len(),
                    expected
                ),
            ));
        }
        Ok(())
    }
}

impl ComputeDevice for CubeclDevice {
    type InputBuffer = CubeclBuffer;
    type OutputBuffer = CubeclBuffer;

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Compile every entry point by launching it once on a single workgroup
    fn build_program(&self) -> Result<Program> {
        let options = "local_size=1, elem=i32, acc=i64".to_string();
        let probe_input = self.create_input(&[0])?;
        let probe_output = self.create_output(1)?;
        let entry_points = super::required_entry_points();

        for entry_point in &entry_points {
            self.dispatch(entry_point, &probe_input, &probe_output, 1, 1, 0)
                .map_err(|log| TempStatsError::Build {
                    status: format!("failed to compile '{}'", entry_point),
                    options: options.clone(),
                    log,
                })?;
        }
        self.finish().map_err(|e| TempStatsError::Build {
            status: "failed to finish build queue".to_string(),
            options: options.clone(),
            log: e.to_string(),
        })?;
        debug!(device = %self.info.name, "built CubeCL program");
        Ok(Program::new(entry_points, options))
    }

    fn create_input(&self, data: &[i32]) -> Result<Self::InputBuffer> {
        let client = WgpuRuntime::client(&self.device);
        let handle = client.create_from_slice(i32::as_bytes(data));
        Ok(CubeclBuffer {
            handle,
            len: data.len(),
        })
    }

    fn create_output(&self, len: usize) -> Result<Self::OutputBuffer> {
        let client = WgpuRuntime::client(&self.device);
        let zeros = vec![0i64; len];
        let handle = client.create_from_slice(i64::as_bytes(&zeros));
        Ok(CubeclBuffer { handle, len })
    }

    fn launch(
        &self,
        program: &Program,
        launch: &KernelLaunch,
        input: &Self::InputBuffer,
        output: &mut Self::OutputBuffer,
    ) -> Result<Duration> {
        validate_launch(&self.info, program, launch)?;
        let workgroups = u32::try_from(launch.workgroups()).map_err(|_| {
            TempStatsError::device(
                status::INVALID_GLOBAL_WORK_SIZE,
                format!("{} workgroups do not fit a dispatch", launch.workgroups()),
            )
        })?;
        let local_size = u32::try_from(launch.local_size).map_err(|_| {
            TempStatsError::device(
                status::INVALID_WORK_GROUP_SIZE,
                format!("workgroup size {} does not fit a dispatch", launch.local_size),
            )
        })?;
        let start = Instant::now();
        self.dispatch(
            launch.entry_point,
            input,
            output,
            workgroups,
            local_size,
            launch.mean.unwrap_or(0),
        )
        .map_err(|message| TempStatsError::device(status::OUT_OF_RESOURCES, message))?;
        self.finish()?;
        Ok(start.elapsed())
    }

    fn read_output(&self, output: &Self::OutputBuffer) -> Result<Vec<i64>> {
        let client = WgpuRuntime::client(&self.device);
        let bytes = client.read_one(output.handle.clone());
        Ok(bytemuck::pod_collect_to_vec::<u8, i64>(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_slots() {
        assert!(CubeclDevice::new(DEVICE_SLOTS.len()).is_err());
        assert_eq!(CubeclDevice::describe_all().len(), DEVICE_SLOTS.len());
    }

    #[test]
    fn test_unavailable_slots_are_marked() {
        let marked = CubeclDevice::describe_all()
            .iter()
            .all(|info| info.name.ends_with("(no adapter)"));
        assert_eq!(marked, !is_available());
    }

    #[test]
    fn test_dispatch_limit_reported() {
        let info = CubeclDevice::describe(0);
        assert_eq!(info.max_workgroups, WGPU_MAX_WORKGROUPS);
    }
}
