//! Compute devices and platform enumeration
//!
//! A [`ComputeDevice`] exposes the handful of operations a reduction needs:
//! build the program, create buffers, launch a kernel and read results back.
//! Every call is blocking from the caller's point of view.
//!
//! Platforms are numbered the way `-p` expects them:
//!
//! | Platform | Backend | Availability |
//! |----------|---------|--------------|
//! | 0 | Host emulation (rayon workgroups) | always |
//! | 1 | CubeCL on wgpu | `--features cubecl` |

mod host;

#[cfg(feature = "cubecl")]
pub mod cube;

pub use host::{HostBuffer, HostDevice};

#[cfg(feature = "cubecl")]
pub use cube::{CubeclBuffer, CubeclDevice};

use crate::error::{status, Result, TempStatsError};
use crate::op::Statistic;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use strum::IntoEnumIterator;

/// Static description of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub platform: String,
    pub max_workgroup_size: usize,
    /// Largest number of workgroups one launch may dispatch
    pub max_workgroups: usize,
    pub local_memory_bytes: usize,
    pub compute_units: usize,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}), max workgroup {}, max workgroups {}, local memory {} B, {} compute units",
            self.name,
            self.vendor,
            self.max_workgroup_size,
            self.max_workgroups,
            self.local_memory_bytes,
            self.compute_units
        )
    }
}

/// A platform and the devices it offers
#[derive(Debug, Clone, Serialize)]
pub struct PlatformInfo {
    pub id: usize,
    pub name: String,
    pub vendor: String,
    pub devices: Vec<DeviceInfo>,
}

/// A built device program
///
/// Kernels can only be launched through a `Program`, so a device whose build
/// failed never runs a reduction.
#[derive(Debug, Clone)]
pub struct Program {
    entry_points: Vec<&'static str>,
    options: String,
}

impl Program {
    pub fn new(entry_points: Vec<&'static str>, options: impl Into<String>) -> Self {
        Self {
            entry_points,
            options: options.into(),
        }
    }

    pub fn entry_points(&self) -> &[&'static str] {
        &self.entry_points
    }

    pub fn options(&self) -> &str {
        &self.options
    }

    pub fn has_entry_point(&self, name: &str) -> bool {
        self.entry_points.iter().any(|&e| e == name)
    }
}

/// Entry points every device program must provide
pub fn required_entry_points() -> Vec<&'static str> {
    Statistic::iter().map(Statistic::entry_point).collect()
}

/// Launch geometry and arguments for one kernel
#[derive(Debug, Clone, Copy)]
pub struct KernelLaunch {
    pub entry_point: &'static str,
    /// Total work-items; a multiple of `local_size`
    pub global_size: usize,
    pub local_size: usize,
    /// Mean in fixed point, for kernels that take it
    pub mean: Option<i64>,
}

impl KernelLaunch {
    pub fn workgroups(&self) -> usize {
        if self.local_size == 0 {
            0
        } else {
            self.global_size / self.local_size
        }
    }
}

/// Operations a reduction needs from an accelerator
pub trait ComputeDevice {
    /// Read-only `i32` input buffer
    type InputBuffer;
    /// Read-write `i64` output buffer, one slot per work-item
    type OutputBuffer;

    fn info(&self) -> &DeviceInfo;

    /// Build the device program containing the reduction kernels
    ///
    /// # Errors
    /// Returns [`TempStatsError::Build`] with status, options and log when the
    /// program cannot be built for this device.
    fn build_program(&self) -> Result<Program>;

    /// Allocate an input buffer and copy `data` into it; returns once the
    /// transfer is complete
    fn create_input(&self, data: &[i32]) -> Result<Self::InputBuffer>;

    /// Allocate a zero-filled output buffer of `len` slots
    fn create_output(&self, len: usize) -> Result<Self::OutputBuffer>;

    /// Run one kernel to completion and return its execution time
    fn launch(
        &self,
        program: &Program,
        launch: &KernelLaunch,
        input: &Self::InputBuffer,
        output: &mut Self::OutputBuffer,
    ) -> Result<Duration>;

    /// Copy the whole output buffer back to the host
    fn read_output(&self, output: &Self::OutputBuffer) -> Result<Vec<i64>>;
}

/// Check a launch against the program and the device limits
pub(crate) fn validate_launch(info: &DeviceInfo, program: &Program, launch: &KernelLaunch) -> Result<()> {
    if !program.has_entry_point(launch.entry_point) {
        return Err(TempStatsError::device(
            status::INVALID_KERNEL_NAME,
            format!("kernel '{}' is not in the program", launch.entry_point),
        ));
    }
    if launch.local_size == 0 || launch.local_size > info.max_workgroup_size {
        return Err(TempStatsError::device(
            status::INVALID_WORK_GROUP_SIZE,
            format!(
                "workgroup size {} outside 1..={} for {}",
                launch.local_size, info.max_workgroup_size, info.name
            ),
        ));
    }
    if launch.global_size % launch.local_size != 0 {
        return Err(TempStatsError::device(
            status::INVALID_WORK_GROUP_SIZE,
            format!(
                "global size {} is not a multiple of workgroup size {}",
                launch.global_size, launch.local_size
            ),
        ));
    }
    if launch.workgroups() > info.max_workgroups {
        return Err(TempStatsError::device(
            status::INVALID_GLOBAL_WORK_SIZE,
            format!(
                "{} workgroups exceed the {} one launch on {} can dispatch",
                launch.workgroups(),
                info.max_workgroups,
                info.name
            ),
        ));
    }
    Ok(())
}

/// Every platform compiled into this build
pub fn list_platforms() -> Vec<PlatformInfo> {
    #[allow(unused_mut)]
    let mut platforms = vec![PlatformInfo {
        id: 0,
        name: "Host emulation".to_string(),
        vendor: "tempstats".to_string(),
        devices: vec![HostDevice::new().info().clone()],
    }];

    #[cfg(feature = "cubecl")]
    platforms.push(PlatformInfo {
        id: 1,
        name: "CubeCL (wgpu)".to_string(),
        vendor: "tracel-ai".to_string(),
        devices: CubeclDevice::describe_all(),
    });

    platforms
}

/// Human-readable listing, as printed by `-l`
pub fn format_platforms(platforms: &[PlatformInfo]) -> String {
    let mut out = String::new();
    out.push_str(&format!("Found {} platform(s):\n", platforms.len()));
    for platform in platforms {
        out.push_str(&format!(
            "\nPlatform {}: {}, vendor: {}\n",
            platform.id, platform.name, platform.vendor
        ));
        for (id, device) in platform.devices.iter().enumerate() {
            out.push_str(&format!("  Device {}: {}\n", id, device));
        }
    }
    out
}

/// A device picked by platform and device index
pub enum SelectedDevice {
    Host(HostDevice),
    #[cfg(feature = "cubecl")]
    Cubecl(CubeclDevice),
}

impl SelectedDevice {
    pub fn info(&self) -> &DeviceInfo {
        match self {
            SelectedDevice::Host(device) => device.info(),
            #[cfg(feature = "cubecl")]
            SelectedDevice::Cubecl(device) => device.info(),
        }
    }
}

/// Open device `device_id` of platform `platform_id`
///
/// # Errors
/// Returns a [`TempStatsError::Device`] error when either index is out of range.
pub fn select_device(platform_id: usize, device_id: usize) -> Result<SelectedDevice> {
    match platform_id {
        0 => {
            if device_id != 0 {
                return Err(TempStatsError::device(
                    status::INVALID_DEVICE,
                    format!("platform 0 has 1 device, requested device {}", device_id),
                ));
            }
            Ok(SelectedDevice::Host(HostDevice::new()))
        }
        #[cfg(feature = "cubecl")]
        1 => Ok(SelectedDevice::Cubecl(CubeclDevice::new(device_id)?)),
        _ => Err(TempStatsError::device(
            status::INVALID_PLATFORM,
            format!(
                "platform {} does not exist ({} available)",
                platform_id,
                list_platforms().len()
            ),
        )),
    }
}
