//! Host emulation of an accelerator
//!
//! Workgroups are scheduled on the rayon pool; each one runs the kernels in
//! [`crate::kernel`] against its own local memory.

use super::{validate_launch, ComputeDevice, DeviceInfo, KernelLaunch, Program};
use crate::error::{status, Result, TempStatsError};
use crate::kernel;
use std::time::{Duration, Instant};

const HOST_MAX_WORKGROUP_SIZE: usize = 1024;
const HOST_LOCAL_MEMORY_BYTES: usize = 48 * 1024;
const HOST_MAX_WORKGROUPS: usize = u32::MAX as usize;

/// Buffer in host memory standing in for device memory
#[derive(Debug)]
pub struct HostBuffer<T> {
    data: Vec<T>,
}

impl<T> HostBuffer<T> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn allocate<T: Copy>(len: usize, fill: T) -> Result<Vec<T>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|e| {
        TempStatsError::device(
            status::MEM_OBJECT_ALLOCATION_FAILURE,
            format!("cannot allocate {} elements: {}", len, e),
        )
    })?;
    data.resize(len, fill);
    Ok(data)
}

/// Accelerator emulation backed by the rayon thread pool
#[derive(Debug, Clone)]
pub struct HostDevice {
    info: DeviceInfo,
}

impl HostDevice {
    pub fn new() -> Self {
        Self {
            info: DeviceInfo {
                name: format!("rayon workgroup emulator ({} threads)", rayon::current_num_threads()),
                vendor: "tempstats".to_string(),
                platform: "Host emulation".to_string(),
                max_workgroup_size: HOST_MAX_WORKGROUP_SIZE,
                max_workgroups: HOST_MAX_WORKGROUPS,
                local_memory_bytes: HOST_LOCAL_MEMORY_BYTES,
                compute_units: rayon::current_num_threads(),
            },
        }
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeDevice for HostDevice {
    type InputBuffer = HostBuffer<i32>;
    type OutputBuffer = HostBuffer<i64>;

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn build_program(&self) -> Result<Program> {
        let required = super::required_entry_points();
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|name| kernel::lookup(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(TempStatsError::Build {
                status: "CL_BUILD_ERROR".to_string(),
                options: String::new(),
                log: format!("missing kernel entry points: {}", missing.join(", ")),
            });
        }
        Ok(Program::new(required, ""))
    }

    fn create_input(&self, data: &[i32]) -> Result<Self::InputBuffer> {
        let mut buffer = allocate(data.len(), 0i32)?;
        buffer.copy_from_slice(data);
        Ok(HostBuffer { data: buffer })
    }

    fn create_output(&self, len: usize) -> Result<Self::OutputBuffer> {
        Ok(HostBuffer {
            data: allocate(len, 0i64)?,
        })
    }

    fn launch(
        &self,
        program: &Program,
        launch: &KernelLaunch,
        input: &Self::InputBuffer,
        output: &mut Self::OutputBuffer,
    ) -> Result<Duration> {
        validate_launch(&self.info, program, launch)?;
        let local_bytes = launch.local_size * std::mem::size_of::<i64>();
        if local_bytes > self.info.local_memory_bytes {
            return Err(TempStatsError::device(
                status::OUT_OF_RESOURCES,
                format!(
                    "{} B of local memory requested, {} B available",
                    local_bytes, self.info.local_memory_bytes
                ),
            ));
        }
        if input.len() < launch.global_size || output.len() < launch.global_size {
            return Err(TempStatsError::device(
                status::INVALID_BUFFER_SIZE,
                format!(
                    "buffers hold {} / {} elements, launch needs {}",
                    input.len(),
                    output.len(),
                    launch.global_size
                ),
            ));
        }
        let kernel = kernel::lookup(launch.entry_point).ok_or_else(|| {
            TempStatsError::device(
                status::INVALID_KERNEL_NAME,
                format!("kernel '{}' not found", launch.entry_point),
            )
        })?;

        let start = Instant::now();
        kernel::execute(
            kernel,
            &input.data[..launch.global_size],
            &mut output.data[..launch.global_size],
            launch.local_size,
            launch.mean.unwrap_or(0),
        );
        Ok(start.elapsed())
    }

    fn read_output(&self, output: &Self::OutputBuffer) -> Result<Vec<i64>> {
        Ok(output.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_program_has_all_entry_points() {
        let device = HostDevice::new();
        let program = device.build_program().unwrap();
        for name in ["minimum", "maximum", "reduce_add_4", "standardDeviation"] {
            assert!(program.has_entry_point(name));
        }
    }

    #[test]
    fn test_output_is_zeroed() {
        let device = HostDevice::new();
        let output = device.create_output(64).unwrap();
        assert_eq!(device.read_output(&output).unwrap(), vec![0i64; 64]);
    }

    #[test]
    fn test_launch_sum() {
        let device = HostDevice::new();
        let program = device.build_program().unwrap();
        let input = device.create_input(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let mut output = device.create_output(8).unwrap();
        let launch = KernelLaunch {
            entry_point: "reduce_add_4",
            global_size: 8,
            local_size: 4,
            mean: None,
        };
        device.launch(&program, &launch, &input, &mut output).unwrap();
        let result = device.read_output(&output).unwrap();
        assert_eq!(result[0], 10);
        assert_eq!(result[4], 26);
    }

    #[test]
    fn test_launch_rejects_short_buffer() {
        let device = HostDevice::new();
        let program = device.build_program().unwrap();
        let input = device.create_input(&[1, 2, 3, 4]).unwrap();
        let mut output = device.create_output(4).unwrap();
        let launch = KernelLaunch {
            entry_point: "minimum",
            global_size: 8,
            local_size: 4,
            mean: None,
        };
        let err = device.launch(&program, &launch, &input, &mut output).unwrap_err();
        assert!(matches!(err, TempStatsError::Device { code: status::INVALID_BUFFER_SIZE, .. }));
    }
}
