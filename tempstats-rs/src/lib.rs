//! Parallel reduction statistics for temperature series
//!
//! This crate computes the minimum, maximum, sum, mean and population
//! standard deviation of a fixed-point temperature series with workgroup
//! tree reductions on a compute device.
//!
//! Each statistic pads the series to a whole number of workgroups with the
//! operation's identity value, runs one kernel that reduces every workgroup
//! in local memory, and combines the per-workgroup partials on the host.
//!
//! # Quick Start
//!
//! ```no_run
//! use tempstats_rs::{compute_statistics, records, HostDevice, StatisticsConfig};
//!
//! let series = records::read_series("temp_lincolnshire.txt")?;
//! let stats = compute_statistics(&HostDevice::new(), &series, &StatisticsConfig::default())?;
//!
//! println!("Mean = {:.3}", stats.mean);
//! println!("SD = {:.3}", stats.std_dev);
//! # Ok::<(), tempstats_rs::TempStatsError>(())
//! ```
//!
//! # Devices
//!
//! Any type implementing [`ComputeDevice`] can run the pipeline.
//! [`HostDevice`] emulates workgroups on the rayon thread pool and is always
//! available. With the `cubecl` feature, `CubeclDevice` runs the same kernels
//! on a GPU through the CubeCL wgpu runtime.

pub mod buffers;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod kernel;
pub mod op;
pub mod padding;
pub mod records;
pub mod reference;
pub mod series;
pub mod statistics;

pub use device::{
    format_platforms, list_platforms, select_device, ComputeDevice, DeviceInfo, HostDevice,
    PlatformInfo, SelectedDevice,
};
pub use dispatch::{Dispatcher, Reduction, ReductionReport};
pub use error::{Result, TempStatsError};
pub use op::{ReductionOp, Statistic};
pub use series::Series;
pub use statistics::{compute_statistics, RawStatistics, Stage, Statistics, StatisticsConfig, StatisticsRun};

#[cfg(feature = "cubecl")]
pub use device::CubeclDevice;
