//! Reduction dispatcher
//!
//! Pads the series for one operation, runs the operation's kernel over all
//! workgroups, and folds the per-workgroup partials into a single value.

use crate::buffers::ReductionBuffers;
use crate::device::{ComputeDevice, KernelLaunch, Program};
use crate::error::{Result, TempStatsError};
use crate::op::{ReductionOp, Statistic};
use crate::padding::pad;
use serde::Serialize;
use tracing::{debug, info};

/// What one reduction did, recorded alongside its result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReductionReport {
    pub statistic: Statistic,
    pub entry_point: &'static str,
    pub workgroup_size: usize,
    pub workgroups: usize,
    pub padded_len: usize,
    pub padding_len: usize,
    /// Whether a cross-workgroup pass combined more than one partial
    pub second_pass: bool,
    pub kernel_time_ns: u64,
}

/// Result of one reduction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reduction {
    pub value: i64,
    pub report: ReductionReport,
}

/// Runs reductions on one device with one built program
pub struct Dispatcher<'d, D: ComputeDevice> {
    device: &'d D,
    program: Program,
}

impl<'d, D: ComputeDevice> Dispatcher<'d, D> {
    /// Build the device program
    ///
    /// # Errors
    /// A build failure is returned as-is; nothing can be dispatched without
    /// the program.
    pub fn new(device: &'d D) -> Result<Self> {
        let program = device.build_program()?;
        debug!(
            device = %device.info().name,
            entry_points = ?program.entry_points(),
            "program built"
        );
        Ok(Self { device, program })
    }

    pub fn device(&self) -> &D {
        self.device
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Reject an operation the device cannot run, before any device work
    pub fn check(&self, op: &ReductionOp) -> Result<()> {
        let info = self.device.info();
        if op.workgroup_size == 0 || op.workgroup_size > info.max_workgroup_size {
            return Err(TempStatsError::InvalidConfig(format!(
                "{} workgroup size {} outside 1..={} supported by {}",
                op.statistic, op.workgroup_size, info.max_workgroup_size, info.name
            )));
        }
        if !op.workgroup_size.is_power_of_two() {
            return Err(TempStatsError::InvalidConfig(format!(
                "{} workgroup size {} is not a power of two",
                op.statistic, op.workgroup_size
            )));
        }
        if !self.program.has_entry_point(op.entry_point()) {
            return Err(TempStatsError::InvalidConfig(format!(
                "program has no '{}' entry point",
                op.entry_point()
            )));
        }
        Ok(())
    }

    /// Reduce `samples` with `op`
    ///
    /// `auxiliary` is the fixed-point mean for operations that need it.
    /// When the padded series spans several workgroups, the partial at each
    /// workgroup offset is combined on the host with `op.combine`; slots in
    /// between are never read.
    pub fn reduce(&self, samples: &[i32], op: &ReductionOp, auxiliary: Option<i64>) -> Result<Reduction> {
        if samples.is_empty() {
            return Err(TempStatsError::EmptySeries);
        }
        self.check(op)?;
        op.check_accumulator(samples, auxiliary)?;
        let mean = op.auxiliary(auxiliary)?;
        let padded = pad(samples, op.workgroup_size, op.padding_value(auxiliary)?)?;

        let launch = KernelLaunch {
            entry_point: op.entry_point(),
            global_size: padded.len(),
            local_size: op.workgroup_size,
            mean: op.requires_auxiliary.then_some(mean),
        };

        let mut buffers = ReductionBuffers::allocate(self.device, &padded)?;
        let elapsed = buffers.run(&self.program, &launch)?;
        let output = buffers.read_back()?;
        drop(buffers);

        let partials: Vec<i64> = output
            .iter()
            .step_by(op.workgroup_size)
            .take(padded.workgroups())
            .copied()
            .collect();

        let second_pass = partials.len() > 1;
        let value = if second_pass {
            debug!(
                statistic = %op.statistic,
                partials = partials.len(),
                "combining workgroup partials"
            );
            op.combine_all(&partials)
        } else {
            partials[0]
        };

        let kernel_time_ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        info!(
            statistic = %op.statistic,
            kernel = op.entry_point(),
            workgroup_size = op.workgroup_size,
            workgroups = padded.workgroups(),
            kernel_time_ns,
            "reduction complete"
        );

        Ok(Reduction {
            value,
            report: ReductionReport {
                statistic: op.statistic,
                entry_point: op.entry_point(),
                workgroup_size: op.workgroup_size,
                workgroups: padded.workgroups(),
                padded_len: padded.len(),
                padding_len: padded.padding_len(),
                second_pass,
                kernel_time_ns,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HostDevice;

    fn reduce(statistic: Statistic, samples: &[i32], workgroup_size: usize, mean: Option<i64>) -> Reduction {
        let device = HostDevice::new();
        let dispatcher = Dispatcher::new(&device).unwrap();
        let op = ReductionOp::for_statistic(statistic, workgroup_size).unwrap();
        dispatcher.reduce(samples, &op, mean).unwrap()
    }

    #[test]
    fn test_single_workgroup_no_second_pass() {
        let result = reduce(Statistic::Sum, &[100, 200, 300, 400], 4, None);
        assert_eq!(result.value, 1000);
        assert!(!result.report.second_pass);
        assert_eq!(result.report.workgroups, 1);
        assert_eq!(result.report.entry_point, "reduce_add_4");
    }

    #[test]
    fn test_multiple_workgroups_combined() {
        let samples: Vec<i32> = (1..=100).collect();
        let result = reduce(Statistic::Sum, &samples, 8, None);
        assert_eq!(result.value, 5050);
        assert!(result.report.second_pass);
        assert_eq!(result.report.workgroups, 13);
        assert_eq!(result.report.padded_len, 104);
        assert_eq!(result.report.padding_len, 4);
    }

    #[test]
    fn test_min_with_positive_data_and_padding() {
        // five positive samples padded to eight; zero padding would report 0
        let result = reduce(Statistic::Minimum, &[50, 70, 30, 90, 60], 4, None);
        assert_eq!(result.value, 30);
    }

    #[test]
    fn test_max_with_negative_data_and_padding() {
        let result = reduce(Statistic::Maximum, &[-50, -70, -30, -90, -60], 4, None);
        assert_eq!(result.value, -30);
    }

    #[test]
    fn test_deviation_padding_contributes_nothing() {
        let result = reduce(Statistic::SquaredDeviation, &[10, 20, 30], 4, Some(20));
        assert_eq!(result.value, 200);
    }

    #[test]
    fn test_deviation_without_mean_fails() {
        let device = HostDevice::new();
        let dispatcher = Dispatcher::new(&device).unwrap();
        let op = ReductionOp::for_statistic(Statistic::SquaredDeviation, 4).unwrap();
        assert!(dispatcher.reduce(&[1, 2, 3], &op, None).is_err());
    }

    #[test]
    fn test_workgroup_over_device_limit() {
        let device = HostDevice::new();
        let dispatcher = Dispatcher::new(&device).unwrap();
        let op = ReductionOp::for_statistic(Statistic::Sum, 4096).unwrap();
        let err = dispatcher.reduce(&[1, 2, 3], &op, None).unwrap_err();
        assert!(matches!(err, TempStatsError::InvalidConfig(_)));
    }

    #[test]
    fn test_empty_samples() {
        let device = HostDevice::new();
        let dispatcher = Dispatcher::new(&device).unwrap();
        let op = ReductionOp::for_statistic(Statistic::Sum, 32).unwrap();
        assert!(matches!(
            dispatcher.reduce(&[], &op, None),
            Err(TempStatsError::EmptySeries)
        ));
    }
}
