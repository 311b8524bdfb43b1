//! Statistics orchestration
//!
//! Runs the four reductions in a fixed order and derives the mean and the
//! population standard deviation from their results:
//!
//! ```text
//! Idle -> Loaded -> SumComputed -> MeanDerived -> MinComputed -> MaxComputed
//!      -> DeviationComputed -> StdDevDerived -> Done
//! ```
//!
//! [`StatisticsRun`] exposes each step separately and refuses to run a step
//! before its predecessor; [`compute_statistics`] runs them all.

use crate::device::ComputeDevice;
use crate::dispatch::{Dispatcher, ReductionReport};
use crate::error::{Result, TempStatsError};
use crate::op::{ReductionOp, Statistic};
use crate::series::{from_fixed, Series};
use derive_builder::Builder;
use serde::Serialize;
use strum_macros::Display;
use tracing::{debug, info};

/// Workgroup size for each reduction
///
/// # Example
///
/// ```rust
/// use tempstats_rs::StatisticsConfig;
///
/// let config = StatisticsConfig::builder()
///     .sum_workgroup(64)
///     .build()
///     .unwrap();
/// assert_eq!(config.sum_workgroup, 64);
/// assert_eq!(config.minimum_workgroup, 256);
/// ```
#[derive(Builder, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct StatisticsConfig {
    #[builder(default = "256")]
    pub minimum_workgroup: usize,
    #[builder(default = "256")]
    pub maximum_workgroup: usize,
    #[builder(default = "32")]
    pub sum_workgroup: usize,
    #[builder(default = "256")]
    pub deviation_workgroup: usize,
}

impl StatisticsConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        let sizes = [
            ("minimum", self.minimum_workgroup),
            ("maximum", self.maximum_workgroup),
            ("sum", self.sum_workgroup),
            ("deviation", self.deviation_workgroup),
        ];
        for (name, size) in sizes {
            if let Some(size) = size {
                if size == 0 || !size.is_power_of_two() {
                    return Err(format!(
                        "{} workgroup size must be a non-zero power of two, got {}",
                        name, size
                    ));
                }
            }
        }
        Ok(())
    }
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            minimum_workgroup: Statistic::Minimum.default_workgroup_size(),
            maximum_workgroup: Statistic::Maximum.default_workgroup_size(),
            sum_workgroup: Statistic::Sum.default_workgroup_size(),
            deviation_workgroup: Statistic::SquaredDeviation.default_workgroup_size(),
        }
    }
}

impl StatisticsConfig {
    pub fn builder() -> StatisticsConfigBuilder {
        StatisticsConfigBuilder::default()
    }

    pub fn workgroup_size(&self, statistic: Statistic) -> usize {
        match statistic {
            Statistic::Minimum => self.minimum_workgroup,
            Statistic::Maximum => self.maximum_workgroup,
            Statistic::Sum => self.sum_workgroup,
            Statistic::SquaredDeviation => self.deviation_workgroup,
        }
    }

    /// Operation descriptor for `statistic` under this configuration
    pub fn op(&self, statistic: Statistic) -> Result<ReductionOp> {
        ReductionOp::for_statistic(statistic, self.workgroup_size(statistic))
    }
}

/// Raw fixed-point results, as the reductions produced them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RawStatistics {
    pub sum: i64,
    pub minimum: i64,
    pub maximum: i64,
    /// Sum of `(x - mean_operand)^2` as returned by the deviation pass
    pub squared_deviation: i64,
    /// Rounded fixed-point mean passed to the deviation kernel
    pub mean_operand: i64,
}

/// Final statistics, in degrees
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub minimum: f64,
    pub maximum: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub raw: RawStatistics,
    pub reductions: Vec<ReductionReport>,
}

impl Statistics {
    /// Kernel time of the reduction for `statistic`, if it ran
    pub fn kernel_time_ns(&self, statistic: Statistic) -> Option<u64> {
        self.reductions
            .iter()
            .find(|r| r.statistic == statistic)
            .map(|r| r.kernel_time_ns)
    }
}

/// Orchestrator position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum Stage {
    Idle,
    Loaded,
    SumComputed,
    MeanDerived,
    MinComputed,
    MaxComputed,
    DeviationComputed,
    StdDevDerived,
    Done,
}

/// Sum of squared deviations about the exact mean
///
/// The deviation kernel takes an integer mean, so it returns
/// `sum((x - m')^2)` for the rounded `m'`. With `m` the exact mean this equals
/// `sum((x - m)^2) + n * (m - m')^2`; the second term is removed here.
pub fn corrected_squared_deviation(raw: i64, count: usize, mean: f64, mean_operand: i64) -> f64 {
    let offset = mean - mean_operand as f64;
    (raw as f64 - count as f64 * offset * offset).max(0.0)
}

/// One pass through the statistics pipeline over one series
pub struct StatisticsRun<'r, 'd, D: ComputeDevice> {
    dispatcher: &'r Dispatcher<'d, D>,
    ops: [ReductionOp; 4],
    stage: Stage,
    series: Option<&'r Series>,
    sum: Option<i64>,
    mean: Option<f64>,
    mean_operand: Option<i64>,
    minimum: Option<i64>,
    maximum: Option<i64>,
    squared_deviation: Option<i64>,
    std_dev: Option<f64>,
    reports: Vec<ReductionReport>,
}

impl<'r, 'd, D: ComputeDevice> StatisticsRun<'r, 'd, D> {
    /// Prepare a run; every workgroup size is checked against the device here
    ///
    /// # Errors
    /// Returns [`TempStatsError::InvalidConfig`] before any reduction is
    /// dispatched if a workgroup size is unusable.
    pub fn new(dispatcher: &'r Dispatcher<'d, D>, config: &StatisticsConfig) -> Result<Self> {
        let ops = [
            config.op(Statistic::Sum)?,
            config.op(Statistic::Minimum)?,
            config.op(Statistic::Maximum)?,
            config.op(Statistic::SquaredDeviation)?,
        ];
        for op in &ops {
            dispatcher.check(op)?;
        }
        Ok(Self {
            dispatcher,
            ops,
            stage: Stage::Idle,
            series: None,
            sum: None,
            mean: None,
            mean_operand: None,
            minimum: None,
            maximum: None,
            squared_deviation: None,
            std_dev: None,
            reports: Vec::with_capacity(4),
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn op(&self, statistic: Statistic) -> &ReductionOp {
        let index = match statistic {
            Statistic::Sum => 0,
            Statistic::Minimum => 1,
            Statistic::Maximum => 2,
            Statistic::SquaredDeviation => 3,
        };
        &self.ops[index]
    }

    /// Check the run sits at `from`; the move to `to` is made by [`Self::enter`]
    /// once the step has succeeded
    fn check_stage(&self, from: Stage, to: Stage) -> Result<()> {
        if self.stage != from {
            return Err(TempStatsError::StageOrder(format!(
                "cannot move to {} from {}, expected {}",
                to, self.stage, from
            )));
        }
        Ok(())
    }

    fn enter(&mut self, to: Stage) {
        debug!(from = %self.stage, %to, "statistics stage");
        self.stage = to;
    }

    fn series(&self) -> Result<&'r Series> {
        self.series
            .ok_or_else(|| TempStatsError::StageOrder("no series loaded".to_string()))
    }

    fn require<T: Copy>(value: Option<T>, what: &str) -> Result<T> {
        value.ok_or_else(|| TempStatsError::StageOrder(format!("{} is not available yet", what)))
    }

    fn reduce(&mut self, statistic: Statistic, auxiliary: Option<i64>) -> Result<i64> {
        let series = self.series()?;
        let op = *self.op(statistic);
        let reduction = self.dispatcher.reduce(series.samples(), &op, auxiliary)?;
        self.reports.push(reduction.report);
        Ok(reduction.value)
    }

    /// Idle -> Loaded
    pub fn load(&mut self, series: &'r Series) -> Result<()> {
        self.check_stage(Stage::Idle, Stage::Loaded)?;
        if series.is_empty() {
            return Err(TempStatsError::EmptySeries);
        }
        self.series = Some(series);
        self.enter(Stage::Loaded);
        Ok(())
    }

    /// Loaded -> SumComputed
    pub fn compute_sum(&mut self) -> Result<i64> {
        self.check_stage(Stage::Loaded, Stage::SumComputed)?;
        let sum = self.reduce(Statistic::Sum, None)?;
        self.sum = Some(sum);
        self.enter(Stage::SumComputed);
        Ok(sum)
    }

    /// SumComputed -> MeanDerived; the mean is in fixed point
    pub fn derive_mean(&mut self) -> Result<f64> {
        self.check_stage(Stage::SumComputed, Stage::MeanDerived)?;
        let sum = Self::require(self.sum, "sum")?;
        let count = self.series()?.len();
        let mean = sum as f64 / count as f64;
        self.mean = Some(mean);
        self.mean_operand = Some(mean.round() as i64);
        self.enter(Stage::MeanDerived);
        Ok(mean)
    }

    /// MeanDerived -> MinComputed
    pub fn compute_minimum(&mut self) -> Result<i64> {
        self.check_stage(Stage::MeanDerived, Stage::MinComputed)?;
        let minimum = self.reduce(Statistic::Minimum, None)?;
        self.minimum = Some(minimum);
        self.enter(Stage::MinComputed);
        Ok(minimum)
    }

    /// MinComputed -> MaxComputed
    pub fn compute_maximum(&mut self) -> Result<i64> {
        self.check_stage(Stage::MinComputed, Stage::MaxComputed)?;
        let maximum = self.reduce(Statistic::Maximum, None)?;
        self.maximum = Some(maximum);
        self.enter(Stage::MaxComputed);
        Ok(maximum)
    }

    /// MaxComputed -> DeviationComputed
    pub fn compute_squared_deviation(&mut self) -> Result<i64> {
        self.check_stage(Stage::MaxComputed, Stage::DeviationComputed)?;
        let mean_operand = Self::require(self.mean_operand, "mean")?;
        let deviation = self.reduce(Statistic::SquaredDeviation, Some(mean_operand))?;
        self.squared_deviation = Some(deviation);
        self.enter(Stage::DeviationComputed);
        Ok(deviation)
    }

    /// DeviationComputed -> StdDevDerived; the result is in fixed point
    pub fn derive_std_dev(&mut self) -> Result<f64> {
        self.check_stage(Stage::DeviationComputed, Stage::StdDevDerived)?;
        let count = self.series()?.len();
        let raw = Self::require(self.squared_deviation, "sum of squared deviation")?;
        let mean = Self::require(self.mean, "mean")?;
        let mean_operand = Self::require(self.mean_operand, "mean")?;
        let deviation = corrected_squared_deviation(raw, count, mean, mean_operand);
        let std_dev = (deviation / count as f64).sqrt();
        self.std_dev = Some(std_dev);
        self.enter(Stage::StdDevDerived);
        Ok(std_dev)
    }

    /// StdDevDerived -> Done; converts everything out of fixed point
    pub fn finish(mut self) -> Result<Statistics> {
        self.check_stage(Stage::StdDevDerived, Stage::Done)?;
        let count = self.series()?.len();
        let raw = RawStatistics {
            sum: Self::require(self.sum, "sum")?,
            minimum: Self::require(self.minimum, "minimum")?,
            maximum: Self::require(self.maximum, "maximum")?,
            squared_deviation: Self::require(self.squared_deviation, "sum of squared deviation")?,
            mean_operand: Self::require(self.mean_operand, "mean")?,
        };
        let statistics = Statistics {
            count,
            sum: from_fixed(raw.sum as f64),
            mean: from_fixed(Self::require(self.mean, "mean")?),
            minimum: from_fixed(raw.minimum as f64),
            maximum: from_fixed(raw.maximum as f64),
            std_dev: from_fixed(Self::require(self.std_dev, "standard deviation")?),
            raw,
            reductions: std::mem::take(&mut self.reports),
        };
        self.enter(Stage::Done);
        info!(
            count,
            mean = statistics.mean,
            std_dev = statistics.std_dev,
            "statistics complete"
        );
        Ok(statistics)
    }
}

/// Compute every statistic of `series` on `device`
///
/// # Errors
/// Fails on the first error of any stage: a bad configuration, a program
/// build failure, a device failure, or an empty series. No partial results
/// are returned.
///
/// # Example
///
/// ```rust
/// use tempstats_rs::{compute_statistics, HostDevice, Series, StatisticsConfig};
///
/// let series = Series::from_fixed(vec![100, 200, 300, 400]);
/// let stats = compute_statistics(&HostDevice::new(), &series, &StatisticsConfig::default())?;
/// assert_eq!(stats.minimum, 10.0);
/// assert_eq!(stats.mean, 25.0);
/// # Ok::<(), tempstats_rs::TempStatsError>(())
/// ```
pub fn compute_statistics<D: ComputeDevice>(
    device: &D,
    series: &Series,
    config: &StatisticsConfig,
) -> Result<Statistics> {
    if series.is_empty() {
        return Err(TempStatsError::EmptySeries);
    }
    // Reject bad sizes before the program build touches the device
    for statistic in [Statistic::Sum, Statistic::Minimum, Statistic::Maximum, Statistic::SquaredDeviation] {
        config.op(statistic)?;
    }

    let dispatcher = Dispatcher::new(device)?;
    let mut run = StatisticsRun::new(&dispatcher, config)?;
    run.load(series)?;
    run.compute_sum()?;
    run.derive_mean()?;
    run.compute_minimum()?;
    run.compute_maximum()?;
    run.compute_squared_deviation()?;
    run.derive_std_dev()?;
    run.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceInfo, HostBuffer, HostDevice, KernelLaunch, Program};
    use crate::error::status;
    use approx::assert_relative_eq;
    use std::time::Duration;

    fn small_config() -> StatisticsConfig {
        StatisticsConfig::builder()
            .minimum_workgroup(4)
            .maximum_workgroup(4)
            .sum_workgroup(4)
            .deviation_workgroup(4)
            .build()
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = StatisticsConfig::default();
        assert_eq!(config, StatisticsConfig::builder().build().unwrap());
        assert_eq!(config.workgroup_size(Statistic::Sum), 32);
        assert_eq!(config.workgroup_size(Statistic::SquaredDeviation), 256);
    }

    #[test]
    fn test_builder_rejects_bad_sizes() {
        assert!(StatisticsConfig::builder().sum_workgroup(0).build().is_err());
        assert!(StatisticsConfig::builder().minimum_workgroup(100).build().is_err());
    }

    #[test]
    fn test_stages_in_order() {
        let device = HostDevice::new();
        let dispatcher = Dispatcher::new(&device).unwrap();
        let series = Series::from_fixed(vec![100, 200, 300, 400]);
        let mut run = StatisticsRun::new(&dispatcher, &small_config()).unwrap();
        assert_eq!(run.stage(), Stage::Idle);
        run.load(&series).unwrap();
        assert_eq!(run.compute_sum().unwrap(), 1000);
        assert_relative_eq!(run.derive_mean().unwrap(), 250.0);
        assert_eq!(run.compute_minimum().unwrap(), 100);
        assert_eq!(run.compute_maximum().unwrap(), 400);
        assert_eq!(run.compute_squared_deviation().unwrap(), 50_000);
        assert_relative_eq!(run.derive_std_dev().unwrap(), 12_500f64.sqrt());
        let stats = run.finish().unwrap();
        assert_eq!(stats.reductions.len(), 4);
    }

    #[test]
    fn test_deviation_before_mean_is_rejected() {
        let device = HostDevice::new();
        let dispatcher = Dispatcher::new(&device).unwrap();
        let series = Series::from_fixed(vec![1, 2, 3]);
        let mut run = StatisticsRun::new(&dispatcher, &small_config()).unwrap();
        run.load(&series).unwrap();
        run.compute_sum().unwrap();
        let err = run.compute_squared_deviation().unwrap_err();
        assert!(matches!(err, TempStatsError::StageOrder(_)));
        assert_eq!(run.stage(), Stage::SumComputed);
    }

    #[test]
    fn test_sum_before_load_is_rejected() {
        let device = HostDevice::new();
        let dispatcher = Dispatcher::new(&device).unwrap();
        let mut run = StatisticsRun::new(&dispatcher, &small_config()).unwrap();
        assert!(matches!(run.compute_sum(), Err(TempStatsError::StageOrder(_))));
    }

    #[test]
    fn test_oversized_workgroup_fails_before_dispatch() {
        let device = HostDevice::new();
        let dispatcher = Dispatcher::new(&device).unwrap();
        let config = StatisticsConfig::builder()
            .deviation_workgroup(1 << 20)
            .build()
            .unwrap();
        assert!(matches!(
            StatisticsRun::new(&dispatcher, &config),
            Err(TempStatsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_empty_series() {
        let result = compute_statistics(&HostDevice::new(), &Series::from_fixed(vec![]), &StatisticsConfig::default());
        assert!(matches!(result, Err(TempStatsError::EmptySeries)));
    }

    #[test]
    fn test_rounded_mean_is_corrected() {
        // mean is 5/3 in fixed point, the kernel sees 2
        let series = Series::from_fixed(vec![1, 2, 2]);
        let stats = compute_statistics(&HostDevice::new(), &series, &small_config()).unwrap();
        assert_eq!(stats.raw.mean_operand, 2);
        assert_eq!(stats.raw.squared_deviation, 1);
        let mean = 5.0 / 3.0;
        let expected = ((1.0f64 - mean).powi(2) + 2.0 * (2.0 - mean).powi(2)) / 3.0;
        assert_relative_eq!(stats.std_dev, expected.sqrt() / 10.0, epsilon = 1e-12);
    }

    /// Host device whose kernel launches always fail
    struct LaunchFailure {
        host: HostDevice,
    }

    impl ComputeDevice for LaunchFailure {
        type InputBuffer = HostBuffer<i32>;
        type OutputBuffer = HostBuffer<i64>;

        fn info(&self) -> &DeviceInfo {
            self.host.info()
        }

        fn build_program(&self) -> Result<Program> {
            self.host.build_program()
        }

        fn create_input(&self, data: &[i32]) -> Result<Self::InputBuffer> {
            self.host.create_input(data)
        }

        fn create_output(&self, len: usize) -> Result<Self::OutputBuffer> {
            self.host.create_output(len)
        }

        fn launch(
            &self,
            _program: &Program,
            _launch: &KernelLaunch,
            _input: &Self::InputBuffer,
            _output: &mut Self::OutputBuffer,
        ) -> Result<Duration> {
            Err(TempStatsError::device(status::OUT_OF_RESOURCES, "queue lost"))
        }

        fn read_output(&self, output: &Self::OutputBuffer) -> Result<Vec<i64>> {
            self.host.read_output(output)
        }
    }

    #[test]
    fn test_failed_step_keeps_stage() {
        let device = LaunchFailure { host: HostDevice::new() };
        let dispatcher = Dispatcher::new(&device).unwrap();
        let series = Series::from_fixed(vec![10, 20, 30]);
        let mut run = StatisticsRun::new(&dispatcher, &small_config()).unwrap();
        run.load(&series).unwrap();

        let err = run.compute_sum().unwrap_err();
        assert!(matches!(err, TempStatsError::Device { .. }));
        assert_eq!(run.stage(), Stage::Loaded);

        assert!(matches!(run.derive_mean(), Err(TempStatsError::StageOrder(_))));
        assert_eq!(run.stage(), Stage::Loaded);
    }

    #[test]
    fn test_overflowing_deviation_keeps_stage() {
        let device = HostDevice::new();
        let dispatcher = Dispatcher::new(&device).unwrap();
        let series = Series::from_fixed(vec![i32::MIN, i32::MIN, i32::MAX]);
        let mut run = StatisticsRun::new(&dispatcher, &small_config()).unwrap();
        run.load(&series).unwrap();
        run.compute_sum().unwrap();
        run.derive_mean().unwrap();
        assert_eq!(run.compute_minimum().unwrap(), i32::MIN as i64);
        assert_eq!(run.compute_maximum().unwrap(), i32::MAX as i64);

        let err = run.compute_squared_deviation().unwrap_err();
        assert!(matches!(err, TempStatsError::Overflow { .. }));
        assert_eq!(run.stage(), Stage::MaxComputed);
    }

    #[test]
    fn test_load_twice_is_rejected() {
        let device = HostDevice::new();
        let dispatcher = Dispatcher::new(&device).unwrap();
        let series = Series::from_fixed(vec![1]);
        let mut run = StatisticsRun::new(&dispatcher, &small_config()).unwrap();
        run.load(&series).unwrap();
        assert!(matches!(run.load(&series), Err(TempStatsError::StageOrder(_))));
        assert_eq!(run.stage(), Stage::Loaded);
    }

    #[test]
    fn test_corrected_squared_deviation_clamps() {
        assert_eq!(corrected_squared_deviation(0, 4, 10.4, 10), 0.0);
        assert_relative_eq!(corrected_squared_deviation(100, 4, 10.5, 10), 99.0);
    }
}
