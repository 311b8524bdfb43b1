//! Reduction operation descriptors
//!
//! One [`ReductionOp`] describes everything that differs between the four
//! statistics: the kernel entry point, the identity value, the combining
//! operator and the workgroup size.

use crate::error::{Result, TempStatsError};
use derive_builder::Builder;
use itertools::{Itertools, MinMaxResult};
use serde::Serialize;
use strum_macros::{Display, EnumIter};

/// The four device reductions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize)]
pub enum Statistic {
    #[strum(serialize = "minimum")]
    Minimum,
    #[strum(serialize = "maximum")]
    Maximum,
    #[strum(serialize = "sum")]
    Sum,
    #[strum(serialize = "sum of squared deviation")]
    SquaredDeviation,
}

impl Statistic {
    /// Name of the kernel entry point in the device program
    pub fn entry_point(self) -> &'static str {
        match self {
            Statistic::Minimum => "minimum",
            Statistic::Maximum => "maximum",
            Statistic::Sum => "reduce_add_4",
            Statistic::SquaredDeviation => "standardDeviation",
        }
    }

    /// Default workgroup size used for this statistic
    pub fn default_workgroup_size(self) -> usize {
        match self {
            Statistic::Sum => 32,
            _ => 256,
        }
    }
}

pub fn combine_min(a: i64, b: i64) -> i64 {
    if a < b { a } else { b }
}

pub fn combine_max(a: i64, b: i64) -> i64 {
    if a > b { a } else { b }
}

pub fn combine_add(a: i64, b: i64) -> i64 {
    a + b
}

/// Element map of the deviation kernels, applied on load
pub fn map_squared_deviation(value: i32, mean: i64) -> i64 {
    let d = value as i64 - mean;
    d * d
}

/// Operation descriptor for one reduction
///
/// Values are loaded as `i32`, widened to `i64` (squared deviations for the
/// deviation pass), then folded with `combine` starting from `identity`. The
/// second, cross-workgroup pass uses the same `combine`.
///
/// # Example
///
/// ```rust
/// use tempstats_rs::op::{ReductionOp, Statistic};
///
/// let op = ReductionOp::for_statistic(Statistic::Minimum, 64)?;
/// assert_eq!(op.padding_value(None)?, i32::MAX);
/// # Ok::<(), tempstats_rs::TempStatsError>(())
/// ```
#[derive(Builder, Clone, Copy, Debug)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct ReductionOp {
    pub statistic: Statistic,

    /// Identity of `combine`, in the mapped (`i64`) domain
    pub identity: i64,

    /// Combining operator shared by both reduction passes
    pub combine: fn(i64, i64) -> i64,

    /// Work-items per workgroup; a non-zero power of two
    pub workgroup_size: usize,

    /// Whether the kernel takes the mean as an extra argument
    #[builder(default)]
    pub requires_auxiliary: bool,
}

impl ReductionOpBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(size) = self.workgroup_size {
            if size == 0 {
                return Err("workgroup size must be greater than zero".to_string());
            }
            if !size.is_power_of_two() {
                return Err(format!(
                    "workgroup size must be a power of two for tree reduction, got {}",
                    size
                ));
            }
        }
        Ok(())
    }
}

impl ReductionOp {
    pub fn builder() -> ReductionOpBuilder {
        ReductionOpBuilder::default()
    }

    /// Descriptor for `statistic` with the given workgroup size
    ///
    /// # Errors
    /// Returns [`TempStatsError::InvalidConfig`] if the workgroup size is zero
    /// or not a power of two.
    pub fn for_statistic(statistic: Statistic, workgroup_size: usize) -> Result<Self> {
        let mut builder = Self::builder();
        builder.statistic(statistic).workgroup_size(workgroup_size);
        match statistic {
            Statistic::Minimum => builder.identity(i32::MAX as i64).combine(combine_min),
            Statistic::Maximum => builder.identity(i32::MIN as i64).combine(combine_max),
            Statistic::Sum => builder.identity(0).combine(combine_add),
            Statistic::SquaredDeviation => builder
                .identity(0)
                .combine(combine_add)
                .requires_auxiliary(true),
        };
        builder
            .build()
            .map_err(|e| TempStatsError::InvalidConfig(format!("{}: {}", statistic, e)))
    }

    /// Input-domain value appended by the padding step
    ///
    /// The value is chosen so that, once mapped, it equals `identity`:
    /// `i32::MAX` for minimum, `i32::MIN` for maximum, `0` for sum and the
    /// mean itself for the squared deviation.
    ///
    /// # Errors
    /// Returns [`TempStatsError::InvalidConfig`] when an auxiliary operand is
    /// required but missing, or does not fit the sample type.
    pub fn padding_value(&self, auxiliary: Option<i64>) -> Result<i32> {
        if self.requires_auxiliary {
            let mean = self.auxiliary(auxiliary)?;
            return i32::try_from(mean).map_err(|_| {
                TempStatsError::InvalidConfig(format!(
                    "{} operand {} does not fit the sample type",
                    self.statistic, mean
                ))
            });
        }
        match self.statistic {
            Statistic::Minimum => Ok(i32::MAX),
            Statistic::Maximum => Ok(i32::MIN),
            _ => Ok(0),
        }
    }

    /// Resolve the auxiliary operand, if this operation needs one
    pub fn auxiliary(&self, auxiliary: Option<i64>) -> Result<i64> {
        match (self.requires_auxiliary, auxiliary) {
            (true, Some(value)) => Ok(value),
            (true, None) => Err(TempStatsError::InvalidConfig(format!(
                "{} requires the mean as a kernel argument",
                self.statistic
            ))),
            (false, _) => Ok(0),
        }
    }

    pub fn entry_point(&self) -> &'static str {
        self.statistic.entry_point()
    }

    /// Reject inputs whose accumulated result cannot fit in an `i64`
    ///
    /// Minimum and maximum never accumulate. For the sum the bound is
    /// `n * max|x|`; for the squared deviation it is `n * max|x - mean|^2`,
    /// which also bounds every single squared term.
    ///
    /// # Errors
    /// Returns [`TempStatsError::Overflow`] when the bound exceeds `i64::MAX`.
    pub fn check_accumulator(&self, samples: &[i32], auxiliary: Option<i64>) -> Result<()> {
        let (low, high) = match samples.iter().minmax() {
            MinMaxResult::NoElements => return Ok(()),
            MinMaxResult::OneElement(&v) => (v as i128, v as i128),
            MinMaxResult::MinMax(&lo, &hi) => (lo as i128, hi as i128),
        };
        let bound = match self.statistic {
            Statistic::Minimum | Statistic::Maximum => return Ok(()),
            Statistic::Sum => low.abs().max(high.abs()),
            Statistic::SquaredDeviation => {
                let mean = self.auxiliary(auxiliary)? as i128;
                let widest = (low - mean).abs().max((high - mean).abs());
                widest * widest
            }
        };
        let total = bound.saturating_mul(samples.len() as i128);
        if total > i64::MAX as i128 {
            return Err(TempStatsError::Overflow {
                statistic: self.statistic.to_string(),
                message: format!(
                    "{} samples in [{}, {}] can reach {}",
                    samples.len(),
                    low,
                    high,
                    total
                ),
            });
        }
        Ok(())
    }

    /// Fold a slice of partial results with this operation's combiner
    pub fn combine_all(&self, partials: &[i64]) -> i64 {
        partials
            .iter()
            .fold(self.identity, |acc, &v| (self.combine)(acc, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_entry_points() {
        let names: Vec<&str> = Statistic::iter().map(Statistic::entry_point).collect();
        assert_eq!(
            names,
            vec!["minimum", "maximum", "reduce_add_4", "standardDeviation"]
        );
    }

    #[test]
    fn test_default_workgroup_sizes() {
        assert_eq!(Statistic::Minimum.default_workgroup_size(), 256);
        assert_eq!(Statistic::Maximum.default_workgroup_size(), 256);
        assert_eq!(Statistic::Sum.default_workgroup_size(), 32);
        assert_eq!(Statistic::SquaredDeviation.default_workgroup_size(), 256);
    }

    #[test]
    fn test_identity_is_neutral() {
        for statistic in Statistic::iter() {
            let op = ReductionOp::for_statistic(statistic, 4).unwrap();
            for v in [-500i64, -1, 0, 1, 730] {
                assert_eq!((op.combine)(op.identity, v), v, "{}", statistic);
                assert_eq!((op.combine)(v, op.identity), v, "{}", statistic);
            }
        }
    }

    #[test]
    fn test_padding_is_neutral() {
        for statistic in Statistic::iter() {
            let op = ReductionOp::for_statistic(statistic, 8).unwrap();
            let mean = Some(-42);
            let pad = op.padding_value(mean).unwrap();
            let aux = op.auxiliary(mean).unwrap();
            let loaded = if op.requires_auxiliary {
                map_squared_deviation(pad, aux)
            } else {
                pad as i64
            };
            for v in [-500i64, -1, 0, 1, 730] {
                assert_eq!((op.combine)(loaded, v), v, "{}", statistic);
            }
        }
    }

    #[test]
    fn test_accumulator_bound() {
        let extremes = [i32::MIN, i32::MIN, i32::MAX];
        let op = ReductionOp::for_statistic(Statistic::SquaredDeviation, 4).unwrap();
        let err = op.check_accumulator(&extremes, Some(-715_827_883)).unwrap_err();
        assert!(matches!(err, TempStatsError::Overflow { .. }));

        let sum = ReductionOp::for_statistic(Statistic::Sum, 4).unwrap();
        assert!(sum.check_accumulator(&extremes, None).is_ok());
        let min = ReductionOp::for_statistic(Statistic::Minimum, 4).unwrap();
        assert!(min.check_accumulator(&extremes, None).is_ok());

        let wide = [-100_000_000, 0, 100_000_000];
        assert!(op.check_accumulator(&wide, Some(0)).is_ok());
    }

    #[test]
    fn test_zero_workgroup_rejected() {
        let err = ReductionOp::for_statistic(Statistic::Sum, 0).unwrap_err();
        assert!(matches!(err, TempStatsError::InvalidConfig(_)));
    }

    #[test]
    fn test_non_power_of_two_rejected() {
        let err = ReductionOp::for_statistic(Statistic::Maximum, 48).unwrap_err();
        assert!(err.to_string().contains("power of two"));
    }

    #[test]
    fn test_deviation_requires_mean() {
        let op = ReductionOp::for_statistic(Statistic::SquaredDeviation, 16).unwrap();
        assert!(op.requires_auxiliary);
        assert!(op.padding_value(None).is_err());
        assert_eq!(map_squared_deviation(130, 100), 900);
    }

    #[test]
    fn test_combine_all() {
        let op = ReductionOp::for_statistic(Statistic::Minimum, 2).unwrap();
        assert_eq!(op.combine_all(&[4, -7, 3]), -7);
        assert_eq!(op.combine_all(&[]), i32::MAX as i64);
    }
}
