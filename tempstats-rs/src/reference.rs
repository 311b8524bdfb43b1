//! Direct full-scan statistics
//!
//! Computes the same values as the device pipeline with a single pass over
//! the unpadded series and no workgroups. Used to verify device results.

use crate::error::{Result, TempStatsError};
use crate::series::{from_fixed, Series};
use crate::statistics::Statistics;
use itertools::{Itertools, MinMaxResult};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReferenceStatistics {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub minimum: f64,
    pub maximum: f64,
    pub std_dev: f64,
}

/// Full-scan statistics of `series`, in degrees
pub fn full_scan(series: &Series) -> Result<ReferenceStatistics> {
    let samples = series.samples();
    let (minimum, maximum) = match samples.iter().minmax() {
        MinMaxResult::NoElements => return Err(TempStatsError::EmptySeries),
        MinMaxResult::OneElement(&v) => (v, v),
        MinMaxResult::MinMax(&lo, &hi) => (lo, hi),
    };

    let count = samples.len();
    let sum: i64 = samples.iter().map(|&v| v as i64).sum();
    let mean = sum as f64 / count as f64;
    let variance = samples
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / count as f64;

    Ok(ReferenceStatistics {
        count,
        sum: from_fixed(sum as f64),
        mean: from_fixed(mean),
        minimum: from_fixed(minimum as f64),
        maximum: from_fixed(maximum as f64),
        std_dev: from_fixed(variance.sqrt()),
    })
}

/// One statistic that disagrees with the full scan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mismatch {
    pub statistic: &'static str,
    pub device: f64,
    pub reference: f64,
}

/// Compare device results against a full scan
///
/// Count, sum, minimum and maximum must match exactly. Mean and standard
/// deviation may differ by `tolerance`, relative to the reference value.
pub fn compare(stats: &Statistics, reference: &ReferenceStatistics, tolerance: f64) -> Vec<Mismatch> {
    let exact = [
        ("count", stats.count as f64, reference.count as f64),
        ("sum", stats.sum, reference.sum),
        ("minimum", stats.minimum, reference.minimum),
        ("maximum", stats.maximum, reference.maximum),
    ];
    let approximate = [
        ("mean", stats.mean, reference.mean),
        ("standard deviation", stats.std_dev, reference.std_dev),
    ];

    let exact_mismatches = exact.into_iter().filter(|&(_, a, b)| a != b);
    let approximate_mismatches = approximate
        .into_iter()
        .filter(|&(_, a, b)| (a - b).abs() > tolerance * b.abs().max(1.0));

    exact_mismatches
        .chain(approximate_mismatches)
        .map(|(statistic, device, reference)| Mismatch {
            statistic,
            device,
            reference,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_full_scan() {
        let reference = full_scan(&Series::from_fixed(vec![100, 200, 300, 400])).unwrap();
        assert_eq!(reference.count, 4);
        assert_relative_eq!(reference.sum, 100.0);
        assert_relative_eq!(reference.mean, 25.0);
        assert_relative_eq!(reference.minimum, 10.0);
        assert_relative_eq!(reference.maximum, 40.0);
        assert_relative_eq!(reference.std_dev, 125f64.sqrt());
    }

    #[test]
    fn test_single_element() {
        let reference = full_scan(&Series::from_fixed(vec![-73])).unwrap();
        assert_eq!(reference.minimum, reference.maximum);
        assert_eq!(reference.std_dev, 0.0);
    }

    #[test]
    fn test_empty() {
        assert!(matches!(
            full_scan(&Series::from_fixed(vec![])),
            Err(TempStatsError::EmptySeries)
        ));
    }
}
