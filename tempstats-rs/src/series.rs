//! Fixed-point temperature series
//!
//! Decimal readings are stored as integers scaled by [`SCALE`] so the
//! reduction kernels never touch floating point.

use crate::error::{Result, TempStatsError};

/// Fixed-point scale applied to every reading (one decimal place)
pub const SCALE: i32 = 10;

/// Convert a decimal reading to fixed point, rounding to the nearest unit
///
/// Rounding rather than truncating keeps values like `2.3` (which is
/// `22.999…` once scaled) at `23`.
pub fn to_fixed(value: f64) -> Option<i32> {
    let scaled = (value * SCALE as f64).round();
    if scaled.is_finite() && scaled >= i32::MIN as f64 && scaled <= i32::MAX as f64 {
        Some(scaled as i32)
    } else {
        None
    }
}

/// Convert a fixed-point value back to the reading's unit
pub fn from_fixed(value: f64) -> f64 {
    value / SCALE as f64
}

/// An immutable, ordered sequence of fixed-point samples
///
/// A `Series` is loaded once and then only read; every reduction makes its
/// own padded copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    samples: Vec<i32>,
}

impl Series {
    /// Build a series from samples that are already in fixed point
    pub fn from_fixed(samples: Vec<i32>) -> Self {
        Self { samples }
    }

    /// Build a series from decimal readings
    ///
    /// # Errors
    /// Returns [`TempStatsError::Data`] for a reading that does not fit the
    /// fixed-point range (including NaN and infinities).
    pub fn from_decimal(values: &[f64]) -> Result<Self> {
        let samples = values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                to_fixed(v).ok_or_else(|| TempStatsError::Data {
                    record: i,
                    message: format!("reading {} is outside the fixed-point range", v),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[i32] {
        &self.samples
    }

    /// Number of real (unpadded) samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl From<Vec<i32>> for Series {
    fn from(samples: Vec<i32>) -> Self {
        Self::from_fixed(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_to_fixed_rounds() {
        assert_eq!(to_fixed(2.3), Some(23));
        assert_eq!(to_fixed(-0.05), Some(-1));
        assert_eq!(to_fixed(-12.4), Some(-124));
        assert_eq!(to_fixed(f64::NAN), None);
        assert_eq!(to_fixed(1e12), None);
    }

    #[test]
    fn test_from_fixed() {
        assert_relative_eq!(from_fixed(125.0), 12.5);
        assert_relative_eq!(from_fixed(-3.0), -0.3);
    }

    #[test]
    fn test_series_from_decimal() {
        let series = Series::from_decimal(&[10.0, 20.5, -3.2]).unwrap();
        assert_eq!(series.samples(), &[100, 205, -32]);
        assert_eq!(series.len(), 3);
        assert!(!series.is_empty());
    }

    #[test]
    fn test_series_from_decimal_rejects_nan() {
        let err = Series::from_decimal(&[1.0, f64::NAN]).unwrap_err();
        assert!(matches!(err, TempStatsError::Data { record: 1, .. }));
    }
}
