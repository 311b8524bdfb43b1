//! Neutral padding of a series to a whole number of workgroups

use crate::error::{Result, TempStatsError};
use tracing::debug;

/// A padded copy of a series, owned by a single reduction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaddedSeries {
    values: Vec<i32>,
    original_len: usize,
    workgroup_size: usize,
}

impl PaddedSeries {
    pub fn values(&self) -> &[i32] {
        &self.values
    }

    /// Length including padding; always a multiple of the workgroup size
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of real samples before padding
    pub fn original_len(&self) -> usize {
        self.original_len
    }

    pub fn padding_len(&self) -> usize {
        self.values.len() - self.original_len
    }

    pub fn workgroup_size(&self) -> usize {
        self.workgroup_size
    }

    pub fn workgroups(&self) -> usize {
        self.values.len() / self.workgroup_size
    }
}

/// Extend `samples` to `ceil(n / workgroup_size) * workgroup_size` elements
///
/// The appended `workgroup_size - n % workgroup_size` elements (none when the
/// length already divides evenly) are all set to `identity`, which must be the
/// neutral value of the reduction the padded series will feed.
///
/// # Errors
/// Returns [`TempStatsError::InvalidConfig`] if `workgroup_size` is zero.
pub fn pad(samples: &[i32], workgroup_size: usize, identity: i32) -> Result<PaddedSeries> {
    if workgroup_size == 0 {
        return Err(TempStatsError::InvalidConfig(
            "workgroup size must be greater than zero".to_string(),
        ));
    }

    let remainder = samples.len() % workgroup_size;
    let padding = if remainder == 0 {
        0
    } else {
        workgroup_size - remainder
    };

    let mut values = Vec::with_capacity(samples.len() + padding);
    values.extend_from_slice(samples);
    values.resize(samples.len() + padding, identity);

    debug!(
        original = samples.len(),
        padded = values.len(),
        workgroup_size,
        identity,
        "padded series"
    );

    Ok(PaddedSeries {
        values,
        original_len: samples.len(),
        workgroup_size,
    })
}
