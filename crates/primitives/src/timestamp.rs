//! Millisecond timestamps usable as range bounds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::range::RangeValue;

/// Milliseconds since the Unix epoch.
///
/// Temporal ranges step in whole milliseconds so range arithmetic stays in integers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TimestampMs(pub i64);

impl TimestampMs {
    /// Convert back to a UTC datetime, `None` if out of chrono's range.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }
}

impl From<DateTime<Utc>> for TimestampMs {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.timestamp_millis())
    }
}

impl RangeValue for TimestampMs {
    #[inline]
    fn next_value(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    #[inline]
    fn previous_value(self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    #[inline]
    fn diff(self, other: Self) -> u64 {
        if self.0 <= other.0 {
            return 0;
        }
        u64::try_from(i128::from(self.0) - i128::from(other.0)).unwrap_or(u64::MAX)
    }

    #[inline]
    fn add_steps(self, steps: u64) -> Self {
        let steps = i64::try_from(steps).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(steps))
    }
}
