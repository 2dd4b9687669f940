//! Sync window arithmetic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use epgsync_common::{Error, Result, UtcMillis, HOUR_MS};

/// Half-open time range `[start_ms, end_ms)` covered by one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncWindow {
    pub start_ms: UtcMillis,
    pub end_ms: UtcMillis,
}

impl SyncWindow {
    /// Create a window.
    ///
    /// # Errors
    /// - `InvalidInput` unless `start_ms < end_ms`
    pub fn new(start_ms: UtcMillis, end_ms: UtcMillis) -> Result<Self> {
        if start_ms >= end_ms {
            return Err(Error::InvalidInput(format!(
                "Sync window must start before it ends ({} >= {})",
                start_ms, end_ms
            )));
        }
        Ok(Self { start_ms, end_ms })
    }

    /// Length of the window in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }

    /// Whether `ts` falls inside the window.
    pub fn contains(&self, ts: UtcMillis) -> bool {
        self.start_ms <= ts && ts < self.end_ms
    }
}

fn format_ms(ms: UtcMillis) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

impl fmt::Display for SyncWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", format_ms(self.start_ms), format_ms(self.end_ms))
    }
}

/// Align `now_ms` down to the start of its hour.
pub fn align_to_hour(now_ms: UtcMillis) -> UtcMillis {
    now_ms - now_ms.rem_euclid(HOUR_MS)
}

/// Longest window a single sync may cover.
pub const MAX_PERIOD_MS: i64 = 366 * 24 * HOUR_MS;

/// Check that a requested window length is usable.
///
/// # Errors
/// - `InvalidInput` if `period_ms` is not positive or exceeds [`MAX_PERIOD_MS`]
pub fn check_period(period_ms: i64) -> Result<()> {
    if period_ms <= 0 {
        return Err(Error::InvalidInput(format!(
            "Sync period must be positive, got {} ms",
            period_ms
        )));
    }
    if period_ms > MAX_PERIOD_MS {
        return Err(Error::InvalidInput(format!(
            "Sync period of {} ms exceeds the {} ms limit",
            period_ms, MAX_PERIOD_MS
        )));
    }
    Ok(())
}

/// Compute the window for a sync of `period_ms` starting now.
///
/// The start is aligned down to the hour so every run within the same hour
/// lands on the same boundary.
///
/// # Errors
/// - `InvalidInput` if `period_ms` is not positive or too long
pub fn compute_window(now_ms: UtcMillis, period_ms: i64) -> Result<SyncWindow> {
    check_period(period_ms)?;
    let start_ms = align_to_hour(now_ms);
    SyncWindow::new(start_ms, start_ms.saturating_add(period_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TWO_WEEKS_MS: i64 = 14 * 24 * HOUR_MS;

    #[test]
    fn test_two_week_window() {
        let now = 1_700_000_123_456;
        let window = compute_window(now, TWO_WEEKS_MS).unwrap();

        assert_eq!(window.end_ms - window.start_ms, 1_209_600_000);
        assert!(window.start_ms <= now);
        assert_eq!(window.start_ms % HOUR_MS, 0);
        assert!(now - window.start_ms < HOUR_MS);
    }

    #[test]
    fn test_aligned_now_is_its_own_start() {
        let now = 400_000 * HOUR_MS;
        assert_eq!(compute_window(now, HOUR_MS).unwrap().start_ms, now);
    }

    #[test]
    fn test_before_epoch_aligns_down() {
        assert_eq!(align_to_hour(-1), -HOUR_MS);
    }

    #[test]
    fn test_non_positive_period_rejected() {
        assert!(compute_window(0, 0).is_err());
        assert!(compute_window(0, -5).is_err());
    }

    #[test]
    fn test_oversized_period_rejected() {
        assert!(compute_window(0, MAX_PERIOD_MS).is_ok());
        assert!(matches!(
            compute_window(0, MAX_PERIOD_MS + 1),
            Err(Error::InvalidInput(_))
        ));
        assert!(check_period(i64::MAX).is_err());
    }

    #[test]
    fn test_window_contains_is_half_open() {
        let window = SyncWindow::new(0, HOUR_MS).unwrap();
        assert!(window.contains(0));
        assert!(!window.contains(HOUR_MS));
        assert!(SyncWindow::new(HOUR_MS, HOUR_MS).is_err());
    }

    proptest! {
        #[test]
        fn prop_same_hour_same_start(hour in 0i64..10_000_000, a in 0i64..HOUR_MS, b in 0i64..HOUR_MS) {
            let base = hour * HOUR_MS;
            let first = compute_window(base + a, TWO_WEEKS_MS).unwrap();
            let second = compute_window(base + b, TWO_WEEKS_MS).unwrap();
            prop_assert_eq!(first.start_ms, second.start_ms);
            prop_assert!(first.start_ms <= base + a);
        }
    }
}
