//! Fixed-window hit counting.
//!
//! Windows are aligned to the Unix epoch, not to the first hit, so a caller
//! can be admitted up to twice the nominal rate across a window boundary.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default permits per window.
pub const DEFAULT_PERMITS: u32 = 5;

/// Default window width.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// Rate limiter parameters.
///
/// # Example
///
/// ```rust
/// use seenstore::RateLimitConfig;
/// use std::time::Duration;
///
/// let config = RateLimitConfig::default();
/// assert_eq!(config.permits, 5);
/// assert_eq!(config.window, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Admissions allowed per key per window.
    pub permits: u32,
    /// Window width. Sub-second precision is ignored.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            permits: DEFAULT_PERMITS,
            window: DEFAULT_WINDOW,
        }
    }
}

impl RateLimitConfig {
    /// Builder method to set the permits per window (minimum 1).
    #[must_use]
    pub fn with_permits(mut self, permits: u32) -> Self {
        self.permits = permits.max(1);
        self
    }

    /// Builder method to set the window width (minimum 1 second).
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window.max(Duration::from_secs(1));
        self
    }

    /// Window width in whole seconds, never zero.
    #[must_use]
    pub fn window_secs(&self) -> u64 {
        self.window.as_secs().max(1)
    }
}

/// Returns the start of the window containing `now`, in Unix seconds.
///
/// Times before the epoch map to 0.
#[must_use]
pub fn window_start(now: SystemTime, window_secs: u64) -> u64 {
    let secs = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let width = window_secs.max(1);
    secs - secs % width
}

#[derive(Debug, Clone, Copy)]
struct HitCounter {
    window_start: u64,
    count: u32,
}

/// Counters keyed by `key + "/" + window_start`.
#[derive(Debug, Default)]
pub(crate) struct HitBuckets {
    counters: HashMap<String, HitCounter>,
    last_swept_window: u64,
}

impl HitBuckets {
    /// Counts a hit in the bucket for `key` at `window_start`.
    ///
    /// Returns true if the hit is admitted. Denied hits do not increment.
    pub(crate) fn admit(&mut self, key: &str, window_start: u64, permits: u32) -> bool {
        let bucket = format!("{key}/{window_start}");
        match self.counters.get_mut(&bucket) {
            Some(counter) if counter.count >= permits => false,
            Some(counter) => {
                counter.count += 1;
                true
            },
            None => {
                self.counters.insert(
                    bucket,
                    HitCounter {
                        window_start,
                        count: 1,
                    },
                );
                true
            },
        }
    }

    /// Drops buckets older than the previous window, at most once per window.
    ///
    /// Returns the number of buckets removed.
    pub(crate) fn sweep(&mut self, window_start: u64, window_secs: u64) -> usize {
        if window_start <= self.last_swept_window {
            return 0;
        }
        self.last_swept_window = window_start;

        let oldest_kept = window_start.saturating_sub(window_secs);
        let before = self.counters.len();
        self.counters
            .retain(|_, counter| counter.window_start >= oldest_kept);
        before - self.counters.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.counters.len()
    }

    #[cfg(test)]
    pub(crate) fn count(&self, key: &str, window_start: u64) -> Option<u32> {
        self.counters
            .get(&format!("{key}/{window_start}"))
            .map(|c| c.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, 5, 0)]
    #[test_case(4, 5, 0)]
    #[test_case(5, 5, 5)]
    #[test_case(1_700_000_003, 5, 1_700_000_000)]
    #[test_case(1_700_000_009, 5, 1_700_000_005)]
    #[test_case(61, 60, 60)]
    #[test_case(7, 0, 7; "zero width behaves as one second")]
    fn test_window_start(secs: u64, width: u64, expected: u64) {
        let now = UNIX_EPOCH + Duration::from_secs(secs);
        assert_eq!(window_start(now, width), expected);
    }

    #[test]
    fn test_window_start_ignores_subsecond() {
        let now = UNIX_EPOCH + Duration::from_millis(9_999);
        assert_eq!(window_start(now, 5), 5);
    }

    #[test]
    fn test_window_start_before_epoch() {
        let now = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(window_start(now, 5), 0);
    }

    #[test]
    fn test_admit_up_to_permits() {
        let mut buckets = HitBuckets::default();
        for _ in 0..5 {
            assert!(buckets.admit("example.com", 100, 5));
        }
        assert!(!buckets.admit("example.com", 100, 5));
        assert!(!buckets.admit("example.com", 100, 5));
        assert_eq!(buckets.count("example.com", 100), Some(5));

        // Next window starts a fresh counter.
        assert!(buckets.admit("example.com", 105, 5));
        assert_eq!(buckets.count("example.com", 105), Some(1));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut buckets = HitBuckets::default();
        assert!(buckets.admit("a", 0, 1));
        assert!(!buckets.admit("a", 0, 1));
        assert!(buckets.admit("b", 0, 1));
    }

    #[test]
    fn test_sweep_keeps_current_and_previous_window() {
        let mut buckets = HitBuckets::default();
        buckets.admit("k", 100, 5);
        buckets.admit("k", 105, 5);
        buckets.admit("k", 110, 5);

        let removed = buckets.sweep(110, 5);
        assert_eq!(removed, 1);
        assert_eq!(buckets.len(), 2);
        assert!(buckets.count("k", 100).is_none());
        assert!(buckets.count("k", 105).is_some());
    }

    #[test]
    fn test_sweep_runs_once_per_window() {
        let mut buckets = HitBuckets::default();
        assert_eq!(buckets.sweep(100, 5), 0);
        buckets.admit("k", 0, 5);
        // Same window: no second sweep.
        assert_eq!(buckets.sweep(100, 5), 0);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets.sweep(105, 5), 1);
    }
}
