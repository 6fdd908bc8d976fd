//! Keyed log throttling
//!
//! Acquisition loops and the control relay can fail on every iteration
//! (unplugged device, unreachable receiver). `LogThrottler` lets the first
//! occurrence of a failure through, swallows repeats for an interval, and
//! reports how many were swallowed once the interval has passed.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    last_logged: Instant,
    suppressed: u64,
}

/// Log throttler that limits how often the same message key is logged
///
/// ```rust
/// use teleop_gateway::utils::LogThrottler;
/// use std::time::Duration;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert!(throttler.should_log("device_error"));
/// assert!(!throttler.should_log("device_error"));
/// ```
pub struct LogThrottler {
    entries: Mutex<HashMap<String, Entry>>,
    interval: Duration,
}

impl LogThrottler {
    /// Create a new log throttler with the specified interval
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    /// Create a new log throttler with interval specified in seconds
    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Check whether `key` may be logged now.
    ///
    /// Returns `Some(n)` when the message should be logged, where `n` is the
    /// number of occurrences swallowed since the last logged one, and `None`
    /// when it is throttled.
    pub fn check(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last_logged) < self.interval => {
                entry.suppressed = entry.suppressed.saturating_add(1);
                None
            }
            Some(entry) => {
                let suppressed = std::mem::take(&mut entry.suppressed);
                entry.last_logged = now;
                Some(suppressed)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Check if a message should be logged (not throttled)
    pub fn should_log(&self, key: &str) -> bool {
        self.check(key).is_some()
    }

    /// Forget a key, typically once the error condition has recovered,
    /// so the next failure is logged immediately.
    pub fn clear(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Get the number of tracked keys
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the throttler is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for LogThrottler {
    /// 5 second interval
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled warning, appending the number of swallowed repeats
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.check($key) {
            if suppressed > 0 {
                tracing::warn!("{} (suppressed {} repeats)", format_args!($($arg)*), suppressed);
            } else {
                tracing::warn!($($arg)*);
            }
        }
    };
}

/// Throttled error, appending the number of swallowed repeats
#[macro_export]
macro_rules! error_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.check($key) {
            if suppressed > 0 {
                tracing::error!("{} (suppressed {} repeats)", format_args!($($arg)*), suppressed);
            } else {
                tracing::error!($($arg)*);
            }
        }
    };
}
