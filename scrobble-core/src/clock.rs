//! Clock capability (component 1, "Clock & Sleeper").
//!
//! Business-logic timing decisions (close-to-interval, adaptive backoff,
//! reconciler timestamp synthesis) read "now" through this trait rather than
//! calling `chrono::Utc::now()` directly, so they can be driven
//! deterministically in tests without depending on wall-clock sleeps.
//! Suspending the task itself (§5 suspension points) is a separate concern
//! handled with `tokio::time::sleep`, which test code controls via
//! `tokio::time::pause`/`advance` instead.

use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// Yields second-precision instants for timing decisions.
pub trait Clock: Send + Sync {
    /// Returns the current instant, truncated to second precision.
    fn now(&self) -> DateTime<Utc>;
}

/// The real wall-clock, truncated to whole seconds per the data model (§3).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        truncate_to_secs(Utc::now())
    }
}

fn truncate_to_secs(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap_or(t)
}

/// A clock whose value is set and advanced explicitly by test code.
///
/// `cfg(test)` applies crate-wide under `cargo test`, so this is visible from
/// the `#[cfg(test)]` modules in other files (`poller.rs`, `reconciler.rs`)
/// as well as here.
#[cfg(test)]
pub struct FakeClock {
    current: Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl FakeClock {
    /// Creates a fake clock starting at the given instant.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(truncate_to_secs(start)),
        }
    }

    /// Sets the clock to an explicit instant.
    pub fn set(&self, at: DateTime<Utc>) {
        let mut guard = self.current.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = truncate_to_secs(at);
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.current.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard += by;
    }
}

#[cfg(test)]
impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self
            .current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
