//! Wall-clock abstraction and store-side creation timestamps.
//!
//! The record store stamps `created_at` itself; callers never supply it.
//! [`Stamper`] turns a [`ClockSource`] into a non-decreasing sequence of
//! millisecond readings so that records inserted later never carry an
//! earlier `created_at` than records inserted before them, even if the
//! system clock steps backwards.
//!
//! # Wire format
//!
//! Timestamps render as ISO-8601 UTC with millisecond precision,
//! e.g. `"2026-10-16T09:30:00.000Z"`. Strings of this fixed shape sort
//! lexicographically in time order, which the `created_at` index relies on.
//! Readings outside years 0000 to 9999 are clamped to that range so the
//! shape never changes.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, Utc};

/// Abstraction over the system clock for dependency injection.
///
/// Allows deterministic testing by replacing the real clock with a manual one.
pub trait ClockSource: Send + Sync {
    /// Returns the current time as milliseconds since Unix epoch.
    fn now_millis(&self) -> i64;
}

/// Default clock source that reads the real system time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    // Millisecond timestamps fit comfortably in i64 until the year 292 million.
    #[allow(clippy::cast_possible_truncation)]
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

/// Clock whose reading only changes when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Creates a clock frozen at `millis`.
    #[must_use]
    pub fn new(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    /// Moves the clock to an absolute reading (may go backwards).
    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// Advances the clock by `delta` milliseconds.
    pub fn advance(&self, delta: i64) {
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }
}

impl ClockSource for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

impl<T: ClockSource + ?Sized> ClockSource for std::sync::Arc<T> {
    fn now_millis(&self) -> i64 {
        (**self).now_millis()
    }
}

/// Produces non-decreasing creation stamps from a clock source.
pub struct Stamper {
    last_millis: AtomicI64,
    clock: Box<dyn ClockSource>,
}

impl Stamper {
    /// Wraps `clock`. The first stamp is whatever the clock reads.
    #[must_use]
    pub fn new(clock: Box<dyn ClockSource>) -> Self {
        Self {
            last_millis: AtomicI64::new(i64::MIN),
            clock,
        }
    }

    /// Returns the next stamp in milliseconds, never lower than a previous one.
    pub fn next_millis(&self) -> i64 {
        let now = self.clock.now_millis();
        let previous = self.last_millis.fetch_max(now, Ordering::SeqCst);
        if previous > now {
            tracing::warn!(
                now,
                previous,
                "system clock moved backwards; reusing last creation stamp"
            );
            previous
        } else {
            now
        }
    }

    /// Returns the next stamp rendered as an ISO-8601 string.
    pub fn next_iso8601(&self) -> String {
        format_iso8601(self.next_millis())
    }
}

impl Default for Stamper {
    fn default() -> Self {
        Self::new(Box::new(SystemClock))
    }
}

impl std::fmt::Debug for Stamper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stamper")
            .field("last_millis", &self.last_millis.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// `0000-01-01T00:00:00.000Z` in epoch milliseconds.
pub const MIN_STAMP_MILLIS: i64 = -62_167_219_200_000;

/// `9999-12-31T23:59:59.999Z` in epoch milliseconds.
pub const MAX_STAMP_MILLIS: i64 = 253_402_300_799_999;

/// Renders epoch milliseconds as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
///
/// Inputs outside four-digit years clamp to the nearest representable stamp.
#[must_use]
pub fn format_iso8601(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis.clamp(MIN_STAMP_MILLIS, MAX_STAMP_MILLIS))
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses an ISO-8601 / RFC 3339 string back to epoch milliseconds.
#[must_use]
pub fn parse_iso8601(text: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}
