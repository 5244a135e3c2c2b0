//! Time types for AFFIRM.
//!
//! Wall clock time is read only through a [`Clock`] so that freshness,
//! nonce expiry and scoring decay are reproducible under test.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Wire format for UTC timestamps: `2026-10-19T08:30:00Z`
pub const UTC_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Source of the current time
pub trait Clock: Send + Sync {
    /// Current UTC instant
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }

    /// Jump to an absolute instant
    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Render a timestamp in the wire format (second precision, `Z` suffix)
#[must_use]
pub fn format_utc(ts: DateTime<Utc>) -> String {
    ts.format(UTC_FORMAT).to_string()
}

/// Parse an RFC 3339 timestamp, or a naive ISO timestamp taken as UTC
///
/// # Errors
///
/// Returns error if the string matches neither form
pub fn parse_utc(s: &str) -> CoreResult<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    let trimmed = s.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| CoreError::InvalidTimestamp {
            reason: format!("{}: {}", s, e),
        })
}

/// Symmetric window around "now" within which a timestamp counts as fresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessWindow {
    /// Allowed skew in minutes, in either direction
    pub minutes: i64,
}

impl FreshnessWindow {
    /// Create a window of `minutes`
    #[must_use]
    pub const fn minutes(minutes: i64) -> Self {
        Self { minutes }
    }

    /// Whether `ts` lies within the window around `now`
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let skew = (now - ts).num_seconds().abs();
        skew <= self.minutes.saturating_mul(60)
    }
}

impl Default for FreshnessWindow {
    fn default() -> Self {
        Self::minutes(10)
    }
}
