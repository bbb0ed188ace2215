//! Timestamps for gateway records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

/// A UTC timestamp.
///
/// Thin wrapper over [`chrono::DateTime<Utc>`] with the second-level
/// arithmetic the gateway needs for TTLs and expiry checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    /// The current time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// A timestamp `seconds` in the future of `self`.
    #[must_use]
    pub fn plus_seconds(self, seconds: u64) -> Self {
        Self(self.0 + chrono::Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX)))
    }

    /// Whether this timestamp is in the past relative to `now`.
    #[must_use]
    pub fn is_past(self, now: Timestamp) -> bool {
        self.0 <= now.0
    }

    /// Whole seconds until `self`, or zero if already past.
    #[must_use]
    pub fn seconds_until(self, now: Timestamp) -> u64 {
        let delta = self.0 - now.0;
        u64::try_from(delta.num_seconds()).unwrap_or(0)
    }

    /// RFC 3339 / ISO-8601 rendering.
    #[must_use]
    pub fn to_rfc3339(self) -> String {
        self.0.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    }

    /// Unix epoch seconds.
    #[must_use]
    pub fn unix_seconds(self) -> i64 {
        self.0.timestamp()
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Self(self.0 + chrono::Duration::from_std(rhs).unwrap_or(chrono::Duration::zero()))
    }
}

impl Sub<Timestamp> for Timestamp {
    type Output = chrono::Duration;

    fn sub(self, rhs: Timestamp) -> chrono::Duration {
        self.0 - rhs.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}
