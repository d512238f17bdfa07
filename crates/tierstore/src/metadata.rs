//! Disk store metadata side file
//!
//! `first`/`last` are millisecond timestamps bounding the age range of writes,
//! `size` is the live entry count.

use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current wall clock in unix milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a file timestamp to unix milliseconds
pub fn system_time_millis(time: SystemTime) -> i64 {
    DateTime::<Utc>::from(time).timestamp_millis()
}

/// Persisted `{first, last, size}` record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Lower bound of the age window (ms)
    pub first: i64,
    /// Time of the most recent new entry (ms)
    pub last: i64,
    /// Number of entry files
    pub size: usize,
}

#[derive(Deserialize)]
struct RawMetadata {
    first: Option<serde_json::Value>,
    last: Option<serde_json::Value>,
    size: Option<serde_json::Value>,
}

impl Metadata {
    /// Fresh metadata: `{now, now, 0}`
    pub fn fresh(now: i64) -> Self {
        Self {
            first: now,
            last: now,
            size: 0,
        }
    }

    /// Parse a side file, replacing missing or invalid fields with defaults.
    /// Unparsable input yields [`Metadata::fresh`].
    pub fn parse(bytes: &[u8], now: i64) -> Self {
        let Ok(raw) = serde_json::from_slice::<RawMetadata>(bytes) else {
            return Self::fresh(now);
        };

        let timestamp = |v: Option<serde_json::Value>| {
            v.and_then(|v| v.as_f64())
                .filter(|t| *t > 0.0)
                .map(|t| t as i64)
                .unwrap_or(now)
        };

        Self {
            first: timestamp(raw.first),
            last: timestamp(raw.last),
            size: raw
                .size
                .and_then(|v| v.as_f64())
                .filter(|s| *s >= 0.0)
                .map(|s| s as usize)
                .unwrap_or(0),
        }
    }

    /// Serialized side file contents
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Record a new entry
    pub fn grow(&mut self, now: i64) {
        self.size += 1;
        self.last = now;
    }

    /// Record a removed entry, floored at zero
    pub fn shrink(&mut self) {
        self.size = self.size.saturating_sub(1);
    }

    /// Eviction cutoff: midpoint of the age window, or its upper bound once
    /// the window is 2ms wide or less.
    pub fn threshold(&self) -> i64 {
        let min = self.first.min(self.last);
        let max = self.first.max(self.last);
        let spread = max - min;

        if spread > 2 {
            min + spread / 2
        } else {
            max
        }
    }

    /// Whether the age window has collapsed to its upper bound
    pub fn is_collapsed(&self) -> bool {
        (self.first - self.last).abs() <= 2
    }
}
