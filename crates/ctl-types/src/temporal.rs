use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A UTC instant with millisecond precision.
///
/// Validity intervals, fork points and creation times are all expressed as
/// `Timestamp`s. Ordering is chronological; serialization is RFC 3339.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// The current wall-clock time, truncated to milliseconds.
    pub fn now() -> Self {
        Self::from_millis(Utc::now().timestamp_millis())
    }

    /// Create from milliseconds since the UNIX epoch.
    ///
    /// Values outside chrono's representable range saturate to the minimum
    /// representable instant.
    pub fn from_millis(ms: i64) -> Self {
        Self(DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC))
    }

    /// Milliseconds since the UNIX epoch.
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// The underlying chrono value.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// This instant shifted by `ms` milliseconds (negative moves backwards).
    pub fn plus_millis(&self, ms: i64) -> Self {
        Self::from_millis(self.as_millis().saturating_add(ms))
    }

    /// Parse an RFC 3339 string (e.g. `2024-05-01T12:00:00Z`).
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let parsed = DateTime::parse_from_rfc3339(s)
            .map_err(|e| TypeError::InvalidTimestamp(format!("{s}: {e}")))?;
        Ok(Self::from_millis(parsed.with_timezone(&Utc).timestamp_millis()))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self::from_millis(value.timestamp_millis())
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

/// Source of "now" for every time-defaulting operation.
///
/// Injected into stores and trees so tests can pin time precisely.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock that never goes backwards and never repeats a value.
///
/// Two appends in the same millisecond would otherwise produce an empty
/// validity interval, so each reading is at least one millisecond after the
/// previous one.
#[derive(Debug, Default)]
pub struct SystemClock {
    last_ms: Mutex<i64>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock whose first reading is strictly after `floor`, for processes
    /// continuing a history recorded by an earlier one.
    pub fn after(floor: Timestamp) -> Self {
        Self {
            last_ms: Mutex::new(floor.as_millis()),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let wall = Utc::now().timestamp_millis();
        let mut last = self.last_ms.lock().unwrap_or_else(|e| e.into_inner());
        let next = if wall > *last { wall } else { *last + 1 };
        *last = next;
        Timestamp::from_millis(next)
    }
}

/// A clock that only moves when told to. Intended for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            ms: AtomicI64::new(start.as_millis()),
        }
    }

    /// Start at `ms` milliseconds since the epoch.
    pub fn at_millis(ms: i64) -> Self {
        Self {
            ms: AtomicI64::new(ms),
        }
    }

    pub fn set(&self, to: Timestamp) {
        self.ms.store(to.as_millis(), Ordering::SeqCst);
    }

    /// Move forward by `ms` and return the new reading.
    pub fn advance(&self, ms: i64) -> Timestamp {
        Timestamp::from_millis(self.ms.fetch_add(ms, Ordering::SeqCst) + ms)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.ms.load(Ordering::SeqCst))
    }
}
