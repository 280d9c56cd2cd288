//! Timestamp normalization.
//!
//! # Responsibilities
//! - Parse textual timestamps (RFC 3339, ISO-like naive forms, bare dates, epoch seconds)
//! - Convert every accepted form into a `UtcInstant`
//! - Reject unparseable or out-of-range input with `InvalidTimestampError`
//!
//! # Design Decisions
//! - Naive (offset-less) timestamps are interpreted as UTC
//! - Digit-only text is Unix seconds; milliseconds must be passed as `TimestampInput::UnixMillis`
//! - Pure functions, no shared state

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Naive layouts accepted after RFC 3339 parsing fails.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Offset layouts that are close to, but not strictly, RFC 3339.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

/// Error returned when a timestamp cannot be interpreted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid timestamp '{input}': {reason}")]
pub struct InvalidTimestampError {
    /// The rejected input, rendered as text.
    pub input: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

impl InvalidTimestampError {
    fn new(input: impl Into<String>, reason: &'static str) -> Self {
        Self {
            input: input.into(),
            reason,
        }
    }
}

/// A timezone-aware instant, always expressed in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UtcInstant(DateTime<Utc>);

impl UtcInstant {
    /// The Unix epoch.
    pub const EPOCH: UtcInstant = UtcInstant(DateTime::<Utc>::UNIX_EPOCH);

    /// Wrap an existing UTC datetime.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Build from milliseconds since the Unix epoch.
    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_millis(millis).map(Self)
    }

    /// Milliseconds since the Unix epoch.
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// The underlying chrono value.
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is in the future.
    pub fn elapsed_since(&self, earlier: UtcInstant) -> Duration {
        (self.0 - earlier.0).to_std().unwrap_or(Duration::ZERO)
    }

    /// `self + duration`, or `None` on overflow.
    pub fn checked_add(&self, duration: Duration) -> Option<Self> {
        let delta = chrono::Duration::from_std(duration).ok()?;
        self.0.checked_add_signed(delta).map(Self)
    }

    /// RFC 3339 rendering with millisecond precision and a `Z` suffix.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }
}

impl fmt::Display for UtcInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for UtcInstant {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

/// Every timestamp shape accepted by `normalize`.
#[derive(Debug, Clone, PartialEq)]
pub enum TimestampInput {
    Text(String),
    UnixSeconds(i64),
    UnixMillis(i64),
    Naive(NaiveDateTime),
    Aware(DateTime<FixedOffset>),
    Utc(DateTime<Utc>),
}

impl From<&str> for TimestampInput {
    fn from(s: &str) -> Self {
        TimestampInput::Text(s.to_string())
    }
}

impl From<String> for TimestampInput {
    fn from(s: String) -> Self {
        TimestampInput::Text(s)
    }
}

impl From<NaiveDateTime> for TimestampInput {
    fn from(dt: NaiveDateTime) -> Self {
        TimestampInput::Naive(dt)
    }
}

impl From<DateTime<FixedOffset>> for TimestampInput {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        TimestampInput::Aware(dt)
    }
}

impl From<DateTime<Utc>> for TimestampInput {
    fn from(dt: DateTime<Utc>) -> Self {
        TimestampInput::Utc(dt)
    }
}

/// Normalize any accepted timestamp into a `UtcInstant`.
///
/// Naive values (no offset) are taken to already be in UTC.
pub fn normalize(input: impl Into<TimestampInput>) -> Result<UtcInstant, InvalidTimestampError> {
    match input.into() {
        TimestampInput::Text(text) => parse_text(&text),
        TimestampInput::UnixSeconds(secs) => DateTime::<Utc>::from_timestamp(secs, 0)
            .map(UtcInstant)
            .ok_or_else(|| InvalidTimestampError::new(secs.to_string(), "epoch seconds out of range")),
        TimestampInput::UnixMillis(millis) => UtcInstant::from_millis(millis)
            .ok_or_else(|| InvalidTimestampError::new(millis.to_string(), "epoch milliseconds out of range")),
        TimestampInput::Naive(naive) => Ok(naive_as_utc(&naive)),
        TimestampInput::Aware(aware) => Ok(UtcInstant(aware.with_timezone(&Utc))),
        TimestampInput::Utc(utc) => Ok(UtcInstant(utc)),
    }
}

fn naive_as_utc(naive: &NaiveDateTime) -> UtcInstant {
    UtcInstant(Utc.from_utc_datetime(naive))
}

fn parse_text(raw: &str) -> Result<UtcInstant, InvalidTimestampError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(InvalidTimestampError::new(raw, "empty timestamp"));
    }

    if let Ok(aware) = DateTime::parse_from_rfc3339(text) {
        return Ok(UtcInstant(aware.with_timezone(&Utc)));
    }

    for format in OFFSET_FORMATS {
        if let Ok(aware) = DateTime::parse_from_str(text, format) {
            return Ok(UtcInstant(aware.with_timezone(&Utc)));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive_as_utc(&naive));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive_as_utc(&midnight));
        }
    }

    if is_epoch_seconds(text) {
        return match text.parse::<i64>() {
            Ok(secs) => normalize(TimestampInput::UnixSeconds(secs))
                .map_err(|e| InvalidTimestampError::new(raw, e.reason)),
            Err(_) => Err(InvalidTimestampError::new(raw, "epoch seconds out of range")),
        };
    }

    Err(InvalidTimestampError::new(raw, "unrecognized timestamp format"))
}

fn is_epoch_seconds(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}
