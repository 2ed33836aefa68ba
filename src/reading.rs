//! Measurement outcome published to the bus.
//!
//! A [`Reading`] is created at the moment of measurement (or of a hold
//! decision), gets its timestamp assigned once by the orchestrator and is
//! serialised exactly once into the outbound JSON message:
//!
//! ```text
//! {"PM10":0.1,"PM25":0.2,"STATE":"OK","TIMESTAMP":"2020-01-01T02:02:03+00:00"}
//! ```

use chrono::{DateTime, FixedOffset, SecondsFormat, Timelike};
use serde::{Serialize, Serializer};

/// Status tag of a [`Reading`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReadingState {
    Ok,
    Error,
    Offline,
    Deactivated,
}

impl ReadingState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Error => "ERROR",
            Self::Offline => "OFFLINE",
            Self::Deactivated => "DEACTIVATED",
        }
    }
}

impl core::fmt::Display for ReadingState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A timestamped measurement outcome.
///
/// `pm10`/`pm25` are present iff `state == Ok`; the constructors are the
/// only way to build one, so the invariant cannot be broken from outside.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    #[serde(rename = "PM10")]
    pm10: Option<f32>,
    #[serde(rename = "PM25")]
    pm25: Option<f32>,
    #[serde(rename = "STATE")]
    state: ReadingState,
    #[serde(rename = "TIMESTAMP", serialize_with = "serialize_iso")]
    timestamp: DateTime<FixedOffset>,
}

impl Reading {
    /// A successful measurement (µg/m³).
    pub fn ok(pm10: f32, pm25: f32, timestamp: DateTime<FixedOffset>) -> Self {
        Self {
            pm10: Some(pm10),
            pm25: Some(pm25),
            state: ReadingState::Ok,
            timestamp,
        }
    }

    /// A value-less outcome (`Error`, `Offline` or `Deactivated`).
    ///
    /// Passing `ReadingState::Ok` here is a programming error; it is
    /// downgraded to `Error` since there are no values to carry.
    pub fn without_values(state: ReadingState, timestamp: DateTime<FixedOffset>) -> Self {
        let state = if state == ReadingState::Ok {
            ReadingState::Error
        } else {
            state
        };
        Self {
            pm10: None,
            pm25: None,
            state,
            timestamp,
        }
    }

    pub fn error(timestamp: DateTime<FixedOffset>) -> Self {
        Self::without_values(ReadingState::Error, timestamp)
    }

    pub fn deactivated(timestamp: DateTime<FixedOffset>) -> Self {
        Self::without_values(ReadingState::Deactivated, timestamp)
    }

    pub fn state(&self) -> ReadingState {
        self.state
    }

    pub fn pm10(&self) -> Option<f32> {
        self.pm10
    }

    pub fn pm25(&self) -> Option<f32> {
        self.pm25
    }

    pub fn timestamp(&self) -> DateTime<FixedOffset> {
        self.timestamp
    }

    /// The higher of both particulate values, if this is an OK reading.
    pub fn peak(&self) -> Option<f32> {
        match (self.pm10, self.pm25) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        }
    }

    /// Stamp the reading with the publication time.
    pub fn stamped(mut self, timestamp: DateTime<FixedOffset>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Render the outbound bus message.
    pub fn to_message(&self) -> String {
        // A struct of options, an enum and a string cannot fail to serialise.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Whole seconds, or six fraction digits (truncated) when the
/// microseconds are non-zero.
fn serialize_iso<S: Serializer>(ts: &DateTime<FixedOffset>, s: S) -> Result<S::Ok, S::Error> {
    let format = if ts.nanosecond() % 1_000_000_000 < 1_000 {
        SecondsFormat::Secs
    } else {
        SecondsFormat::Micros
    };
    s.serialize_str(&ts.to_rfc3339_opts(format, false))
}
