//! Unified error types for the bridge.
//!
//! One enum per boundary (sensor, bus, configuration).  The orchestrator
//! and `main` wrap these in `anyhow` for context; the variants themselves
//! decide whether a condition is fatal.

use core::fmt;

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

/// Failures surfaced by a [`SensorPort`](crate::app::ports::SensorPort).
///
/// Transient faults never leave the adapter as an `Err`; they become
/// `ERROR` readings.  Only the variants below cross the port boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// Serial open/read/write failed (used inside adapters before counting).
    Transport(String),
    /// The sensor answered with a frame that does not decode.
    Protocol(&'static str),
    /// The reading is outside the physically plausible range.
    OutOfRange,
    /// `measure()` was called without a preceding warm-up.
    NotWarmedUp,
    /// More consecutive faults than the configured ceiling.
    ErrorCeiling { consecutive: u32, ceiling: u32 },
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "serial transport failed: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::OutOfRange => write!(f, "reading out of range"),
            Self::NotWarmedUp => write!(f, "measure requested before warm-up"),
            Self::ErrorCeiling {
                consecutive,
                ceiling,
            } => write!(
                f,
                "{consecutive} consecutive sensor errors (ceiling {ceiling})"
            ),
        }
    }
}

impl std::error::Error for SensorError {}

impl From<std::io::Error> for SensorError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Bus errors
// ---------------------------------------------------------------------------

/// Failures surfaced by a [`BusPort`](crate::app::ports::BusPort).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Publish/subscribe attempted while the connection is down.
    NotConnected,
    /// The initial connection was not confirmed within the wait window.
    ConnectTimeout { waited_secs: u32 },
    /// The connection layer recorded an unrecoverable condition.
    Fatal(String),
    /// The client refused a request (queue closed, invalid topic, ...).
    Client(String),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "MQTT is not connected"),
            Self::ConnectTimeout { waited_secs } => {
                write!(f, "no MQTT connection after {waited_secs}s")
            }
            Self::Fatal(msg) => write!(f, "fatal MQTT error: {msg}"),
            Self::Client(msg) => write!(f, "MQTT client error: {msg}"),
        }
    }
}

impl std::error::Error for BusError {}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The config file could not be read.
    Io(String),
    /// The config file is not valid TOML for [`SystemConfig`](crate::config::SystemConfig).
    Parse(String),
    /// A mandatory key is missing.
    Missing(&'static str),
    /// A value failed validation; the message names the key and why.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "cannot read config file: {msg}"),
            Self::Parse(msg) => write!(f, "cannot parse config file: {msg}"),
            Self::Missing(key) => write!(f, "mandatory key '{key}' not configured"),
            Self::Invalid(msg) => write!(f, "invalid value: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
