//! System configuration parameters
//!
//! Every tunable of the bridge, loaded from a TOML file and optionally
//! overridden from the command line.  Missing keys fall back to the
//! defaults below.
//!
//! ```toml
//! serial_port = "/dev/ttyUSB0"
//! mqtt_host = "broker.local"
//! mqtt_client_id = "sds011"
//! mqtt_channel_out_state = "sensor/dust/state"
//! mqtt_channel_in_humi = ["weather/outdoor", "humidity"]
//! deactivation_time_ranges = [[0, 360], [1320, 1439]]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::subscription::TopicSpec;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/sds011-mqtt.conf";

const MQTT_PORT: u16 = 1883;
const MQTT_PORT_TLS: u16 = 8883;

/// MQTT protocol levels as numbered on the wire.
pub const MQTT_V311: u8 = 4;
pub const MQTT_V5: u8 = 5;

pub const LOG_MAX_BYTES: u64 = 1_048_576;
pub const LOG_MAX_COUNT: u32 = 10;

/// Core system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    // --- Sensor ---
    /// Serial device of the SDS011 (e.g. `/dev/ttyUSB0`)
    pub serial_port: Option<String>,
    /// Replace the sensor with a fixed dummy reading
    pub mock_sensor: bool,
    /// Consecutive transient sensor faults tolerated before aborting
    pub abort_after_n_errors: u32,

    // --- Timing (seconds) ---
    pub time_warm_up: f64,
    pub time_cool_down: f64,
    /// Wait after switching the sensor power on via the actor channel
    pub time_wait_for_actor: f64,
    pub time_interval_min: f64,
    pub time_interval_max: f64,
    /// Duration of one orchestrator tick
    pub time_step: f64,
    /// Minimum slack between planned and required interval for putting
    /// the sensor to sleep
    pub sensor_sleep_margin: f64,
    /// Age after which the last reading no longer drives the interval
    pub reading_staleness: f64,
    /// Upper bound for the initial broker connection
    pub mqtt_connect_wait: f64,
    /// Wait after subscribing so retained messages arrive
    pub mqtt_retained_wait: f64,

    // --- Adaptive interval (µg/m³) ---
    pub adaptive_dust_lower: f64,
    pub adaptive_dust_upper: f64,

    // --- Hold conditions ---
    #[serde(alias = "temperatur_range")]
    pub temperature_range: (f64, f64),
    pub humidity_range: (f64, f64),
    /// Minute-of-day pairs, kept raw and interpreted per cycle
    pub deactivation_time_ranges: Option<serde_json::Value>,

    // --- Channels ---
    pub mqtt_channel_out_state: Option<String>,
    pub mqtt_channel_out_actor: Option<String>,
    pub mqtt_channel_in_temp: Option<TopicSpec>,
    pub mqtt_channel_in_humi: Option<TopicSpec>,
    pub mqtt_channel_in_hold: Option<TopicSpec>,
    pub mqtt_last_will: Option<String>,

    // --- Broker ---
    pub mqtt_host: Option<String>,
    /// Defaults to 1883, or 8883 when any TLS file is configured
    pub mqtt_port: Option<u16>,
    /// Protocol level: 4 (MQTT 3.1.1) or 5 (MQTT 5)
    pub mqtt_protocol: u8,
    pub mqtt_client_id: Option<String>,
    pub mqtt_keepalive: u64,
    pub mqtt_quality: u8,
    pub mqtt_retain: bool,
    pub mqtt_ssl_ca_certs: Option<PathBuf>,
    pub mqtt_ssl_certfile: Option<PathBuf>,
    pub mqtt_ssl_keyfile: Option<PathBuf>,
    /// Accept a broker certificate issued for another host name
    pub mqtt_ssl_insecure: bool,
    pub mqtt_user_name: Option<String>,
    pub mqtt_user_pwd: Option<String>,
    /// Consecutive connection errors before the link is declared dead
    pub mqtt_max_disconnects: u32,

    // --- Logging ---
    pub log_level: Option<String>,
    /// Rotating log file; without it logs go to stderr
    pub log_file: Option<PathBuf>,
    /// Size at which the log file rotates (0 disables rotation)
    pub log_max_bytes: u64,
    /// Rotated files kept next to the log file (0 disables rotation)
    pub log_max_count: u32,
    /// Also log to the console when logging to a file
    pub log_print: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            serial_port: None,
            mock_sensor: false,
            abort_after_n_errors: 3,

            time_warm_up: 30.0,
            time_cool_down: 2.0,
            time_wait_for_actor: 7.0,
            time_interval_min: 15.0,
            time_interval_max: 180.0,
            time_step: 0.05,
            sensor_sleep_margin: 15.0,
            reading_staleness: 300.0,
            mqtt_connect_wait: 15.0,
            mqtt_retained_wait: 1.0,

            adaptive_dust_lower: 10.0,
            adaptive_dust_upper: 80.0,

            temperature_range: (-20.0, 60.0),
            humidity_range: (0.0, 70.0),
            deactivation_time_ranges: None,

            mqtt_channel_out_state: None,
            mqtt_channel_out_actor: None,
            mqtt_channel_in_temp: None,
            mqtt_channel_in_humi: None,
            mqtt_channel_in_hold: None,
            mqtt_last_will: None,

            mqtt_host: None,
            mqtt_port: None,
            mqtt_protocol: MQTT_V311,
            mqtt_client_id: None,
            mqtt_keepalive: 60,
            mqtt_quality: 1,
            mqtt_retain: false,
            mqtt_ssl_ca_certs: None,
            mqtt_ssl_certfile: None,
            mqtt_ssl_keyfile: None,
            mqtt_ssl_insecure: false,
            mqtt_user_name: None,
            mqtt_user_pwd: None,
            mqtt_max_disconnects: 10,

            log_level: None,
            log_file: None,
            log_max_bytes: LOG_MAX_BYTES,
            log_max_count: LOG_MAX_COUNT,
            log_print: false,
        }
    }
}

impl SystemConfig {
    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Any of CA, client certificate or key switches the broker link to TLS.
    pub fn uses_tls(&self) -> bool {
        self.mqtt_ssl_ca_certs.is_some()
            || self.mqtt_ssl_certfile.is_some()
            || self.mqtt_ssl_keyfile.is_some()
    }

    /// Effective broker port.
    pub fn broker_port(&self) -> u16 {
        self.mqtt_port
            .unwrap_or(if self.uses_tls() { MQTT_PORT_TLS } else { MQTT_PORT })
    }

    /// Empty strings count as "not configured".
    pub fn actor_channel(&self) -> Option<&str> {
        self.mqtt_channel_out_actor
            .as_deref()
            .filter(|c| !c.is_empty())
    }

    /// Reject combinations the orchestrator cannot run with.
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt_host.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Missing("mqtt_host"));
        }
        if self.mqtt_client_id.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Missing("mqtt_client_id"));
        }
        if self.mqtt_channel_out_state.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Missing("mqtt_channel_out_state"));
        }
        if !self.mock_sensor && self.serial_port.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Missing("serial_port"));
        }
        if !(self.time_step > 0.0) {
            return Err(invalid("time_step", "must be positive"));
        }
        for (key, value) in [
            ("time_warm_up", self.time_warm_up),
            ("time_cool_down", self.time_cool_down),
            ("time_wait_for_actor", self.time_wait_for_actor),
            ("time_interval_min", self.time_interval_min),
            ("sensor_sleep_margin", self.sensor_sleep_margin),
            ("mqtt_connect_wait", self.mqtt_connect_wait),
            ("mqtt_retained_wait", self.mqtt_retained_wait),
        ] {
            if !(value >= 0.0) {
                return Err(invalid(key, "must not be negative"));
            }
        }
        if self.time_interval_min > self.time_interval_max {
            return Err(invalid(
                "time_interval_min",
                "must not exceed time_interval_max",
            ));
        }
        if self.adaptive_dust_lower >= self.adaptive_dust_upper {
            return Err(invalid(
                "adaptive_dust_lower",
                "must be below adaptive_dust_upper",
            ));
        }
        if self.mqtt_quality > 2 {
            return Err(invalid("mqtt_quality", "must be 0, 1 or 2"));
        }
        if self.mqtt_keepalive < 5 {
            return Err(invalid("mqtt_keepalive", "must be at least 5 seconds"));
        }
        if self.mqtt_ssl_certfile.is_some() != self.mqtt_ssl_keyfile.is_some() {
            return Err(invalid(
                "mqtt_ssl_certfile",
                "client certificate and key must be configured together",
            ));
        }
        if self.mqtt_ssl_insecure && !self.uses_tls() {
            return Err(invalid("mqtt_ssl_insecure", "requires a TLS connection"));
        }
        if !matches!(self.mqtt_protocol, MQTT_V311 | MQTT_V5) {
            return Err(invalid(
                "mqtt_protocol",
                "must be 4 (MQTT 3.1.1) or 5 (MQTT 5)",
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, why: &str) -> ConfigError {
    ConfigError::Invalid(format!("'{key}' {why}"))
}
