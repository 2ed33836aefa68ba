//! Mock adapters for integration tests.
//!
//! Record every port call so tests can assert on the full call history
//! without a serial device or a broker.  [`VirtualClock`] never sleeps:
//! it advances virtual time and requests shutdown once a configured
//! amount of time has passed.

use std::collections::VecDeque;

use chrono::{DateTime, FixedOffset, TimeZone};

use sds011_mqtt::app::events::AppEvent;
use sds011_mqtt::app::ports::{BusMessage, BusPort, ClockPort, EventSink, SensorPort};
use sds011_mqtt::config::SystemConfig;
use sds011_mqtt::error::{BusError, SensorError};
use sds011_mqtt::reading::Reading;
use sds011_mqtt::shutdown::ShutdownToken;

pub const DUMMY_PM10: f32 = 2.5;
pub const DUMMY_PM25: f32 = 1.5;

pub const STEP: f64 = 40.0;
pub const INTERVAL_MAX: f64 = 4.0 * STEP;
pub const WARM_UP: f64 = 2.0 * STEP;

/// 2020-01-01T02:02:03Z
pub fn fixed_now() -> DateTime<FixedOffset> {
    FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(2020, 1, 1, 2, 2, 3)
        .unwrap()
}

/// Mocked sensor, no conditions, cycles of four 40 s ticks.
pub fn loop_config() -> SystemConfig {
    SystemConfig {
        mock_sensor: true,
        mqtt_host: Some("localhost".into()),
        mqtt_client_id: Some("test".into()),
        mqtt_channel_out_state: Some("dust/state".into()),
        time_step: STEP,
        time_interval_max: INTERVAL_MAX,
        time_warm_up: WARM_UP,
        time_cool_down: 0.0,
        ..SystemConfig::default()
    }
}

/// Virtual time after which `loop_count` cycles have run.
pub fn stop_after(loop_count: u32) -> f64 {
    f64::from(loop_count) * INTERVAL_MAX + STEP
}

// ── Sensor ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SensorCall {
    Open { warm_up: bool },
    Measure,
    Close { sleep: bool },
}

/// Returns queued measurement outcomes first, then the dummy reading.
#[derive(Default)]
pub struct MockSensor {
    pub calls: Vec<SensorCall>,
    pub outcomes: VecDeque<Result<Reading, SensorError>>,
}

#[allow(dead_code)]
impl MockSensor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcomes(outcomes: Vec<Result<Reading, SensorError>>) -> Self {
        Self {
            calls: Vec::new(),
            outcomes: outcomes.into(),
        }
    }

    pub fn dummy_reading() -> Reading {
        Reading::ok(DUMMY_PM10, DUMMY_PM25, fixed_now())
    }

    pub fn opens(&self) -> Vec<bool> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                SensorCall::Open { warm_up } => Some(*warm_up),
                _ => None,
            })
            .collect()
    }

    pub fn closes(&self) -> Vec<bool> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                SensorCall::Close { sleep } => Some(*sleep),
                _ => None,
            })
            .collect()
    }

    pub fn measures(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| **c == SensorCall::Measure)
            .count()
    }
}

impl SensorPort for MockSensor {
    fn open(&mut self, warm_up: bool) -> Result<(), SensorError> {
        self.calls.push(SensorCall::Open { warm_up });
        Ok(())
    }

    fn measure(&mut self) -> Result<Reading, SensorError> {
        self.calls.push(SensorCall::Measure);
        self.outcomes
            .pop_front()
            .unwrap_or_else(|| Ok(Self::dummy_reading()))
    }

    fn close(&mut self, sleep: bool) -> Result<(), SensorError> {
        self.calls.push(SensorCall::Close { sleep });
        Ok(())
    }
}

// ── Bus ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub payload: String,
    pub channel: Option<String>,
    pub retain: Option<bool>,
}

pub struct MockBus {
    pub connected: bool,
    /// `is_open` fails with a fatal error once it was called this often.
    pub fatal_after: Option<usize>,
    pub is_open_calls: usize,
    pub opened: usize,
    pub closed: usize,
    pub subscribed: Vec<String>,
    pub inbox: Vec<BusMessage>,
    pub published: Vec<Published>,
}

impl Default for MockBus {
    fn default() -> Self {
        Self {
            connected: true,
            fatal_after: None,
            is_open_calls: 0,
            opened: 0,
            closed: 0,
            subscribed: Vec::new(),
            inbox: Vec::new(),
            published: Vec::new(),
        }
    }
}

#[allow(dead_code)]
impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inbox(messages: Vec<BusMessage>) -> Self {
        Self {
            inbox: messages,
            ..Self::default()
        }
    }

    pub fn payloads(&self) -> Vec<&str> {
        self.published.iter().map(|p| p.payload.as_str()).collect()
    }
}

impl BusPort for MockBus {
    fn open(&mut self) -> Result<(), BusError> {
        self.opened += 1;
        Ok(())
    }

    fn is_open(&mut self) -> Result<bool, BusError> {
        self.is_open_calls += 1;
        if self.fatal_after.is_some_and(|n| self.is_open_calls > n) {
            return Err(BusError::Fatal("broker gone".into()));
        }
        Ok(self.connected)
    }

    fn subscribe(&mut self, topics: &[String]) -> Result<(), BusError> {
        self.subscribed.extend_from_slice(topics);
        Ok(())
    }

    fn get_messages(&mut self) -> Vec<BusMessage> {
        std::mem::take(&mut self.inbox)
    }

    fn publish(
        &mut self,
        payload: &str,
        channel: Option<&str>,
        retain: Option<bool>,
    ) -> Result<(), BusError> {
        if !self.connected {
            return Err(BusError::NotConnected);
        }
        self.published.push(Published {
            payload: payload.to_owned(),
            channel: channel.map(str::to_owned),
            retain,
        });
        Ok(())
    }

    fn close(&mut self) {
        self.closed += 1;
    }
}

// ── Clock ─────────────────────────────────────────────────────

/// Fixed wall clock; `sleep` only advances a virtual counter.
pub struct VirtualClock {
    pub now: DateTime<FixedOffset>,
    pub total: f64,
    stop_at: Option<f64>,
    shutdown: ShutdownToken,
}

#[allow(dead_code)]
impl VirtualClock {
    /// Requests shutdown once `stop_at` seconds of virtual time passed.
    pub fn stopping_at(stop_at: f64, shutdown: &ShutdownToken) -> Self {
        Self {
            now: fixed_now(),
            total: 0.0,
            stop_at: Some(stop_at),
            shutdown: shutdown.clone(),
        }
    }

    /// Never requests shutdown by itself.
    pub fn unbounded(shutdown: &ShutdownToken) -> Self {
        Self {
            now: fixed_now(),
            total: 0.0,
            stop_at: None,
            shutdown: shutdown.clone(),
        }
    }
}

impl ClockPort for VirtualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.now
    }

    fn sleep(&mut self, secs: f64) {
        self.total += secs;
        if self.stop_at.is_some_and(|stop| self.total >= stop) {
            self.shutdown.request();
        }
    }
}

// ── Event sink ────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}
