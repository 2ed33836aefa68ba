//! Port traits: the hexagonal boundary between the orchestrator and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Orchestrator (domain)
//! ```
//!
//! The serial sensor, the MQTT client, the wall clock and the event log
//! implement these traits.  The [`Orchestrator`](super::service::Orchestrator)
//! consumes them via generics, so the duty-cycle logic never touches a
//! serial port or socket directly and runs unchanged against test doubles.

use chrono::{DateTime, FixedOffset};

use crate::error::{BusError, SensorError};
use crate::reading::Reading;

// ───────────────────────────────────────────────────────────────
// Sensor port
// ───────────────────────────────────────────────────────────────

/// The particulate sensor.
///
/// Transient faults are absorbed by the adapter and come back as `ERROR`
/// readings from [`measure`](SensorPort::measure); an `Err` always means
/// the run must stop.
pub trait SensorPort {
    /// Power the sensor; with `warm_up` also start the fan and laser.
    /// Re-opening after [`close`](SensorPort::close) is allowed.
    fn open(&mut self, warm_up: bool) -> Result<(), SensorError>;

    /// Query one measurement.  Must only be called after a warm-up.
    /// The timestamp of the returned reading is provisional.
    fn measure(&mut self) -> Result<Reading, SensorError>;

    /// End the measuring phase.  With `sleep` the sensor is sent to
    /// low-power mode and released, even if an earlier `close(false)`
    /// left it running.  Safe to call when already closed.
    fn close(&mut self, sleep: bool) -> Result<(), SensorError>;
}

// ───────────────────────────────────────────────────────────────
// Bus port
// ───────────────────────────────────────────────────────────────

/// One inbound message, as drained from the bus queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// The message bus.  Network I/O runs on the adapter's own thread(s).
pub trait BusPort {
    /// Begin connecting; does not block until connected.
    fn open(&mut self) -> Result<(), BusError>;

    /// Current connectivity.  Surfaces a stored fatal error as `Err`.
    fn is_open(&mut self) -> Result<bool, BusError>;

    /// Register interest in `topics`.  Called once after the first
    /// confirmed connection.
    fn subscribe(&mut self, topics: &[String]) -> Result<(), BusError>;

    /// All messages received since the last call; never blocks.
    fn get_messages(&mut self) -> Vec<BusMessage>;

    /// Fire-and-forget publish.  `channel = None` targets the configured
    /// state channel, `retain = None` the configured retain flag.
    fn publish(
        &mut self,
        payload: &str,
        channel: Option<&str>,
        retain: Option<bool>,
    ) -> Result<(), BusError>;

    /// Publish the last will (if configured and connected), then
    /// disconnect and wait for the network thread to finish.
    fn close(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Wall clock and sleeping, replaceable by a virtual clock in tests.
pub trait ClockPort {
    /// Local wall-clock time.
    fn now(&self) -> DateTime<FixedOffset>;

    /// Block the orchestrator thread for `secs` seconds.
    fn sleep(&mut self, secs: f64);
}

// ───────────────────────────────────────────────────────────────
// Event sink port
// ───────────────────────────────────────────────────────────────

/// The orchestrator emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}
