//! SDS011 adapter: bridges the serial driver to the [`SensorPort`].
//!
//! Transport and protocol faults are counted in an [`ErrorBudget`] and
//! turned into `ERROR` readings; only exceeding the budget (or measuring
//! without a warm-up) escapes as an `Err`.
//!
//! ```text
//!  open(true) ──▶ connect ─▶ query mode ─▶ wake      awake = true
//!  close(false)   link kept, sensor keeps running
//!  close(true)    link (or a fresh one) ─▶ sleep    awake = false
//! ```
//!
//! The serial link survives `close(false)` so the final `close(true)` can
//! still put the fan and laser to rest.  If the link was lost while the
//! sensor may be running, `close(true)` reconnects for the sleep command.

use std::io::{Read, Write};
use std::time::Duration;

use chrono::Local;
use log::{debug, info, warn};
use serial2::SerialPort;

use crate::app::ports::SensorPort;
use crate::error::SensorError;
use crate::reading::Reading;
use crate::sensors::sds011::{BAUD_RATE, Sds011};
use crate::sensors::{ErrorBudget, check_measurement};

const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens the byte stream for a device path.
type Connector<P> = Box<dyn FnMut(&str) -> std::io::Result<P>>;

fn open_serial(path: &str) -> std::io::Result<SerialPort> {
    let mut port = SerialPort::open(path, BAUD_RATE)?;
    port.set_read_timeout(READ_TIMEOUT)?;
    Ok(port)
}

pub struct SerialSensor<P = SerialPort> {
    path: String,
    connector: Connector<P>,
    device: Option<Sds011<P>>,
    /// Set by `open(warm_up = true)`, cleared by `close`.
    warmed_up: bool,
    /// The sensor may be running: set on connect, cleared by a confirmed sleep.
    awake: bool,
    budget: ErrorBudget,
}

impl SerialSensor {
    pub fn new(path: impl Into<String>, abort_after_n_errors: u32) -> Self {
        Self::with_connector(path, abort_after_n_errors, open_serial)
    }
}

impl<P: Read + Write> SerialSensor<P> {
    /// Sensor on a custom byte stream, e.g. a socket bridge or a test double.
    pub fn with_connector(
        path: impl Into<String>,
        abort_after_n_errors: u32,
        connector: impl FnMut(&str) -> std::io::Result<P> + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            connector: Box::new(connector),
            device: None,
            warmed_up: false,
            awake: false,
            budget: ErrorBudget::new(abort_after_n_errors),
        }
    }

    fn connect(&mut self) -> Result<Sds011<P>, SensorError> {
        let port = (self.connector)(&self.path)?;
        // Sleep state is unknown until a sleep command is acknowledged.
        self.awake = true;
        let mut device = Sds011::new(port);
        device.set_query_mode()?;
        debug!("sensor connected on {}", self.path);
        Ok(device)
    }

    fn try_open(&mut self, warm_up: bool) -> Result<(), SensorError> {
        let device = match self.device.take() {
            Some(device) => device,
            None => self.connect()?,
        };
        let device = self.device.insert(device);
        if warm_up {
            self.awake = true;
            device.set_working(true)?;
            debug!("warm up");
        }
        Ok(())
    }

    fn try_measure(&mut self) -> Result<(f32, f32), SensorError> {
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| SensorError::Transport(format!("{} not open", self.path)))?;
        let (pm25, pm10) = device.query()?;
        check_measurement(pm10, pm25)?;
        Ok((pm10, pm25))
    }

    fn send_to_sleep(&mut self) {
        if self.device.is_none() && self.awake {
            match self.connect() {
                Ok(device) => self.device = Some(device),
                Err(e) => {
                    warn!("cannot reconnect to send sensor to sleep: {e}");
                    return;
                }
            }
        }
        let Some(mut device) = self.device.take() else {
            return;
        };
        match device.set_working(false) {
            Ok(()) => {
                self.awake = false;
                debug!("sleep");
            }
            Err(e) => warn!("cannot send sensor to sleep: {e}"),
        }
    }
}

impl<P: Read + Write> SensorPort for SerialSensor<P> {
    fn open(&mut self, warm_up: bool) -> Result<(), SensorError> {
        self.warmed_up = warm_up;
        if let Err(e) = self.try_open(warm_up) {
            // A half-open port is useless; retry from scratch next time.
            self.device = None;
            self.budget.record_fault(&e)?;
        }
        Ok(())
    }

    fn measure(&mut self) -> Result<Reading, SensorError> {
        if !self.warmed_up {
            return Err(SensorError::NotWarmedUp);
        }
        let now = Local::now().fixed_offset();
        match self.try_measure() {
            Ok((pm10, pm25)) => {
                self.budget.record_success();
                info!("measurement: pm10={pm10} pm25={pm25}");
                Ok(Reading::ok(pm10, pm25, now))
            }
            Err(e) => {
                self.budget.record_fault(&e)?;
                Ok(Reading::error(now))
            }
        }
    }

    fn close(&mut self, sleep: bool) -> Result<(), SensorError> {
        self.warmed_up = false;
        if sleep {
            self.send_to_sleep();
        }
        Ok(())
    }
}
