//! Stand-in sensor for running without hardware (`mock_sensor`).
//!
//! Returns a fixed OK reading but enforces the same open/warm-up/measure
//! contract as the serial adapter.

use chrono::Local;
use log::debug;

use crate::app::ports::SensorPort;
use crate::error::SensorError;
use crate::reading::Reading;

pub const DUMMY_PM10: f32 = 2.5;
pub const DUMMY_PM25: f32 = 1.5;

#[derive(Debug, Default)]
pub struct MockSensor {
    warmed_up: bool,
}

impl MockSensor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SensorPort for MockSensor {
    fn open(&mut self, warm_up: bool) -> Result<(), SensorError> {
        debug!("mock sensor open (warm_up={warm_up})");
        self.warmed_up = warm_up;
        Ok(())
    }

    fn measure(&mut self) -> Result<Reading, SensorError> {
        if !self.warmed_up {
            return Err(SensorError::NotWarmedUp);
        }
        Ok(Reading::ok(
            DUMMY_PM10,
            DUMMY_PM25,
            Local::now().fixed_offset(),
        ))
    }

    fn close(&mut self, sleep: bool) -> Result<(), SensorError> {
        debug!("mock sensor close (sleep={sleep})");
        self.warmed_up = false;
        Ok(())
    }
}
