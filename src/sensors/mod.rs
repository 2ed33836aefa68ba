//! Sensor subsystem: the SDS011 driver and the consecutive-fault budget
//! shared by sensor adapters.

pub mod sds011;

use log::warn;

use crate::error::SensorError;

/// Highest value the SDS011 reports for either channel (µg/m³).
pub const PM_MAX: f32 = 1000.0;

/// Counts consecutive transient faults.
///
/// `ceiling` faults in a row are tolerated; the next one is fatal.  Any
/// success resets the count.
#[derive(Debug, Clone)]
pub struct ErrorBudget {
    ceiling: u32,
    consecutive: u32,
}

impl ErrorBudget {
    pub fn new(ceiling: u32) -> Self {
        Self {
            ceiling,
            consecutive: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Count `fault`; `Err` once the ceiling is exceeded.
    pub fn record_fault(&mut self, fault: &SensorError) -> Result<(), SensorError> {
        self.consecutive = self.consecutive.saturating_add(1);
        warn!(
            "sensor fault {}/{}: {fault}",
            self.consecutive, self.ceiling
        );
        if self.consecutive > self.ceiling {
            return Err(SensorError::ErrorCeiling {
                consecutive: self.consecutive,
                ceiling: self.ceiling,
            });
        }
        Ok(())
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// Accept a reading only if it is physically plausible: both channels in
/// `0..=1000` µg/m³ and PM10 (which includes PM2.5) not below PM2.5.
pub fn check_measurement(pm10: f32, pm25: f32) -> Result<(), SensorError> {
    let in_range = |v: f32| (0.0..=PM_MAX).contains(&v);
    if in_range(pm10) && in_range(pm25) && pm10 >= pm25 {
        Ok(())
    } else {
        Err(SensorError::OutOfRange)
    }
}
