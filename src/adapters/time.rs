//! System clock adapter.
//!
//! Local wall-clock time for timestamps and deactivation windows, and a
//! plain thread sleep for the tick pacing.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local};

use crate::app::ports::ClockPort;

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl ClockPort for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }

    fn sleep(&mut self, secs: f64) {
        if secs > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(secs));
        }
    }
}
