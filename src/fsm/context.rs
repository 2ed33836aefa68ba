//! Per-cycle plan threaded through the duty-cycle state machine.
//!
//! `LoopParams` is recomputed at every cycle start by the
//! [`CyclePlanner`](crate::scheduler::CyclePlanner) and may be adjusted
//! once mid-cycle when a measurement fails.  All thresholds are seconds
//! relative to the cycle start.

/// Timing thresholds and flags for one duty cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopParams {
    /// Sampling is suppressed for this cycle.
    pub on_hold: bool,
    /// Sensor power is switched through an external actor channel.
    pub use_switch_actor: bool,
    /// Put the sensor into low-power sleep at the end of the cycle.
    pub sensor_sleep: bool,

    // -- Thresholds: t_switching_on <= t_warming_up <= t_cool_down <= t_interval --
    pub t_switching_on: f64,
    pub t_warming_up: f64,
    pub t_cool_down: f64,
    /// Shortest interval in which a full cycle physically completes.
    pub t_interval_min: f64,
    pub t_interval: f64,
}

impl Default for LoopParams {
    fn default() -> Self {
        Self {
            on_hold: false,
            use_switch_actor: false,
            sensor_sleep: true,
            t_switching_on: 0.0,
            t_warming_up: 0.0,
            t_cool_down: 0.0,
            t_interval_min: 0.0,
            t_interval: 0.0,
        }
    }
}

impl LoopParams {
    /// Start the next cycle as soon as possible, without sleeping the sensor.
    pub fn quick_retry(&mut self) {
        self.sensor_sleep = false;
        self.t_interval = self.t_interval_min;
    }

    /// Whether the thresholds are ordered and the interval is not shorter
    /// than the physical minimum.
    pub fn is_consistent(&self) -> bool {
        self.t_switching_on <= self.t_warming_up
            && self.t_warming_up <= self.t_cool_down
            && self.t_cool_down <= self.t_interval_min
            && self.t_interval_min <= self.t_interval
    }
}
