//! Cycle planning: hold aggregation, deactivation windows and the
//! adaptive sampling interval.
//!
//! The [`CyclePlanner`] is consulted once at every cycle start and turns
//! the current inputs into a [`LoopParams`] plan:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Hold sources                           │
//! │                                                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐        │
//! │  │ Deactivation │  │ Temp / Humi  │  │  Hold flag   │        │
//! │  │   windows    │  │   ranges     │  │ subscription │        │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘        │
//! │         └─────────────────┼─────────────────┘                │
//! │                           ▼ any                              │
//! │                        on_hold ──▶ interval = max            │
//! │                           │ none                             │
//! │                           ▼                                  │
//! │         last OK reading ──▶ AdaptiveInterval ──▶ clamp(floor)│
//! └──────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, FixedOffset, Timelike};
use log::{debug, error};
use serde_json::Value;

use crate::config::SystemConfig;
use crate::fsm::context::LoopParams;
use crate::reading::{Reading, ReadingState};
use crate::subscription::Subscription;

// ═══════════════════════════════════════════════════════════════
//  Deactivation windows
// ═══════════════════════════════════════════════════════════════

/// Time-of-day windows (minute of day, `0..=1439`) during which sampling
/// is suppressed.
///
/// The raw configuration is interpreted on every evaluation so a malformed
/// entry only disables window checking (fail open); it never aborts.
#[derive(Debug, Clone, Default)]
pub struct DeactivationWindows {
    raw: Option<Value>,
}

impl DeactivationWindows {
    pub fn new(raw: Option<Value>) -> Self {
        Self { raw }
    }

    /// Whether any window contains the wall-clock minute of `now`.
    pub fn is_active(&self, now: DateTime<FixedOffset>) -> bool {
        self.is_active_at(now.hour() * 60 + now.minute())
    }

    pub fn is_active_at(&self, minute_of_day: u32) -> bool {
        let Some(raw) = self.raw.as_ref().filter(|v| !is_empty(v)) else {
            return false;
        };
        let Some(windows) = raw.as_array() else {
            log_malformed(raw);
            return false;
        };

        let minute = f64::from(minute_of_day);
        for window in windows {
            let Some((lower, upper)) = bounds(window) else {
                log_malformed(window);
                return false;
            };
            if lower <= minute && minute <= upper {
                debug!("deactivation range active [{lower} <= {minute_of_day} <= {upper}]");
                return true;
            }
        }
        false
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Lower and upper bound of one window, regardless of element order.
fn bounds(window: &Value) -> Option<(f64, f64)> {
    let values = window
        .as_array()?
        .iter()
        .map(Value::as_f64)
        .collect::<Option<Vec<f64>>>()?;
    let lower = values.iter().copied().reduce(f64::min)?;
    let upper = values.iter().copied().reduce(f64::max)?;
    Some((lower, upper))
}

fn log_malformed(value: &Value) {
    error!(
        "list of [lower, upper] minute pairs expected for 'deactivation_time_ranges', \
         e.g. [[60, 300], [660, 900]] (got {value})"
    );
}

// ═══════════════════════════════════════════════════════════════
//  Adaptive interval
// ═══════════════════════════════════════════════════════════════

/// Linear mapping from particulate load to sampling interval: clean air
/// is sampled rarely, dirty air often.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveInterval {
    pub interval_min: f64,
    pub interval_max: f64,
    /// At or below this load (µg/m³) the maximum interval applies.
    pub dust_lower: f64,
    /// At or above this load (µg/m³) the minimum interval applies.
    pub dust_upper: f64,
    /// Readings older than this (seconds) are ignored.
    pub staleness: f64,
}

impl AdaptiveInterval {
    pub fn from_config(config: &SystemConfig) -> Self {
        Self {
            interval_min: config.time_interval_min,
            interval_max: config.time_interval_max,
            dust_lower: config.adaptive_dust_lower,
            dust_upper: config.adaptive_dust_upper,
            staleness: config.reading_staleness,
        }
    }

    /// Interval following `last`, evaluated at `now`.
    pub fn interval(&self, last: Option<&Reading>, now: DateTime<FixedOffset>) -> f64 {
        let Some(last) = last.filter(|r| r.state() == ReadingState::Ok) else {
            return self.interval_max;
        };
        let age = (now - last.timestamp()).num_milliseconds() as f64 / 1000.0;
        if age > self.staleness {
            return self.interval_max;
        }
        match last.peak() {
            Some(pm) => self.for_load(f64::from(pm)),
            None => self.interval_max,
        }
    }

    /// Interval for a particulate load of `pm` µg/m³.
    pub fn for_load(&self, pm: f64) -> f64 {
        if pm <= self.dust_lower {
            self.interval_max
        } else if pm >= self.dust_upper {
            self.interval_min
        } else {
            let m = (self.interval_max - self.interval_min) / (self.dust_lower - self.dust_upper);
            let n = self.interval_max - m * self.dust_lower;
            m * pm + n
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Cycle planner
// ═══════════════════════════════════════════════════════════════

/// Builds the [`LoopParams`] for each duty cycle.
#[derive(Debug, Clone)]
pub struct CyclePlanner {
    warm_up: f64,
    cool_down: f64,
    switching_on: f64,
    /// Keep the sensor powered when the planned interval exceeds the
    /// physical minimum by no more than this.
    sleep_margin: f64,
    adaptive: AdaptiveInterval,
    windows: DeactivationWindows,
}

impl CyclePlanner {
    pub fn from_config(config: &SystemConfig) -> Self {
        Self {
            warm_up: config.time_warm_up,
            cool_down: config.time_cool_down,
            switching_on: config.time_wait_for_actor,
            sleep_margin: config.sensor_sleep_margin,
            adaptive: AdaptiveInterval::from_config(config),
            windows: DeactivationWindows::new(config.deactivation_time_ranges.clone()),
        }
    }

    /// Hold decision: an active window, or any subscription that does not
    /// verify.  Subscriptions are not consulted while a window is active.
    pub fn is_on_hold(&self, now: DateTime<FixedOffset>, subscriptions: &[Subscription]) -> bool {
        self.windows.is_active(now) || subscriptions.iter().any(|s| !s.verify())
    }

    pub fn plan(
        &self,
        now: DateTime<FixedOffset>,
        subscriptions: &[Subscription],
        use_switch_actor: bool,
        last_ok: Option<&Reading>,
    ) -> LoopParams {
        let on_hold = self.is_on_hold(now, subscriptions);

        let t_switching_on = if use_switch_actor { self.switching_on } else { 0.0 };
        let t_warming_up = self.warm_up + t_switching_on;
        let t_cool_down = t_warming_up + self.cool_down;
        let t_interval_min = t_cool_down;

        let planned = if on_hold {
            self.adaptive.interval_max
        } else {
            self.adaptive.interval(last_ok, now)
        };
        // Also covers a configured maximum shorter than a full cycle.
        let t_interval = if planned < t_interval_min {
            debug!("time interval is corrected to {t_interval_min} ({planned})");
            t_interval_min
        } else {
            planned
        };

        let sensor_sleep = on_hold || (t_interval - t_interval_min) > self.sleep_margin;

        let plan = LoopParams {
            on_hold,
            use_switch_actor,
            sensor_sleep,
            t_switching_on,
            t_warming_up,
            t_cool_down,
            t_interval_min,
            t_interval,
        };
        debug_assert!(plan.is_consistent(), "{plan:?}");
        plan
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
