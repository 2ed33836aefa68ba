//! Duty-cycle state machine.
//!
//! ```text
//!            ┌──────────── on hold ───────────────┐
//!            │                                     ▼
//!  START ──▶ SWITCHING_ON ──▶ CONNECTING ──▶ WARMING_UP ──▶ COOLING_DOWN ──▶ WAITING_FOR_RESET
//!    ▲         (actor only)                   (measure)          │
//!    │                                                           │
//!    └──────────────── elapsed >= t_interval (any phase) ◀───────┘
//!
//!  START ──(on hold, actor)──▶ SWITCHED_OFF
//! ```
//!
//! Unlike a one-transition-per-tick table, every rule is re-evaluated in a
//! fixed order within one [`DutyCycle::step`], so several transitions may
//! fire in the same tick (e.g. `CONNECTING` opens the sensor and enters
//! `WARMING_UP` right after `START`).  Side effects go through
//! [`CycleActions`]; the machine itself owns nothing but the phase.

pub mod context;

use core::fmt;

use context::LoopParams;
use log::debug;

// ---------------------------------------------------------------------------
// Phase identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Start,
    SwitchingOn,
    Connecting,
    WarmingUp,
    CoolingDown,
    WaitingForReset,
    SwitchedOff,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::SwitchingOn => "SWITCHING_ON",
            Self::Connecting => "CONNECTING",
            Self::WarmingUp => "WARMING_UP",
            Self::CoolingDown => "COOLING_DOWN",
            Self::WaitingForReset => "WAITING_FOR_RESET",
            Self::SwitchedOff => "SWITCHED_OFF",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Power command sent to the external switch actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchCommand {
    On,
    Off,
}

impl SwitchCommand {
    pub fn payload(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }
}

// ---------------------------------------------------------------------------
// Side effects
// ---------------------------------------------------------------------------

/// Everything the state machine can ask of the outside world.
///
/// `plan` is handed to the reporting actions because a failed measurement
/// rewrites the current cycle's plan before the next rule is evaluated.
pub trait CycleActions {
    fn switch(&mut self, command: SwitchCommand) -> anyhow::Result<()>;

    fn open_sensor(&mut self, warm_up: bool) -> anyhow::Result<()>;

    fn close_sensor(&mut self, sleep: bool) -> anyhow::Result<()>;

    /// Publish a `DEACTIVATED` reading for a cycle on hold.
    fn report_hold(&mut self, plan: &mut LoopParams) -> anyhow::Result<()>;

    /// Take a measurement and publish its reading.
    fn measure_and_report(&mut self, plan: &mut LoopParams) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct DutyCycle {
    phase: Phase,
}

impl Default for DutyCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl DutyCycle {
    pub fn new() -> Self {
        Self {
            phase: Phase::Start,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Evaluate all transition rules once.
    ///
    /// `elapsed` is the time since the cycle started.  Returns `true` when
    /// the interval is over: the machine is back at `START` and the caller
    /// must reset its cycle timer.
    pub fn step(
        &mut self,
        elapsed: f64,
        plan: &mut LoopParams,
        io: &mut impl CycleActions,
    ) -> anyhow::Result<bool> {
        if plan.on_hold {
            if self.phase == Phase::Start {
                if plan.use_switch_actor {
                    io.switch(SwitchCommand::Off)?;
                    self.enter(Phase::SwitchedOff);
                } else {
                    // Open without warm-up only to be able to send it to sleep.
                    io.open_sensor(false)?;
                    self.enter(Phase::CoolingDown);
                }
                io.report_hold(plan)?;
            }
        } else {
            if self.phase == Phase::Start {
                if plan.use_switch_actor {
                    io.switch(SwitchCommand::On)?;
                    self.enter(Phase::SwitchingOn);
                } else {
                    self.enter(Phase::Connecting);
                }
            }

            if self.phase == Phase::SwitchingOn && elapsed >= plan.t_switching_on {
                self.enter(Phase::Connecting);
            }

            if self.phase == Phase::Connecting {
                io.open_sensor(true)?;
                self.enter(Phase::WarmingUp);
            }

            if self.phase == Phase::WarmingUp && elapsed >= plan.t_warming_up {
                io.measure_and_report(plan)?;
                self.enter(Phase::CoolingDown);
            }
        }

        if self.phase == Phase::CoolingDown && (elapsed >= plan.t_cool_down || plan.on_hold) {
            io.close_sensor(plan.sensor_sleep)?;
            self.enter(Phase::WaitingForReset);
        }

        if elapsed >= plan.t_interval {
            self.enter(Phase::Start);
            return Ok(true);
        }
        Ok(false)
    }

    fn enter(&mut self, next: Phase) {
        if next != self.phase {
            debug!("phase {} -> {}", self.phase, next);
            self.phase = next;
        }
    }
}
