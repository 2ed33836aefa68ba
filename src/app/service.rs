//! Orchestrator: the hexagonal core.
//!
//! [`Orchestrator`] owns the duty-cycle state machine, the cycle planner,
//! the remote-condition subscriptions and the last accepted reading.  All
//! I/O flows through port traits, making the whole run loop testable with
//! mock adapters and a virtual clock.
//!
//! ```text
//!  SensorPort ◀──  ┌──────────────────────────────┐ ──▶ EventSink
//!                  │         Orchestrator          │
//!     BusPort ◀──▶ │  DutyCycle · Planner · Subs   │
//!                  └──────────────────────────────┘
//!                                 ▲
//!                             ClockPort
//! ```
//!
//! One tick: check connectivity, plan a new cycle when at `START`
//! (drain inbound messages first), evaluate the state machine, then sleep
//! one time step.  [`Orchestrator::run`] always ends in
//! [`Orchestrator::close`], which runs its cleanup exactly once.

use anyhow::Context as _;
use log::{debug, info, warn};

use crate::config::SystemConfig;
use crate::error::{BusError, ConfigError};
use crate::fsm::context::LoopParams;
use crate::fsm::{CycleActions, DutyCycle, Phase, SwitchCommand};
use crate::reading::{Reading, ReadingState};
use crate::scheduler::CyclePlanner;
use crate::shutdown::ShutdownToken;
use crate::subscription::Subscription;

use super::events::AppEvent;
use super::ports::{BusPort, ClockPort, EventSink, SensorPort};

// ───────────────────────────────────────────────────────────────
// Orchestrator
// ───────────────────────────────────────────────────────────────

pub struct Orchestrator<S, B, C> {
    sensor: S,
    bus: B,
    clock: C,
    shutdown: ShutdownToken,

    planner: CyclePlanner,
    /// Hold flag, humidity and temperature, in this order.
    subscriptions: [Subscription; 3],
    actor_channel: Option<String>,

    time_step: f64,
    connect_wait: f64,
    retained_wait: f64,

    cycle: DutyCycle,
    plan: LoopParams,
    /// Seconds since the current cycle (or wait phase) started.
    elapsed: f64,
    last_ok: Option<Reading>,
    last_hold: Option<bool>,
    closed: bool,
}

impl<S: SensorPort, B: BusPort, C: ClockPort> Orchestrator<S, B, C> {
    /// Wire the orchestrator from configuration.
    ///
    /// Fails if a subscription is misconfigured; does not touch the ports.
    pub fn new(
        config: &SystemConfig,
        sensor: S,
        bus: B,
        clock: C,
        shutdown: ShutdownToken,
    ) -> Result<Self, ConfigError> {
        let mut hold = Subscription::on_hold("mqtt_channel_in_hold");
        hold.config(config.mqtt_channel_in_hold.as_ref())?;

        let mut humi = Subscription::range("mqtt_channel_in_humi");
        humi.config(config.mqtt_channel_in_humi.as_ref())?;
        humi.set_range(config.humidity_range)?;

        let mut temp = Subscription::range("mqtt_channel_in_temp");
        temp.config(config.mqtt_channel_in_temp.as_ref())?;
        temp.set_range(config.temperature_range)?;

        Ok(Self {
            sensor,
            bus,
            clock,
            shutdown,
            planner: CyclePlanner::from_config(config),
            subscriptions: [hold, humi, temp],
            actor_channel: config.actor_channel().map(str::to_owned),
            time_step: config.time_step,
            connect_wait: config.mqtt_connect_wait,
            retained_wait: config.mqtt_retained_wait,
            cycle: DutyCycle::new(),
            plan: LoopParams::default(),
            elapsed: 0.0,
            last_ok: None,
            last_hold: None,
            closed: false,
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Connect, run duty cycles until shutdown is requested or a fatal
    /// error occurs, then clean up.
    pub fn run(&mut self, sink: &mut impl EventSink) -> anyhow::Result<()> {
        let outcome = self.run_cycles(sink);
        let cleanup = self.close();
        sink.emit(&AppEvent::Stopped);

        match (outcome, cleanup) {
            (Err(e), Err(cleanup_err)) => {
                warn!("cleanup after failure also failed: {cleanup_err:#}");
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    /// Release sensor and bus.  Idempotent: only the first call acts.
    ///
    /// The sensor is sent to sleep, the switch actor (if any) is turned
    /// off on a best-effort basis, then the bus is closed.
    pub fn close(&mut self) -> anyhow::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let sensor = self.sensor.close(true).context("closing sensor");

        if let Some(actor) = self.actor_channel.as_deref() {
            match self.bus.is_open() {
                Ok(true) => {
                    if let Err(e) =
                        self.bus
                            .publish(SwitchCommand::Off.payload(), Some(actor), Some(true))
                    {
                        warn!("cannot switch sensor off: {e}");
                    }
                }
                Ok(false) => warn!("cannot switch sensor off: {}", BusError::NotConnected),
                Err(e) => warn!("cannot switch sensor off: {e}"),
            }
        }

        self.bus.close();
        info!("closed");
        sensor
    }

    // ── Queries ───────────────────────────────────────────────

    /// Plan of the current (or last) cycle.
    pub fn plan(&self) -> &LoopParams {
        &self.plan
    }

    pub fn last_ok(&self) -> Option<&Reading> {
        self.last_ok.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    // ── Run loop ──────────────────────────────────────────────

    fn run_cycles(&mut self, sink: &mut impl EventSink) -> anyhow::Result<()> {
        self.bus.open().context("opening MQTT connection")?;
        let Some(subscribed) = self.wait_for_connection()? else {
            debug!("shutdown requested while connecting");
            return Ok(());
        };
        sink.emit(&AppEvent::Started { subscribed });

        self.reset_timer();
        while !self.shutdown.is_requested() {
            self.bus.is_open().context("MQTT connection failed")?;

            if self.cycle.phase() == Phase::Start {
                self.begin_cycle(sink);
            }

            let before = self.cycle.phase();
            let mut driver = CycleDriver {
                sensor: &mut self.sensor,
                bus: &mut self.bus,
                clock: &self.clock,
                sink: &mut *sink,
                actor_channel: self.actor_channel.as_deref(),
                last_ok: &mut self.last_ok,
            };
            let restart = self.cycle.step(self.elapsed, &mut self.plan, &mut driver)?;
            let after = self.cycle.phase();
            if before != after {
                sink.emit(&AppEvent::PhaseChanged {
                    from: before,
                    to: after,
                });
            }
            if restart {
                self.reset_timer();
            }

            self.wait(self.time_step);
        }
        Ok(())
    }

    /// Wait for the broker to confirm the connection, subscribe, then give
    /// retained messages a moment to arrive.  Returns the number of
    /// subscribed topics, or `None` if shutdown came first.
    fn wait_for_connection(&mut self) -> anyhow::Result<Option<usize>> {
        let topics: Vec<String> = self
            .subscriptions
            .iter()
            .filter_map(|s| s.topic().map(str::to_owned))
            .collect();

        self.reset_timer();
        let mut last_error = None;
        loop {
            if self.shutdown.is_requested() {
                return Ok(None);
            }
            if self.elapsed > self.connect_wait {
                let timeout = BusError::ConnectTimeout {
                    waited_secs: self.connect_wait as u32,
                };
                return Err(match last_error {
                    Some(cause) => anyhow::Error::new(cause).context(timeout),
                    None => timeout.into(),
                });
            }

            self.wait(self.time_step);
            match self.bus.is_open() {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    debug!("still connecting: {e}");
                    last_error = Some(e);
                }
            }
        }

        if !topics.is_empty() {
            self.bus
                .subscribe(&topics)
                .context("subscribing condition topics")?;
            info!("subscribed: {}", topics.join(", "));
        }

        self.reset_timer();
        while !self.shutdown.is_requested() {
            self.wait(self.time_step);
            if self.elapsed > self.retained_wait {
                break;
            }
        }
        Ok(Some(topics.len()))
    }

    fn begin_cycle(&mut self, sink: &mut impl EventSink) {
        self.process_messages();

        let now = self.clock.now();
        self.plan = self.planner.plan(
            now,
            &self.subscriptions,
            self.actor_channel.is_some(),
            self.last_ok.as_ref(),
        );
        debug!("cycle plan: {:?}", self.plan);

        if self.last_hold != Some(self.plan.on_hold) {
            self.last_hold = Some(self.plan.on_hold);
            info!(
                "sensor {}",
                if self.plan.on_hold { "on hold" } else { "active" }
            );
            sink.emit(&AppEvent::HoldChanged(self.plan.on_hold));
        }
    }

    /// Route drained bus messages into the matching subscriptions.
    fn process_messages(&mut self) {
        for message in self.bus.get_messages() {
            debug!("incoming message {}: {}", message.topic, message.payload);
            for subscription in &mut self.subscriptions {
                if subscription.matches_topic(&message.topic) {
                    subscription.extract(&message.payload);
                }
            }
        }
    }

    fn wait(&mut self, secs: f64) {
        self.clock.sleep(secs);
        self.elapsed += secs;
    }

    fn reset_timer(&mut self) {
        self.elapsed = 0.0;
    }
}

// ───────────────────────────────────────────────────────────────
// Cycle side effects
// ───────────────────────────────────────────────────────────────

/// Borrowed view of the orchestrator's ports for one state-machine step.
struct CycleDriver<'a, S, B, C, E> {
    sensor: &'a mut S,
    bus: &'a mut B,
    clock: &'a C,
    sink: &'a mut E,
    actor_channel: Option<&'a str>,
    last_ok: &'a mut Option<Reading>,
}

impl<S: SensorPort, B: BusPort, C: ClockPort, E: EventSink> CycleDriver<'_, S, B, C, E> {
    /// Stamp, remember and publish a reading.  A failed measurement turns
    /// the current plan into a quick retry.
    fn handle_reading(&mut self, reading: Reading, plan: &mut LoopParams) -> anyhow::Result<()> {
        let reading = reading.stamped(self.clock.now());
        let state = reading.state();

        if state == ReadingState::Error {
            plan.quick_retry();
        }

        let message = reading.to_message();
        *self.last_ok = (state == ReadingState::Ok).then_some(reading);

        info!("measurement: {message}");
        self.bus
            .publish(&message, None, None)
            .context("publishing reading")?;
        self.sink.emit(&AppEvent::Published(state));
        Ok(())
    }
}

impl<S: SensorPort, B: BusPort, C: ClockPort, E: EventSink> CycleActions
    for CycleDriver<'_, S, B, C, E>
{
    fn switch(&mut self, command: SwitchCommand) -> anyhow::Result<()> {
        if let Some(actor) = self.actor_channel {
            self.bus
                .publish(command.payload(), Some(actor), Some(true))
                .with_context(|| format!("switching sensor {}", command.payload()))?;
        }
        Ok(())
    }

    fn open_sensor(&mut self, warm_up: bool) -> anyhow::Result<()> {
        self.sensor.open(warm_up).context("opening sensor")?;
        Ok(())
    }

    fn close_sensor(&mut self, sleep: bool) -> anyhow::Result<()> {
        self.sensor.close(sleep).context("closing sensor")?;
        Ok(())
    }

    fn report_hold(&mut self, plan: &mut LoopParams) -> anyhow::Result<()> {
        let reading = Reading::deactivated(self.clock.now());
        self.handle_reading(reading, plan)
    }

    fn measure_and_report(&mut self, plan: &mut LoopParams) -> anyhow::Result<()> {
        let reading = self.sensor.measure().context("measuring")?;
        self.handle_reading(reading, plan)
    }
}
