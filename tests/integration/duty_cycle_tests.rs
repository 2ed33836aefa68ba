//! Full run loop over virtual time: regular measurement cycles, the
//! switch actor and the quick retry after a failed measurement.
//!
//! Timing used throughout: one tick is 40 s, warm-up takes two ticks and
//! a cycle is four ticks long.  Connecting and waiting for retained
//! messages take one tick each before the first cycle starts.

use sds011_mqtt::app::events::AppEvent;
use sds011_mqtt::app::service::Orchestrator;
use sds011_mqtt::config::SystemConfig;
use sds011_mqtt::fsm::Phase;
use sds011_mqtt::reading::{Reading, ReadingState};
use sds011_mqtt::shutdown::ShutdownToken;

use crate::mock_ports::{
    MockBus, MockSensor, Published, RecordingSink, STEP, VirtualClock, fixed_now, loop_config,
    stop_after,
};

type TestOrchestrator = Orchestrator<MockSensor, MockBus, VirtualClock>;

fn make_orchestrator(config: &SystemConfig, sensor: MockSensor, stop_at: f64) -> TestOrchestrator {
    let shutdown = ShutdownToken::new();
    let clock = VirtualClock::stopping_at(stop_at, &shutdown);
    Orchestrator::new(config, sensor, MockBus::new(), clock, shutdown)
        .expect("valid subscriptions")
}

fn run_loops(loop_count: u32) -> (TestOrchestrator, RecordingSink) {
    let mut orchestrator =
        make_orchestrator(&loop_config(), MockSensor::new(), stop_after(loop_count));
    let mut sink = RecordingSink::default();
    orchestrator.run(&mut sink).expect("clean run");
    (orchestrator, sink)
}

fn assert_regular_loops(loop_count: usize) {
    let (orchestrator, _) = run_loops(loop_count as u32);
    let sensor = orchestrator.sensor();
    let bus = orchestrator.bus();

    assert_eq!(sensor.opens(), vec![true; loop_count]);
    assert_eq!(sensor.measures(), loop_count);
    // One close per cycle plus the final cleanup.
    assert_eq!(sensor.closes(), vec![true; loop_count + 1]);

    let expected = MockSensor::dummy_reading().to_message();
    assert_eq!(bus.published.len(), loop_count);
    for message in &bus.published {
        assert_eq!(message.payload, expected);
        assert_eq!(message.channel, None);
        assert_eq!(message.retain, None);
    }

    assert_eq!(bus.opened, 1);
    assert_eq!(bus.closed, 1);
    assert!(orchestrator.is_closed());
}

// ── Regular cycles ───────────────────────────────────────────

#[test]
fn single_cycle_measures_once() {
    assert_regular_loops(1);
}

#[test]
fn three_cycles_measure_three_times() {
    assert_regular_loops(3);
}

#[test]
fn published_reading_carries_clock_timestamp() {
    let (orchestrator, _) = run_loops(1);
    assert_eq!(
        orchestrator.bus().payloads(),
        vec![r#"{"PM10":2.5,"PM25":1.5,"STATE":"OK","TIMESTAMP":"2020-01-01T02:02:03+00:00"}"#]
    );
    assert_eq!(
        orchestrator.last_ok().map(Reading::timestamp),
        Some(fixed_now())
    );
}

#[test]
fn clean_air_plans_maximum_interval_with_sleep() {
    let (orchestrator, _) = run_loops(2);
    let plan = orchestrator.plan();
    assert!(!plan.on_hold);
    assert!(plan.sensor_sleep);
    assert_eq!(plan.t_interval, 4.0 * STEP);
    assert_eq!(plan.t_warming_up, 2.0 * STEP);
}

#[test]
fn events_follow_the_cycle() {
    let (_, sink) = run_loops(1);
    assert_eq!(
        sink.events,
        vec![
            AppEvent::Started { subscribed: 0 },
            AppEvent::HoldChanged(false),
            AppEvent::PhaseChanged {
                from: Phase::Start,
                to: Phase::WarmingUp,
            },
            AppEvent::Published(ReadingState::Ok),
            AppEvent::PhaseChanged {
                from: Phase::WarmingUp,
                to: Phase::WaitingForReset,
            },
            AppEvent::Stopped,
        ]
    );
}

#[test]
fn hold_state_reported_once_while_unchanged() {
    let (_, sink) = run_loops(3);
    let holds = sink
        .events
        .iter()
        .filter(|e| matches!(e, AppEvent::HoldChanged(_)))
        .count();
    assert_eq!(holds, 1);
}

// ── Switch actor ─────────────────────────────────────────────

#[test]
fn actor_switched_on_each_cycle_and_off_on_close() {
    let mut config = loop_config();
    config.mqtt_channel_out_actor = Some("sensor/power".into());
    // Switching on delays the measurement by one tick.
    let mut orchestrator = make_orchestrator(&config, MockSensor::new(), stop_after(1) + STEP);
    orchestrator
        .run(&mut RecordingSink::default())
        .expect("clean run");

    let actor = |payload: &str| Published {
        payload: payload.into(),
        channel: Some("sensor/power".into()),
        retain: Some(true),
    };
    let reading = Published {
        payload: MockSensor::dummy_reading().to_message(),
        channel: None,
        retain: None,
    };
    assert_eq!(
        orchestrator.bus().published,
        vec![actor("ON"), reading, actor("OFF")]
    );
    assert_eq!(orchestrator.sensor().opens(), vec![true]);
    assert_eq!(orchestrator.sensor().closes(), vec![true, true]);
}

#[test]
fn empty_actor_channel_means_no_actor() {
    let mut config = loop_config();
    config.mqtt_channel_out_actor = Some(String::new());
    let mut orchestrator = make_orchestrator(&config, MockSensor::new(), stop_after(1));
    orchestrator
        .run(&mut RecordingSink::default())
        .expect("clean run");

    assert!(orchestrator.bus().published.iter().all(|p| p.channel.is_none()));
    assert!(!orchestrator.plan().use_switch_actor);
}

// ── Failed measurements ──────────────────────────────────────

#[test]
fn error_reading_triggers_quick_retry_without_sleep() {
    let mut config = loop_config();
    config.time_interval_max = 10.0 * STEP;
    let sensor = MockSensor::with_outcomes(vec![Ok(Reading::error(fixed_now()))]);
    // Second measurement lands two ticks after the failed one.
    let mut orchestrator = make_orchestrator(&config, sensor, 7.0 * STEP);
    let mut sink = RecordingSink::default();
    orchestrator.run(&mut sink).expect("clean run");

    let sensor = orchestrator.sensor();
    assert_eq!(sensor.measures(), 2);
    assert_eq!(sensor.closes(), vec![false, true, true]);

    let states: Vec<_> = sink
        .events
        .iter()
        .filter_map(|e| match e {
            AppEvent::Published(state) => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(states, vec![ReadingState::Error, ReadingState::Ok]);

    assert!(orchestrator.bus().payloads()[0].contains(r#""STATE":"ERROR""#));
    assert!(orchestrator.last_ok().is_some());
    assert_eq!(orchestrator.plan().t_interval, 10.0 * STEP);
}

#[test]
fn error_reading_is_not_remembered() {
    let sensor = MockSensor::with_outcomes(vec![Ok(Reading::error(fixed_now()))]);
    let mut orchestrator = make_orchestrator(&loop_config(), sensor, stop_after(1));
    orchestrator
        .run(&mut RecordingSink::default())
        .expect("clean run");
    assert!(orchestrator.last_ok().is_none());
}
