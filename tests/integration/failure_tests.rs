//! Fatal conditions: connect timeout, broker loss, sensor error ceiling,
//! plus shutdown and cleanup guarantees.

use sds011_mqtt::app::events::AppEvent;
use sds011_mqtt::app::service::Orchestrator;
use sds011_mqtt::error::{BusError, SensorError};
use sds011_mqtt::shutdown::ShutdownToken;
use sds011_mqtt::subscription::TopicSpec;

use crate::mock_ports::{MockBus, MockSensor, RecordingSink, VirtualClock, loop_config, stop_after};

fn unbounded(
    sensor: MockSensor,
    bus: MockBus,
) -> (Orchestrator<MockSensor, MockBus, VirtualClock>, ShutdownToken) {
    let shutdown = ShutdownToken::new();
    let clock = VirtualClock::unbounded(&shutdown);
    let orchestrator = Orchestrator::new(&loop_config(), sensor, bus, clock, shutdown.clone())
        .expect("valid subscriptions");
    (orchestrator, shutdown)
}

// ── Connecting ───────────────────────────────────────────────

#[test]
fn broker_never_connecting_times_out() {
    let bus = MockBus {
        connected: false,
        ..MockBus::default()
    };
    let (mut orchestrator, _) = unbounded(MockSensor::new(), bus);
    let mut sink = RecordingSink::default();

    let err = orchestrator.run(&mut sink).expect_err("must time out");
    assert_eq!(
        err.downcast_ref::<BusError>(),
        Some(&BusError::ConnectTimeout { waited_secs: 15 })
    );

    // Nothing was sampled, but cleanup still ran.
    assert!(orchestrator.sensor().opens().is_empty());
    assert_eq!(orchestrator.sensor().closes(), vec![true]);
    assert_eq!(orchestrator.bus().closed, 1);
    assert!(!sink.events.contains(&AppEvent::Started { subscribed: 0 }));
    assert_eq!(sink.events.last(), Some(&AppEvent::Stopped));
}

#[test]
fn shutdown_before_start_skips_cycles() {
    let (mut orchestrator, shutdown) = unbounded(MockSensor::new(), MockBus::new());
    shutdown.request();

    let mut sink = RecordingSink::default();
    orchestrator.run(&mut sink).expect("clean shutdown");

    assert_eq!(orchestrator.sensor().measures(), 0);
    assert_eq!(orchestrator.sensor().closes(), vec![true]);
    assert!(orchestrator.bus().published.is_empty());
    assert!(orchestrator.bus().subscribed.is_empty());
    assert_eq!(orchestrator.bus().closed, 1);
    assert_eq!(sink.events, vec![AppEvent::Stopped]);
}

#[test]
fn shutdown_while_connecting_never_reports_started() {
    let mut config = loop_config();
    config.mqtt_channel_in_humi = Some(TopicSpec::Topic("home/humidity".into()));
    config.mqtt_connect_wait = 10.0 * config.time_step;
    let bus = MockBus {
        connected: false,
        ..MockBus::default()
    };
    let shutdown = ShutdownToken::new();
    // Shutdown arrives after two ticks, well inside the connect window.
    let clock = VirtualClock::stopping_at(2.0 * config.time_step, &shutdown);
    let mut orchestrator = Orchestrator::new(&config, MockSensor::new(), bus, clock, shutdown)
        .expect("valid subscriptions");
    let mut sink = RecordingSink::default();

    orchestrator.run(&mut sink).expect("clean shutdown");

    assert!(orchestrator.bus().subscribed.is_empty());
    assert!(orchestrator.sensor().opens().is_empty());
    assert_eq!(sink.events, vec![AppEvent::Stopped]);
}

// ── Running ──────────────────────────────────────────────────

#[test]
fn broker_loss_aborts_run() {
    // First call confirms the connection, two ticks succeed, the third fails.
    let bus = MockBus {
        fatal_after: Some(3),
        ..MockBus::default()
    };
    let (mut orchestrator, _) = unbounded(MockSensor::new(), bus);

    let err = orchestrator
        .run(&mut RecordingSink::default())
        .expect_err("must abort");
    assert!(matches!(
        err.downcast_ref::<BusError>(),
        Some(BusError::Fatal(_))
    ));

    assert_eq!(orchestrator.sensor().opens(), vec![true]);
    assert_eq!(orchestrator.sensor().measures(), 0);
    assert_eq!(orchestrator.sensor().closes(), vec![true]);
    assert_eq!(orchestrator.bus().closed, 1);
}

#[test]
fn sensor_error_ceiling_aborts_run() {
    let ceiling = SensorError::ErrorCeiling {
        consecutive: 4,
        ceiling: 3,
    };
    let sensor = MockSensor::with_outcomes(vec![Err(ceiling.clone())]);
    let (mut orchestrator, _) = unbounded(sensor, MockBus::new());

    let err = orchestrator
        .run(&mut RecordingSink::default())
        .expect_err("must abort");
    assert_eq!(err.downcast_ref::<SensorError>(), Some(&ceiling));

    assert!(orchestrator.bus().published.is_empty());
    assert_eq!(orchestrator.sensor().closes(), vec![true]);
    assert!(orchestrator.is_closed());
}

// ── Cleanup ──────────────────────────────────────────────────

#[test]
fn close_runs_only_once() {
    let shutdown = ShutdownToken::new();
    let clock = VirtualClock::stopping_at(stop_after(1), &shutdown);
    let mut orchestrator =
        Orchestrator::new(&loop_config(), MockSensor::new(), MockBus::new(), clock, shutdown)
            .expect("valid subscriptions");
    orchestrator
        .run(&mut RecordingSink::default())
        .expect("clean run");

    orchestrator.close().expect("second close is a no-op");
    orchestrator.close().expect("third close is a no-op");

    assert_eq!(orchestrator.sensor().closes(), vec![true, true]);
    assert_eq!(orchestrator.bus().closed, 1);
}

#[test]
fn actor_off_skipped_when_broker_down() {
    let mut config = loop_config();
    config.mqtt_channel_out_actor = Some("sensor/power".into());
    let bus = MockBus {
        connected: false,
        ..MockBus::default()
    };
    let shutdown = ShutdownToken::new();
    let clock = VirtualClock::unbounded(&shutdown);
    let mut orchestrator = Orchestrator::new(&config, MockSensor::new(), bus, clock, shutdown)
        .expect("valid subscriptions");

    assert!(orchestrator.close().is_ok());
    assert!(orchestrator.bus().published.is_empty());
    assert_eq!(orchestrator.bus().closed, 1);
}
