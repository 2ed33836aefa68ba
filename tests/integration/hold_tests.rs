//! Hold decisions driven by deactivation windows and by subscribed
//! condition topics.

use serde_json::json;

use sds011_mqtt::app::events::AppEvent;
use sds011_mqtt::app::ports::BusMessage;
use sds011_mqtt::app::service::Orchestrator;
use sds011_mqtt::config::SystemConfig;
use sds011_mqtt::reading::Reading;
use sds011_mqtt::shutdown::ShutdownToken;
use sds011_mqtt::subscription::TopicSpec;

use crate::mock_ports::{
    MockBus, MockSensor, RecordingSink, VirtualClock, fixed_now, loop_config, stop_after,
};

type TestOrchestrator = Orchestrator<MockSensor, MockBus, VirtualClock>;

fn run(config: &SystemConfig, bus: MockBus, loop_count: u32) -> (TestOrchestrator, RecordingSink) {
    let shutdown = ShutdownToken::new();
    let clock = VirtualClock::stopping_at(stop_after(loop_count), &shutdown);
    let mut orchestrator = Orchestrator::new(config, MockSensor::new(), bus, clock, shutdown)
        .expect("valid subscriptions");
    let mut sink = RecordingSink::default();
    orchestrator.run(&mut sink).expect("clean run");
    (orchestrator, sink)
}

fn whole_day_window(mut config: SystemConfig) -> SystemConfig {
    config.deactivation_time_ranges = Some(json!([[0, 1439]]));
    config
}

fn deactivated() -> String {
    Reading::deactivated(fixed_now()).to_message()
}

// ── Deactivation windows ─────────────────────────────────────

#[test]
fn window_with_actor_switches_off_and_never_touches_sensor() {
    let loop_count = 3;
    let mut config = whole_day_window(loop_config());
    config.mqtt_channel_out_actor = Some("sensor/power".into());
    let (orchestrator, sink) = run(&config, MockBus::new(), loop_count);

    let sensor = orchestrator.sensor();
    assert!(sensor.opens().is_empty());
    assert_eq!(sensor.measures(), 0);
    assert_eq!(sensor.closes(), vec![true]);

    let published = &orchestrator.bus().published;
    assert_eq!(published.len(), 2 * loop_count as usize + 1);
    let deactivated = deactivated();
    for message in published {
        match message.payload.as_str() {
            "OFF" => {
                assert_eq!(message.channel.as_deref(), Some("sensor/power"));
                assert_eq!(message.retain, Some(true));
            }
            payload => {
                assert_eq!(payload, deactivated);
                assert_eq!(message.channel, None);
            }
        }
    }

    assert!(sink.events.contains(&AppEvent::HoldChanged(true)));
    assert!(orchestrator.plan().on_hold);
}

#[test]
fn window_without_actor_sends_sensor_to_sleep() {
    let loop_count = 3;
    let config = whole_day_window(loop_config());
    let (orchestrator, _) = run(&config, MockBus::new(), loop_count);

    let sensor = orchestrator.sensor();
    assert_eq!(sensor.opens(), vec![false; loop_count as usize]);
    assert_eq!(sensor.measures(), 0);
    assert_eq!(sensor.closes(), vec![true; loop_count as usize + 1]);

    let expected = deactivated();
    assert_eq!(
        orchestrator.bus().payloads(),
        vec![expected.as_str(); loop_count as usize]
    );
}

#[test]
fn window_outside_current_time_keeps_sampling() {
    // The virtual clock reads 02:02, minute 122.
    let mut config = loop_config();
    config.deactivation_time_ranges = Some(json!([[0, 121], [123, 1439]]));
    let (orchestrator, _) = run(&config, MockBus::new(), 1);
    assert_eq!(orchestrator.sensor().measures(), 1);
}

#[test]
fn malformed_window_is_ignored() {
    let mut config = loop_config();
    config.deactivation_time_ranges = Some(json!("all day"));
    let (orchestrator, _) = run(&config, MockBus::new(), 1);
    assert_eq!(orchestrator.sensor().measures(), 1);
    assert!(!orchestrator.plan().on_hold);
}

// ── Subscribed conditions ────────────────────────────────────

fn with_humidity(mut config: SystemConfig) -> SystemConfig {
    config.mqtt_channel_in_humi = Some(TopicSpec::Topic("home/humidity".into()));
    config
}

#[test]
fn condition_topics_are_subscribed_after_connect() {
    let mut config = with_humidity(loop_config());
    config.mqtt_channel_in_hold = Some(TopicSpec::Path(vec![
        "home/control".into(),
        "dust".into(),
    ]));
    let (orchestrator, sink) = run(&config, MockBus::new(), 1);

    assert_eq!(
        orchestrator.bus().subscribed,
        vec!["home/control".to_string(), "home/humidity".to_string()]
    );
    assert_eq!(sink.events[0], AppEvent::Started { subscribed: 2 });
}

#[test]
fn humidity_in_range_allows_sampling() {
    let config = with_humidity(loop_config());
    let bus = MockBus::with_inbox(vec![BusMessage::new("home/humidity", "45.5")]);
    let (orchestrator, _) = run(&config, bus, 1);

    assert_eq!(orchestrator.sensor().measures(), 1);
    assert!(!orchestrator.plan().on_hold);
}

#[test]
fn humidity_out_of_range_holds() {
    let config = with_humidity(loop_config());
    let bus = MockBus::with_inbox(vec![BusMessage::new("home/humidity", "95")]);
    let (orchestrator, _) = run(&config, bus, 1);

    assert_eq!(orchestrator.sensor().measures(), 0);
    assert_eq!(orchestrator.sensor().opens(), vec![false]);
    let expected = deactivated();
    assert_eq!(orchestrator.bus().payloads(), vec![expected.as_str()]);
}

#[test]
fn missing_humidity_value_holds() {
    let config = with_humidity(loop_config());
    let (orchestrator, _) = run(&config, MockBus::new(), 1);
    assert!(orchestrator.plan().on_hold);
    assert_eq!(orchestrator.sensor().measures(), 0);
}

#[test]
fn latest_message_wins() {
    let config = with_humidity(loop_config());
    let bus = MockBus::with_inbox(vec![
        BusMessage::new("home/humidity", "95"),
        BusMessage::new("home/humidity", "40"),
    ]);
    let (orchestrator, _) = run(&config, bus, 1);
    assert_eq!(orchestrator.sensor().measures(), 1);
}

#[test]
fn hold_token_in_json_payload_holds() {
    let mut config = loop_config();
    config.mqtt_channel_in_hold = Some(TopicSpec::Path(vec![
        "home/control".into(),
        "dust".into(),
        "mode".into(),
    ]));
    let bus = MockBus::with_inbox(vec![BusMessage::new(
        "home/control",
        r#"{"dust": {"mode": "on_hold"}}"#,
    )]);
    let (orchestrator, _) = run(&config, bus, 1);

    assert!(orchestrator.plan().on_hold);
    assert_eq!(orchestrator.sensor().measures(), 0);
}

#[test]
fn unset_hold_flag_does_not_hold() {
    let mut config = loop_config();
    config.mqtt_channel_in_hold = Some(TopicSpec::Topic("home/hold".into()));
    let (orchestrator, _) = run(&config, MockBus::new(), 1);
    assert!(!orchestrator.plan().on_hold);
    assert_eq!(orchestrator.sensor().measures(), 1);
}

#[test]
fn unrelated_topics_are_ignored() {
    let config = with_humidity(loop_config());
    let bus = MockBus::with_inbox(vec![BusMessage::new("home/other", "45")]);
    let (orchestrator, _) = run(&config, bus, 1);
    assert!(orchestrator.plan().on_hold);
}
