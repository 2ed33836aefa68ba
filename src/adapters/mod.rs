//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter         | Implements  | Connects to                 |
//! |-----------------|-------------|-----------------------------|
//! | `serial_sensor` | SensorPort  | SDS011 over a serial port   |
//! | `mock_sensor`   | SensorPort  | nothing (fixed dummy value) |
//! | `mqtt`          | BusPort     | MQTT broker (rumqttc)       |
//! | `time`          | ClockPort   | local wall clock            |
//! | `log_sink`      | EventSink   | `log` facade                |

pub mod log_sink;
pub mod mock_sensor;
pub mod mqtt;
pub mod serial_sensor;
pub mod time;
