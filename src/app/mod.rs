//! Application core: pure domain logic, zero I/O.
//!
//! The duty-cycle orchestration for the SDS011 bridge: cycle planning,
//! hold aggregation and result handling.  All interaction with the sensor,
//! the broker and the clock happens through **port traits** defined in
//! [`ports`], keeping this layer fully testable without real peripherals.

pub mod events;
pub mod ports;
pub mod service;
