//! SDS011 → MQTT bridge library.
//!
//! Exposes the duty-cycle core (orchestrator, state machine, planner,
//! subscriptions) and the concrete adapters for integration testing and
//! for the `sds011-mqtt` binary.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod error;
pub mod fsm;
pub mod logging;
pub mod reading;
pub mod scheduler;
pub mod shutdown;
pub mod subscription;

pub mod adapters;
pub mod sensors;
