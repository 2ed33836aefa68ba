//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the `log` facade (stderr / journald in production).

use log::{debug, info};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Started { subscribed } => {
                info!("START | connected, subscribed={subscribed}");
            }
            AppEvent::PhaseChanged { from, to } => {
                debug!("PHASE | {from} -> {to}");
            }
            AppEvent::HoldChanged(on_hold) => {
                info!("HOLD  | {}", if *on_hold { "on" } else { "off" });
            }
            AppEvent::Published(state) => {
                debug!("PUB   | {state}");
            }
            AppEvent::Stopped => {
                info!("STOP  | cleanup done");
            }
        }
    }
}
