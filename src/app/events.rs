//! Outbound application events.
//!
//! The [`Orchestrator`](super::service::Orchestrator) emits these through
//! the [`EventSink`](super::ports::EventSink) port.

use crate::fsm::Phase;
use crate::reading::ReadingState;

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// The broker connection is confirmed and the duty cycle begins.
    Started { subscribed: usize },

    /// The duty cycle moved between phases within one tick.
    PhaseChanged { from: Phase, to: Phase },

    /// A new cycle started with a different hold decision than the last.
    HoldChanged(bool),

    /// A reading was handed to the bus.
    Published(ReadingState),

    /// Cleanup ran; the orchestrator is closed.
    Stopped,
}
