//! Transmission events and sinks.
//!
//! The engine pushes one [`TransmissionEvent`] per target selection, in
//! selection order, and never waits for the sink.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{Simulation, StepOutcome};

/// One hop of the message from `from` to `to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransmissionEvent {
    /// Source node id
    pub from: String,
    /// Target node id
    pub to: String,
}

impl TransmissionEvent {
    /// Create an event
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// A transmission tagged with the step that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEvent {
    /// Step number (1-based; the step counter after the step completed)
    pub step: u32,
    /// The hop
    #[serde(flatten)]
    pub event: TransmissionEvent,
}

/// Consumer of engine output.
pub trait EventSink: Send {
    /// A transmission happened during `step`
    fn transmit(&mut self, step: u32, event: &TransmissionEvent);

    /// A step finished and its mutations are applied
    fn step_completed(&mut self, _outcome: &StepOutcome, _simulation: &Simulation) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn transmit(&mut self, _step: u32, _event: &TransmissionEvent) {}
}

impl EventSink for Vec<StepEvent> {
    fn transmit(&mut self, step: u32, event: &TransmissionEvent) {
        self.push(StepEvent {
            step,
            event: event.clone(),
        });
    }
}

impl EventSink for mpsc::UnboundedSender<StepEvent> {
    fn transmit(&mut self, step: u32, event: &TransmissionEvent) {
        // A dropped receiver just means nobody is watching
        let _ = self.send(StepEvent {
            step,
            event: event.clone(),
        });
    }
}
