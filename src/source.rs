//! Event intake: a pull seam over whatever transport delivers backend JSON.

use std::sync::mpsc::Receiver;

use codex_protocol::decode_event;
use serde_json::Value;
use tracing::warn;

use crate::engine::ConversationEngine;
use crate::fault::EngineFault;

/// Source of raw backend events. Implementations block until an event is
/// available and return `None` once the stream is exhausted.
pub trait EventSource {
    fn next_event(&mut self) -> Option<Value>;
}

/// Event source backed by a standard mpsc channel. Sender disconnect ends
/// the stream.
pub struct ChannelEventSource {
    receiver: Receiver<Value>,
}

impl ChannelEventSource {
    #[must_use]
    pub fn new(receiver: Receiver<Value>) -> Self {
        Self { receiver }
    }
}

impl EventSource for ChannelEventSource {
    fn next_event(&mut self) -> Option<Value> {
        self.receiver.recv().ok()
    }
}

/// Outcome of draining one event source into an engine.
#[derive(Debug, Default)]
pub struct DriveReport {
    /// Events that decoded and reached the engine.
    pub applied: usize,
    /// Faults raised along the way, in arrival order. Faults never stop the
    /// loop; a malformed event is skipped and the next one is processed.
    pub faults: Vec<EngineFault>,
}

/// Drains `source` to exhaustion, applying every decodable event to
/// `engine`.
pub fn drive(engine: &mut ConversationEngine, source: &mut dyn EventSource) -> DriveReport {
    let mut report = DriveReport::default();

    while let Some(raw) = source.next_event() {
        match decode_event(&raw) {
            Ok(event) => {
                report.faults.extend(engine.apply(&event));
                report.applied += 1;
            }
            Err(malformed) => {
                warn!(event_type = %malformed.event_type, "skipping malformed event");
                report.faults.push(EngineFault::from(malformed));
            }
        }
    }

    report
}
