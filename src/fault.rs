use codex_protocol::MalformedEvent;
use serde_json::Value;
use thiserror::Error;

/// Non-fatal diagnostic raised while reducing an event stream.
///
/// Faults isolate to the smallest affected unit (one message, one
/// correlation record, one approval) and never terminate the stream.
/// Unknown event types are not faults at all; they pass through inertly.
#[derive(Debug, Error)]
pub enum EngineFault {
    #[error("malformed '{event_type}' event: {detail}")]
    MalformedEvent {
        event_type: String,
        detail: String,
        raw: Value,
    },

    #[error("protocol violation: {detail}")]
    ProtocolViolation { detail: String },

    #[error("stale approval resolution for call '{call_id}'")]
    StaleApproval { call_id: String },

    #[error("event references unknown or closed call '{call_id}'")]
    UnknownCallId { call_id: String },

    #[error("dropped delta for closed stream '{stream_id}'")]
    StaleDelta { stream_id: String },

    #[error("turn aborted: {reason}")]
    StreamAbort { reason: String },
}

impl From<MalformedEvent> for EngineFault {
    fn from(error: MalformedEvent) -> Self {
        Self::MalformedEvent {
            event_type: error.event_type,
            detail: error.detail,
            raw: error.raw,
        }
    }
}
