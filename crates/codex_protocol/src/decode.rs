use std::fmt;

use serde_json::Value;

use crate::events::{CodexEvent, EventMsg};

/// A recognized discriminant whose payload failed validation.
///
/// Carries the raw record so callers can surface it in diagnostics. The
/// offending event is dropped; decoding never aborts the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedEvent {
    pub event_type: String,
    pub raw: Value,
    pub detail: String,
}

impl fmt::Display for MalformedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "malformed '{}' event: {}",
            self.event_type, self.detail
        )
    }
}

impl std::error::Error for MalformedEvent {}

/// Decodes one raw backend record into a tagged event.
///
/// Unknown discriminants are not errors: they map to [`EventMsg::Unknown`]
/// and pass through inertly. A `MalformedEvent` is returned only when a
/// *recognized* discriminant is missing required fields or carries mistyped
/// ones. Additive fields on known variants are ignored.
pub fn decode_event(raw: &Value) -> Result<CodexEvent, MalformedEvent> {
    // Routed records nest the event body under `msg`; some transports send
    // the body bare. Accept both.
    let body = raw.get("msg").unwrap_or(raw);

    let event_type = match body.get("type").and_then(Value::as_str) {
        Some(event_type) => event_type.to_owned(),
        None => {
            return Err(MalformedEvent {
                event_type: String::new(),
                raw: raw.clone(),
                detail: "missing 'type' discriminant".to_owned(),
            });
        }
    };

    let msg = if EventMsg::is_known_type(&event_type) {
        serde_json::from_value::<EventMsg>(body.clone()).map_err(|source| MalformedEvent {
            event_type: event_type.clone(),
            raw: raw.clone(),
            detail: source.to_string(),
        })?
    } else {
        EventMsg::Unknown {
            event_type,
            payload: body.clone(),
        }
    };

    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let session_id = raw
        .get("session_id")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    Ok(CodexEvent {
        id,
        msg,
        session_id,
    })
}
