//! Wire protocol model for Codex-style coding-agent backends.
//!
//! This crate defines only the closed event union and its tolerant decoder.
//! It excludes transport concerns, conversation state, and rendering.

pub mod decode;
pub mod events;

pub use decode::{decode_event, MalformedEvent};
pub use events::{CodexEvent, EventMsg, PlanStep, PlanStepStatus};
