//! Event normalization and conversation state engine for transcript-style
//! coding-agent clients.
//!
//! Raw backend JSON enters through [`codex_protocol::decode_event`], is
//! reduced by a per-conversation [`engine::ConversationEngine`], and lands
//! in an ordered [`conversation::Conversation`] message list ready to
//! render. The [`manager::ConversationManager`] owns the collection:
//! session routing, fork, resume from [`session_store`] transcripts,
//! archive, and delete.

pub mod aggregate;
pub mod approval;
pub mod classify;
pub mod conversation;
pub mod correlate;
pub mod engine;
pub mod fault;
pub mod host;
pub mod manager;
pub mod message;
pub mod source;

pub use conversation::{Conversation, ForkOrigin, Lifecycle, TokenUsage};
pub use engine::ConversationEngine;
pub use fault::EngineFault;
pub use manager::{ConversationManager, ManagerError};
pub use message::{ApprovalKind, ApprovalRequest, Message, MessageType, Role};
pub use source::{drive, ChannelEventSource, DriveReport, EventSource};
