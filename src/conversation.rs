use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Identifier-only back-reference from a fork to its origin. Never a shared
/// object graph; resolving it goes through the conversation manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkOrigin {
    pub source_conversation_id: String,
    pub parent_message_id: String,
}

/// Conversation lifecycle. Binding is irreversible: once `Active`, a
/// conversation never returns to `Pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lifecycle {
    Pending,
    Active { session_id: String, model: String },
    Archived,
}

/// Running token totals reported by `token_count` events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub cached_input_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_output_tokens: u64,
    pub total_tokens: u64,
}

/// One conversation: an ordered, append-only message list plus lifecycle and
/// session binding. In-place mutation is limited to streaming updates of
/// still-open message ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub favorite: bool,
    pub working_directory: String,
    pub lifecycle: Lifecycle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork_origin: Option<ForkOrigin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<PathBuf>,
    pub token_usage: TokenUsage,
    pub messages: Vec<Message>,
}

impl Conversation {
    #[must_use]
    pub fn new(id: impl Into<String>, working_directory: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            favorite: false,
            working_directory: working_directory.into(),
            lifecycle: Lifecycle::Pending,
            fork_origin: None,
            transcript_path: None,
            token_usage: TokenUsage::default(),
            messages: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.lifecycle == Lifecycle::Pending
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Active { .. })
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match &self.lifecycle {
            Lifecycle::Active { session_id, .. } => Some(session_id),
            _ => None,
        }
    }

    #[must_use]
    pub fn model(&self) -> Option<&str> {
        match &self.lifecycle {
            Lifecycle::Active { model, .. } => Some(model),
            _ => None,
        }
    }

    /// Binds this conversation to a backend session. Returns false when the
    /// conversation is already bound or archived; binding happens once.
    pub fn bind(&mut self, session_id: impl Into<String>, model: impl Into<String>) -> bool {
        if !self.is_pending() {
            return false;
        }

        self.lifecycle = Lifecycle::Active {
            session_id: session_id.into(),
            model: model.into(),
        };
        true
    }

    /// Appends a message unless its id is already present. Id-based
    /// deduplication is what keeps resume-then-replay from duplicating
    /// history.
    pub fn push_message(&mut self, message: Message) -> bool {
        if self.contains_message(&message.id) {
            return false;
        }

        if self.title.is_empty() && message.role == crate::message::Role::User {
            self.title = derive_title(&message.content);
        }

        self.messages.push(message);
        true
    }

    #[must_use]
    pub fn contains_message(&self, id: &str) -> bool {
        self.messages.iter().any(|message| message.id == id)
    }

    #[must_use]
    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|message| message.id == id)
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }
}

/// Conversation titles come from the first user message, truncated on a char
/// boundary.
#[must_use]
pub fn derive_title(text: &str) -> String {
    const MAX_TITLE_CHARS: usize = 48;

    let first_line = text.lines().next().unwrap_or("").trim();
    if first_line.chars().count() <= MAX_TITLE_CHARS {
        return first_line.to_owned();
    }

    let truncated: String = first_line.chars().take(MAX_TITLE_CHARS).collect();
    format!("{truncated}…")
}
