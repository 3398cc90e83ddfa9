//! Owns the conversation collection and its lifecycle.
//!
//! The manager is the sole mutator of conversation state: engines are
//! reached only through it, and cross-conversation reads (titles, favorite
//! flags) go through its accessors.

use std::collections::HashMap;

use codex_protocol::CodexEvent;
use session_store::{TranscriptEntry, TranscriptEntryKind, TranscriptError, TranscriptStore};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::classify::classify;
use crate::conversation::{Conversation, ForkOrigin, Lifecycle};
use crate::engine::ConversationEngine;
use crate::fault::EngineFault;
use crate::host::WorkspaceHost;
use crate::message::{Message, MessageType, Role};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("unknown conversation '{id}'")]
    UnknownConversation { id: String },

    #[error("unknown message '{message_id}' in conversation '{conversation_id}'")]
    UnknownMessage {
        conversation_id: String,
        message_id: String,
    },

    #[error("no conversation accepts events for session '{session_id}'")]
    UnroutableSession { session_id: String },

    #[error("host operation failed: {0}")]
    Host(String),

    #[error(transparent)]
    Transcript(#[from] TranscriptError),
}

#[derive(Default)]
pub struct ConversationManager {
    engines: HashMap<String, ConversationEngine>,
    order: Vec<String>,
}

impl ConversationManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new pending conversation for a workspace. At most one
    /// pending conversation exists per workspace: an existing one is
    /// archived and replaced.
    pub fn create_pending(&mut self, working_directory: &str) -> String {
        self.archive_pending_for(working_directory);

        let id = Uuid::new_v4().to_string();
        let conversation = Conversation::new(&id, working_directory);
        self.insert_engine(ConversationEngine::new(conversation));
        id
    }

    /// Forks a conversation at a message: the new pending conversation holds
    /// the source's prefix up to and including that message, carries an
    /// id-only back-reference, and starts with clean transient state.
    pub fn fork(&mut self, source_id: &str, message_id: &str) -> Result<String, ManagerError> {
        let source = self
            .conversation(source_id)
            .ok_or_else(|| ManagerError::UnknownConversation {
                id: source_id.to_owned(),
            })?;

        let cut = source
            .messages()
            .iter()
            .position(|message| message.id == message_id)
            .ok_or_else(|| ManagerError::UnknownMessage {
                conversation_id: source_id.to_owned(),
                message_id: message_id.to_owned(),
            })?;

        let mut prefix: Vec<Message> = source.messages()[..=cut].to_vec();
        for message in &mut prefix {
            // Open streams belong to the origin; a fork starts frozen.
            message.freeze();
        }

        let working_directory = source.working_directory.clone();
        let title = source.title.clone();

        self.archive_pending_for(&working_directory);

        let id = Uuid::new_v4().to_string();
        let mut conversation = Conversation::new(&id, working_directory);
        conversation.title = title;
        conversation.fork_origin = Some(ForkOrigin {
            source_conversation_id: source_id.to_owned(),
            parent_message_id: message_id.to_owned(),
        });
        conversation.messages = prefix;

        self.insert_engine(ConversationEngine::new(conversation));
        Ok(id)
    }

    /// Reconstructs a pending conversation from a persisted transcript. The
    /// conversation turns active when a resume-scoped `session_configured`
    /// arrives; replayed history never duplicates because replayed entries
    /// keep their persisted ids.
    pub fn resume_from_transcript(
        &mut self,
        store: &TranscriptStore,
        leaf: Option<&str>,
    ) -> Result<String, ManagerError> {
        let entries = store.replay_leaf(leaf)?;
        let working_directory = store.header().cwd.clone();

        self.archive_pending_for(&working_directory);

        let id = Uuid::new_v4().to_string();
        let mut conversation = Conversation::new(&id, working_directory);
        conversation.transcript_path = Some(store.path().to_path_buf());
        for entry in &entries {
            conversation.push_message(message_from_entry(entry));
        }

        self.insert_engine(ConversationEngine::new(conversation));
        Ok(id)
    }

    /// Re-replays a transcript into an existing conversation. Entries whose
    /// ids are already present are skipped, so reconciling after a live
    /// session replayed the same history never duplicates messages.
    pub fn reconcile_transcript(
        &mut self,
        conversation_id: &str,
        store: &TranscriptStore,
        leaf: Option<&str>,
    ) -> Result<usize, ManagerError> {
        let entries = store.replay_leaf(leaf)?;
        let engine = self.engine_mut(conversation_id)?;

        let mut appended = 0;
        for entry in &entries {
            if engine.conversation_mut().push_message(message_from_entry(entry)) {
                appended += 1;
            }
        }
        Ok(appended)
    }

    /// Applies one event to a conversation's engine.
    pub fn apply_event(
        &mut self,
        conversation_id: &str,
        event: &CodexEvent,
    ) -> Result<Vec<EngineFault>, ManagerError> {
        let engine = self.engine_mut(conversation_id)?;
        Ok(engine.apply(event))
    }

    /// Routes an event by its session id: bound conversations match on
    /// session, everything else falls back to the most recent pending
    /// conversation (which `session_configured` then binds).
    pub fn route_event(&mut self, event: &CodexEvent) -> Result<Vec<EngineFault>, ManagerError> {
        let target = match event.session_id.as_deref() {
            Some(session_id) => self
                .order
                .iter()
                .find(|id| {
                    self.engines[*id].conversation().session_id() == Some(session_id)
                })
                .cloned()
                .or_else(|| self.latest_pending()),
            None => self.latest_pending(),
        };

        match target {
            Some(conversation_id) => self.apply_event(&conversation_id, event),
            None => {
                debug!(session_id = ?event.session_id, "event dropped: no routable conversation");
                Err(ManagerError::UnroutableSession {
                    session_id: event.session_id.clone().unwrap_or_default(),
                })
            }
        }
    }

    /// Archives a conversation, silently cancelling any in-flight streaming.
    pub fn archive(&mut self, id: &str) -> Result<(), ManagerError> {
        let engine = self.engine_mut(id)?;
        engine.teardown();
        engine.conversation_mut().lifecycle = Lifecycle::Archived;
        Ok(())
    }

    /// Removes a conversation entirely, deleting its persisted transcript
    /// through the host when one exists.
    pub fn delete(
        &mut self,
        id: &str,
        host: &mut dyn WorkspaceHost,
    ) -> Result<(), ManagerError> {
        let engine = self.engine_mut(id)?;
        engine.teardown();
        let transcript_path = engine.conversation().transcript_path.clone();

        self.engines.remove(id);
        self.order.retain(|existing| existing != id);

        if let Some(path) = transcript_path {
            host.delete_transcript(&path).map_err(ManagerError::Host)?;
        }
        Ok(())
    }

    pub fn set_favorite(&mut self, id: &str, favorite: bool) -> Result<(), ManagerError> {
        self.engine_mut(id)?.conversation_mut().favorite = favorite;
        Ok(())
    }

    pub fn set_title(&mut self, id: &str, title: impl Into<String>) -> Result<(), ManagerError> {
        self.engine_mut(id)?.conversation_mut().title = title.into();
        Ok(())
    }

    #[must_use]
    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.engines.get(id).map(ConversationEngine::conversation)
    }

    /// Conversations in creation order.
    pub fn conversations(&self) -> impl Iterator<Item = &Conversation> {
        self.order
            .iter()
            .map(|id| self.engines[id].conversation())
    }

    #[must_use]
    pub fn engine(&self, id: &str) -> Option<&ConversationEngine> {
        self.engines.get(id)
    }

    pub fn engine_mut(&mut self, id: &str) -> Result<&mut ConversationEngine, ManagerError> {
        self.engines
            .get_mut(id)
            .ok_or_else(|| ManagerError::UnknownConversation { id: id.to_owned() })
    }

    fn insert_engine(&mut self, engine: ConversationEngine) {
        let id = engine.conversation().id.clone();
        self.order.push(id.clone());
        self.engines.insert(id, engine);
    }

    fn latest_pending(&self) -> Option<String> {
        self.order
            .iter()
            .rev()
            .find(|id| self.engines[*id].conversation().is_pending())
            .cloned()
    }

    fn archive_pending_for(&mut self, working_directory: &str) {
        let pending: Vec<String> = self
            .order
            .iter()
            .filter(|id| {
                let conversation = self.engines[*id].conversation();
                conversation.is_pending() && conversation.working_directory == working_directory
            })
            .cloned()
            .collect();

        for id in pending {
            // Infallible: ids come from the live map.
            let _ = self.archive(&id);
        }
    }
}

/// Maps a finalized message to its persisted form. Approval prompts and
/// still-streaming messages are not persisted.
#[must_use]
pub fn transcript_kind_for(message: &Message) -> Option<TranscriptEntryKind> {
    if message.is_streaming {
        return None;
    }

    match message.role {
        Role::User => Some(TranscriptEntryKind::UserText {
            text: message.content.clone(),
        }),
        Role::Assistant => {
            if classify(message) == MessageType::Reasoning {
                Some(TranscriptEntryKind::ReasoningText {
                    text: message.content.clone(),
                })
            } else {
                Some(TranscriptEntryKind::AssistantText {
                    text: message.content.clone(),
                })
            }
        }
        Role::System => match classify(message) {
            MessageType::ToolCall | MessageType::ExecCommand => {
                let mut lines = message.content.splitn(2, '\n');
                let title = lines.next().unwrap_or_default().to_owned();
                let output = lines.next().unwrap_or_default().to_owned();
                Some(TranscriptEntryKind::ToolUse {
                    call_id: message.id.clone(),
                    title,
                    output,
                })
            }
            _ => Some(TranscriptEntryKind::SystemNote {
                text: message.content.clone(),
            }),
        },
        Role::Approval => None,
    }
}

fn message_from_entry(entry: &TranscriptEntry) -> Message {
    let (id, role, content) = match &entry.kind {
        TranscriptEntryKind::UserText { text } => (entry.id.clone(), Role::User, text.clone()),
        TranscriptEntryKind::AssistantText { text } => {
            (entry.id.clone(), Role::Assistant, text.clone())
        }
        TranscriptEntryKind::ReasoningText { text } => (
            // The id scope is what classifies replayed reasoning.
            format!("{}-reasoning-replay", entry.id),
            Role::Assistant,
            text.clone(),
        ),
        TranscriptEntryKind::ToolUse { title, output, .. } => (
            entry.id.clone(),
            Role::System,
            if output.is_empty() {
                title.clone()
            } else {
                format!("{title}\n{output}")
            },
        ),
        TranscriptEntryKind::SystemNote { text } => (entry.id.clone(), Role::System, text.clone()),
    };

    let mut message = Message::new(id, role, content);
    if let Ok(parsed) = OffsetDateTime::parse(&entry.ts, &Rfc3339) {
        message.timestamp = parsed.unix_timestamp() * 1_000 + i64::from(parsed.millisecond());
    }
    message
}
