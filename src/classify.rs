//! Ordered rule table deriving a [`MessageType`] from message text.
//!
//! Classification is pure and recomputed on every read: streaming content
//! changes the cues, so nothing here is cached. The rules run top to bottom
//! and the first match wins, which pins the overlap between tool-call and
//! exec-command cues: tool cues take precedence, and a plan marker beats
//! both.

use crate::message::{Message, MessageType, Role};

struct RuleInput<'a> {
    content: &'a str,
    lower_content: &'a str,
    title: &'a str,
    id: &'a str,
    role: Role,
}

/// Rule 1: plan updates, keyed on the plan title/content markers, the full
/// status glyph triple, or a plan-scoped id.
fn is_plan_update(input: &RuleInput<'_>) -> bool {
    (input.title.contains("📋") && input.title.contains("Plan"))
        || input.content.contains("📋 Plan Updated")
        || (input.content.contains("✅")
            && input.content.contains("🔄")
            && input.content.contains("⏳"))
        || input.id.contains("-plan-")
}

/// Rule 2: reasoning streams, keyed on id alone.
fn is_reasoning_id(input: &RuleInput<'_>) -> bool {
    input.id.contains("-reasoning-") || input.id.contains("reasoning-stream")
}

/// Rule 3: tool calls. MCP tools, web searches, file reads, file changes.
fn is_tool_call(input: &RuleInput<'_>) -> bool {
    input.content.contains("🔧")
        || input.content.contains("Web Search:")
        || (input.lower_content.contains("read") && input.content.contains('.'))
        || input.content.contains("✏️ File Changes")
        || input.content.contains("```diff")
}

/// Rule 4: command execution markers.
fn is_exec_command(input: &RuleInput<'_>) -> bool {
    input.content.contains("▶️ Executing") || input.content.contains("✅ Command completed")
}

/// Rule 5: lexical reasoning cues, assistant messages only.
fn is_assistant_reasoning(input: &RuleInput<'_>) -> bool {
    if input.role != Role::Assistant {
        return false;
    }

    ["let me", "i'll", "first,", "analyzing", "planning"]
        .iter()
        .any(|cue| input.lower_content.contains(cue))
}

/// Rule 6: long system messages with reasoning-adjacent vocabulary.
fn is_system_reasoning(input: &RuleInput<'_>) -> bool {
    if input.role != Role::System || input.content.len() <= 100 {
        return false;
    }

    ["analyzing", "considering", "planning", "approach"]
        .iter()
        .any(|cue| input.lower_content.contains(cue))
}

const RULES: &[(MessageType, fn(&RuleInput<'_>) -> bool)] = &[
    (MessageType::PlanUpdate, is_plan_update),
    (MessageType::Reasoning, is_reasoning_id),
    (MessageType::ToolCall, is_tool_call),
    (MessageType::ExecCommand, is_exec_command),
    (MessageType::Reasoning, is_assistant_reasoning),
    (MessageType::Reasoning, is_system_reasoning),
];

/// Derives the semantic type of a message. First matching rule wins;
/// anything unmatched is [`MessageType::Normal`].
#[must_use]
pub fn classify(message: &Message) -> MessageType {
    classify_parts(
        &message.content,
        message.title.as_deref().unwrap_or(""),
        &message.id,
        message.role,
    )
}

/// Rule evaluation over raw message parts, for callers that have not yet
/// assembled a full [`Message`].
#[must_use]
pub fn classify_parts(content: &str, title: &str, id: &str, role: Role) -> MessageType {
    let lower_content = content.to_lowercase();
    let input = RuleInput {
        content,
        lower_content: &lower_content,
        title,
        id,
        role,
    };

    for (message_type, applies) in RULES {
        if applies(&input) {
            return *message_type;
        }
    }

    MessageType::Normal
}
