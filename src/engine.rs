//! Per-conversation event reducer.
//!
//! One engine owns one conversation plus its transient aggregation, routing,
//! and approval state, and reduces decoded events into conversation state
//! strictly in arrival order. A bad event never terminates the stream: it is
//! isolated to the smallest affected unit and reported as a fault.

use codex_protocol::{CodexEvent, EventMsg, PlanStep, PlanStepStatus};
use tracing::debug;
use uuid::Uuid;

use crate::aggregate::{StreamKind, StreamingAggregator};
use crate::approval::{ApprovalCoordinator, ApprovalState};
use crate::conversation::Conversation;
use crate::correlate::CorrelationRouter;
use crate::fault::EngineFault;
use crate::message::{ApprovalKind, ApprovalRequest, Message, Role};

pub struct ConversationEngine {
    conversation: Conversation,
    aggregator: StreamingAggregator,
    router: CorrelationRouter,
    approvals: ApprovalCoordinator,
    plan_seq: u64,
    diff_seq: u64,
    note_seq: u64,
    user_seq: u64,
}

impl ConversationEngine {
    #[must_use]
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            aggregator: StreamingAggregator::default(),
            router: CorrelationRouter::default(),
            approvals: ApprovalCoordinator::default(),
            plan_seq: 0,
            diff_seq: 0,
            note_seq: 0,
            user_seq: 0,
        }
    }

    #[must_use]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub(crate) fn conversation_mut(&mut self) -> &mut Conversation {
        &mut self.conversation
    }

    /// Records a user submission. User input reaches the engine from the
    /// host, not from the backend event stream.
    pub fn push_user_message(&mut self, text: impl Into<String>) -> String {
        self.user_seq += 1;
        let id = format!("user-{}", self.user_seq);
        self.conversation
            .push_message(Message::new(&id, Role::User, text));
        id
    }

    pub fn approve(&mut self, call_id: &str) -> Result<(), EngineFault> {
        self.approvals.approve(call_id)
    }

    pub fn deny(&mut self, call_id: &str) -> Result<(), EngineFault> {
        self.approvals.deny(call_id)
    }

    #[must_use]
    pub fn approval_state(&self, call_id: &str) -> Option<ApprovalState> {
        self.approvals.state(call_id)
    }

    /// Cancels aggregation silently and drops all transient state. Archive
    /// and delete paths; safe mid-stream.
    pub fn teardown(&mut self) {
        self.aggregator.freeze_all(&mut self.conversation);
        self.router.prune();
        self.approvals.prune();
    }

    /// Reduces one decoded event into conversation state. Returns the
    /// faults raised while doing so; the stream always continues.
    pub fn apply(&mut self, event: &CodexEvent) -> Vec<EngineFault> {
        let mut faults = Vec::new();

        match &event.msg {
            EventMsg::SessionConfigured {
                session_id, model, ..
            } => {
                if !self.conversation.bind(session_id, model) {
                    faults.push(EngineFault::ProtocolViolation {
                        detail: format!(
                            "session_configured for already-bound conversation '{}'",
                            self.conversation.id
                        ),
                    });
                }
            }
            EventMsg::TaskStarted => {
                self.aggregator.begin_turn();
            }
            EventMsg::TokenCount {
                cached_input_tokens,
                input_tokens,
                output_tokens,
                reasoning_output_tokens,
                total_tokens,
            } => {
                let usage = &mut self.conversation.token_usage;
                if let Some(value) = cached_input_tokens {
                    usage.cached_input_tokens = *value;
                }
                if let Some(value) = input_tokens {
                    usage.input_tokens = *value;
                }
                if let Some(value) = output_tokens {
                    usage.output_tokens = *value;
                }
                if let Some(value) = reasoning_output_tokens {
                    usage.reasoning_output_tokens = *value;
                }
                if let Some(value) = total_tokens {
                    usage.total_tokens = *value;
                }
            }
            EventMsg::TaskComplete {
                last_agent_message, ..
            } => {
                self.aggregator
                    .end_turn(last_agent_message.as_deref(), &mut self.conversation);
            }
            EventMsg::AgentMessage {
                message,
                last_agent_message,
            } => {
                let snapshot = message.as_deref().or(last_agent_message.as_deref());
                self.aggregator
                    .finalize_stream(StreamKind::Answer, snapshot, &mut self.conversation);
            }
            EventMsg::AgentMessageDelta { delta } => {
                faults.extend(self.aggregator.append_delta(
                    StreamKind::Answer,
                    delta,
                    &mut self.conversation,
                ));
            }
            EventMsg::AgentReasoning { reasoning, text } => {
                let snapshot = reasoning.as_deref().or(text.as_deref());
                self.aggregator.finalize_stream(
                    StreamKind::Reasoning,
                    snapshot,
                    &mut self.conversation,
                );
            }
            EventMsg::AgentReasoningDelta { delta }
            | EventMsg::AgentReasoningRawContentDelta { delta } => {
                faults.extend(self.aggregator.append_delta(
                    StreamKind::Reasoning,
                    delta,
                    &mut self.conversation,
                ));
            }
            EventMsg::AgentReasoningRawContent { content, text } => {
                let snapshot = content.as_deref().or(text.as_deref());
                self.aggregator.finalize_stream(
                    StreamKind::Reasoning,
                    snapshot,
                    &mut self.conversation,
                );
            }
            EventMsg::AgentReasoningSectionBreak => {
                self.aggregator.section_break(&mut self.conversation);
            }
            EventMsg::ExecApprovalRequest {
                call_id,
                command,
                cwd,
            } => {
                let request = ApprovalRequest {
                    id: call_id.clone(),
                    kind: ApprovalKind::Exec,
                    call_id: call_id.clone(),
                    command: Some(command.join(" ")),
                    cwd: Some(cwd.clone()),
                    patch: None,
                    files: Vec::new(),
                    changes: None,
                    reason: None,
                    grant_root: None,
                };
                faults.extend(self.approvals.request(request, &mut self.conversation));
            }
            EventMsg::PatchApprovalRequest { patch, files } => {
                // No wire call_id for plain patch approvals; synthesize one.
                let id = Uuid::new_v4().to_string();
                let request = ApprovalRequest {
                    id: id.clone(),
                    kind: ApprovalKind::Patch,
                    call_id: id,
                    command: None,
                    cwd: None,
                    patch: Some(patch.clone()),
                    files: files.clone(),
                    changes: None,
                    reason: None,
                    grant_root: None,
                };
                faults.extend(self.approvals.request(request, &mut self.conversation));
            }
            EventMsg::ApplyPatchApprovalRequest {
                call_id,
                changes,
                reason,
                grant_root,
            } => {
                let request = ApprovalRequest {
                    id: call_id.clone(),
                    kind: ApprovalKind::ApplyPatch,
                    call_id: call_id.clone(),
                    command: None,
                    cwd: None,
                    patch: None,
                    files: Vec::new(),
                    changes: Some(changes.clone()),
                    reason: reason.clone(),
                    grant_root: grant_root.clone(),
                };
                faults.extend(self.approvals.request(request, &mut self.conversation));
            }
            EventMsg::Error { message } => {
                self.push_note(format!("❌ Error: {message}"));
            }
            EventMsg::TurnComplete { .. } => {
                // Streams freeze; records that never closed stay open and
                // inert until teardown prunes them.
                self.aggregator.end_turn(None, &mut self.conversation);
            }
            EventMsg::ExecCommandBegin {
                call_id,
                command,
                cwd,
            } => {
                faults.extend(self.router.begin_exec(
                    call_id,
                    command,
                    cwd,
                    &mut self.conversation,
                ));
            }
            EventMsg::ExecCommandOutputDelta {
                call_id,
                stream,
                chunk,
            } => {
                faults.extend(self.router.append_output(call_id, stream, chunk));
            }
            EventMsg::ExecCommandEnd {
                call_id,
                stdout,
                stderr,
                exit_code,
            } => {
                faults.extend(self.router.end_exec(
                    call_id,
                    stdout,
                    stderr,
                    *exit_code,
                    &mut self.conversation,
                ));
            }
            EventMsg::McpToolCallBegin { invocation } => {
                faults.extend(
                    self.router
                        .begin_mcp_tool(invocation, &mut self.conversation),
                );
            }
            EventMsg::McpToolCallEnd {
                invocation,
                result,
                duration,
            } => {
                faults.extend(self.router.end_mcp_tool(
                    invocation,
                    result.as_ref(),
                    *duration,
                    &mut self.conversation,
                ));
            }
            EventMsg::WebSearchBegin { query } => {
                faults.extend(self.router.begin_web_search(query, &mut self.conversation));
            }
            EventMsg::WebSearchEnd { query, results } => {
                faults.extend(self.router.end_web_search(
                    query,
                    results.as_ref(),
                    &mut self.conversation,
                ));
            }
            EventMsg::PatchApplyBegin {
                changes,
                auto_approved,
            } => {
                faults.extend(self.router.begin_patch_apply(
                    changes,
                    auto_approved.unwrap_or(false),
                    &mut self.conversation,
                ));
            }
            EventMsg::PatchApplyEnd {
                success,
                stdout,
                stderr,
            } => {
                faults.extend(self.router.end_patch_apply(
                    *success,
                    stdout.as_deref(),
                    stderr.as_deref(),
                    &mut self.conversation,
                ));
            }
            EventMsg::PlanUpdate { explanation, plan } => {
                self.push_plan_update(explanation.as_deref(), plan);
            }
            EventMsg::ShutdownComplete => {
                self.aggregator.freeze_all(&mut self.conversation);
                self.push_note("Session shut down".to_owned());
            }
            EventMsg::BackgroundEvent { message } => {
                self.push_note(message.clone());
            }
            EventMsg::TurnDiff { unified_diff } => {
                self.push_turn_diff(unified_diff);
            }
            EventMsg::StreamError { message } => {
                self.abort_turn(&format!("stream error: {message}"));
                self.push_note(format!("⚠️ Stream error: {message}"));
                faults.push(EngineFault::StreamAbort {
                    reason: format!("stream error: {message}"),
                });
            }
            EventMsg::TurnAborted { reason } => {
                self.abort_turn(reason);
                self.push_note(format!("⛔ Turn aborted ({reason})"));
                faults.push(EngineFault::StreamAbort {
                    reason: reason.clone(),
                });
            }
            EventMsg::Unknown { event_type, .. } => {
                debug!(event_type, "unknown event type passed through");
            }
        }

        faults
    }

    fn abort_turn(&mut self, _reason: &str) {
        self.aggregator.freeze_all(&mut self.conversation);
        self.router.freeze_all(&mut self.conversation);
        self.approvals.invalidate_pending();
    }

    fn push_note(&mut self, content: String) {
        self.note_seq += 1;
        let id = format!("note-{}", self.note_seq);
        self.conversation
            .push_message(Message::new(id, Role::System, content));
    }

    fn push_plan_update(&mut self, explanation: Option<&str>, plan: &[PlanStep]) {
        self.plan_seq += 1;
        let id = format!(
            "turn-{}-plan-{}",
            self.aggregator.turn_seq(),
            self.plan_seq
        );

        let mut content = String::from("📋 Plan Updated");
        if let Some(explanation) = explanation.filter(|text| !text.is_empty()) {
            content.push('\n');
            content.push_str(explanation);
        }
        for step in plan {
            let glyph = match step.status {
                PlanStepStatus::Completed => "✅",
                PlanStepStatus::InProgress => "🔄",
                PlanStepStatus::Pending => "⏳",
            };
            content.push_str(&format!("\n{glyph} {}", step.step));
        }

        let mut message = Message::new(id, Role::System, content);
        message.title = Some("📋 Plan".to_owned());
        self.conversation.push_message(message);
    }

    fn push_turn_diff(&mut self, unified_diff: &str) {
        self.diff_seq += 1;
        let id = format!(
            "turn-{}-diff-{}",
            self.aggregator.turn_seq(),
            self.diff_seq
        );
        let content = format!("✏️ File Changes\n```diff\n{unified_diff}\n```");
        self.conversation
            .push_message(Message::new(id, Role::System, content));
    }
}
