use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Progress state of one plan step as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStepStatus {
    Pending,
    InProgress,
    Completed,
}

impl PlanStepStatus {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "pending" => Self::Pending,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

/// One step of an agent-maintained plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step: String,
    pub status: PlanStepStatus,
}

/// Closed union of backend notifications, one variant active per event.
///
/// Discriminants match the backend wire protocol verbatim. Consumers switch
/// exhaustively; `Unknown` retains unrecognized discriminants inertly so new
/// backend event types never break existing clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventMsg {
    SessionConfigured {
        session_id: String,
        model: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        history_log_id: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        history_entry_count: Option<u64>,
    },
    TaskStarted,
    TokenCount {
        #[serde(default)]
        cached_input_tokens: Option<u64>,
        #[serde(default)]
        input_tokens: Option<u64>,
        #[serde(default)]
        output_tokens: Option<u64>,
        #[serde(default)]
        reasoning_output_tokens: Option<u64>,
        #[serde(default)]
        total_tokens: Option<u64>,
    },
    TaskComplete {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        last_agent_message: Option<String>,
    },
    AgentMessage {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        last_agent_message: Option<String>,
    },
    AgentMessageDelta {
        delta: String,
    },
    AgentReasoning {
        #[serde(default)]
        reasoning: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },
    AgentReasoningDelta {
        delta: String,
    },
    AgentReasoningRawContent {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },
    AgentReasoningRawContentDelta {
        delta: String,
    },
    AgentReasoningSectionBreak,
    ExecApprovalRequest {
        call_id: String,
        command: Vec<String>,
        cwd: String,
    },
    PatchApprovalRequest {
        patch: String,
        files: Vec<String>,
    },
    ApplyPatchApprovalRequest {
        call_id: String,
        changes: Value,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        grant_root: Option<String>,
    },
    Error {
        message: String,
    },
    TurnComplete {
        #[serde(default)]
        response_id: Option<String>,
    },
    ExecCommandBegin {
        call_id: String,
        command: Vec<String>,
        cwd: String,
    },
    ExecCommandOutputDelta {
        call_id: String,
        stream: String,
        chunk: Vec<u8>,
    },
    ExecCommandEnd {
        call_id: String,
        stdout: String,
        stderr: String,
        exit_code: i32,
    },
    McpToolCallBegin {
        invocation: Value,
    },
    McpToolCallEnd {
        invocation: Value,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        duration: Option<u64>,
    },
    WebSearchBegin {
        query: String,
    },
    WebSearchEnd {
        query: String,
        #[serde(default)]
        results: Option<Value>,
    },
    PatchApplyBegin {
        changes: Value,
        #[serde(default)]
        auto_approved: Option<bool>,
    },
    PatchApplyEnd {
        success: bool,
        #[serde(default)]
        stdout: Option<String>,
        #[serde(default)]
        stderr: Option<String>,
    },
    PlanUpdate {
        #[serde(default)]
        explanation: Option<String>,
        plan: Vec<PlanStep>,
    },
    ShutdownComplete,
    BackgroundEvent {
        message: String,
    },
    TurnDiff {
        unified_diff: String,
    },
    StreamError {
        message: String,
    },
    TurnAborted {
        reason: String,
    },
    /// Unrecognized event type retained for forward-compatible passthrough.
    #[serde(rename = "unknown")]
    Unknown {
        event_type: String,
        payload: Value,
    },
}

const KNOWN_EVENT_TYPES: &[&str] = &[
    "session_configured",
    "task_started",
    "token_count",
    "task_complete",
    "agent_message",
    "agent_message_delta",
    "agent_reasoning",
    "agent_reasoning_delta",
    "agent_reasoning_raw_content",
    "agent_reasoning_raw_content_delta",
    "agent_reasoning_section_break",
    "exec_approval_request",
    "patch_approval_request",
    "apply_patch_approval_request",
    "error",
    "turn_complete",
    "exec_command_begin",
    "exec_command_output_delta",
    "exec_command_end",
    "mcp_tool_call_begin",
    "mcp_tool_call_end",
    "web_search_begin",
    "web_search_end",
    "patch_apply_begin",
    "patch_apply_end",
    "plan_update",
    "shutdown_complete",
    "background_event",
    "turn_diff",
    "stream_error",
    "turn_aborted",
];

impl EventMsg {
    /// Returns whether `event_type` names a recognized wire discriminant.
    #[must_use]
    pub fn is_known_type(event_type: &str) -> bool {
        KNOWN_EVENT_TYPES.contains(&event_type)
    }

    /// Returns the wire discriminant for this variant.
    #[must_use]
    pub fn event_type(&self) -> &str {
        match self {
            Self::SessionConfigured { .. } => "session_configured",
            Self::TaskStarted => "task_started",
            Self::TokenCount { .. } => "token_count",
            Self::TaskComplete { .. } => "task_complete",
            Self::AgentMessage { .. } => "agent_message",
            Self::AgentMessageDelta { .. } => "agent_message_delta",
            Self::AgentReasoning { .. } => "agent_reasoning",
            Self::AgentReasoningDelta { .. } => "agent_reasoning_delta",
            Self::AgentReasoningRawContent { .. } => "agent_reasoning_raw_content",
            Self::AgentReasoningRawContentDelta { .. } => "agent_reasoning_raw_content_delta",
            Self::AgentReasoningSectionBreak => "agent_reasoning_section_break",
            Self::ExecApprovalRequest { .. } => "exec_approval_request",
            Self::PatchApprovalRequest { .. } => "patch_approval_request",
            Self::ApplyPatchApprovalRequest { .. } => "apply_patch_approval_request",
            Self::Error { .. } => "error",
            Self::TurnComplete { .. } => "turn_complete",
            Self::ExecCommandBegin { .. } => "exec_command_begin",
            Self::ExecCommandOutputDelta { .. } => "exec_command_output_delta",
            Self::ExecCommandEnd { .. } => "exec_command_end",
            Self::McpToolCallBegin { .. } => "mcp_tool_call_begin",
            Self::McpToolCallEnd { .. } => "mcp_tool_call_end",
            Self::WebSearchBegin { .. } => "web_search_begin",
            Self::WebSearchEnd { .. } => "web_search_end",
            Self::PatchApplyBegin { .. } => "patch_apply_begin",
            Self::PatchApplyEnd { .. } => "patch_apply_end",
            Self::PlanUpdate { .. } => "plan_update",
            Self::ShutdownComplete => "shutdown_complete",
            Self::BackgroundEvent { .. } => "background_event",
            Self::TurnDiff { .. } => "turn_diff",
            Self::StreamError { .. } => "stream_error",
            Self::TurnAborted { .. } => "turn_aborted",
            Self::Unknown { event_type, .. } => event_type,
        }
    }

}

/// Envelope wrapping one backend event with optional session routing info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodexEvent {
    #[serde(default)]
    pub id: String,
    pub msg: EventMsg,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl CodexEvent {
    #[must_use]
    pub fn new(msg: EventMsg) -> Self {
        Self {
            id: String::new(),
            msg,
            session_id: None,
        }
    }
}
