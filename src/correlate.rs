//! Multiplexes concurrent exec/tool/web-search units sharing one event
//! channel, keyed by correlation id.
//!
//! One open record per `call_id`: a `*_begin` opens it, output deltas append
//! to its byte buffers in arrival order, and the matching `*_end` closes it
//! and finalizes its message. Closed ids are immutable; events referencing
//! unknown or closed ids are dropped with a fault.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, warn};

use crate::conversation::Conversation;
use crate::fault::EngineFault;
use crate::message::{Message, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Exec,
    McpTool,
    WebSearch,
    PatchApply,
}

/// One in-flight unit of work.
#[derive(Debug)]
pub struct CorrelationRecord {
    pub call_id: String,
    pub kind: UnitKind,
    pub command: Vec<String>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    message_id: String,
}

/// Conversation-scoped routing state. Records that never close are inert and
/// reclaimed by [`CorrelationRouter::prune`] on teardown.
#[derive(Debug, Default)]
pub struct CorrelationRouter {
    open: HashMap<String, CorrelationRecord>,
    closed: HashSet<String>,
    unit_seq: u64,
}

const PATCH_APPLY_SLOT: &str = "patch-apply";

impl CorrelationRouter {
    pub fn begin_exec(
        &mut self,
        call_id: &str,
        command: &[String],
        cwd: &str,
        conversation: &mut Conversation,
    ) -> Option<EngineFault> {
        let content = format!("▶️ Executing: {}", command.join(" "));
        let message_id = format!("exec-{call_id}");
        self.open_unit(
            call_id,
            UnitKind::Exec,
            command.to_vec(),
            message_id,
            content,
            Some(cwd),
            conversation,
        )
    }

    pub fn append_output(
        &mut self,
        call_id: &str,
        stream: &str,
        chunk: &[u8],
    ) -> Option<EngineFault> {
        let Some(record) = self.open.get_mut(call_id) else {
            debug!(call_id, stream, "output delta for unknown or closed call dropped");
            return Some(EngineFault::UnknownCallId {
                call_id: call_id.to_owned(),
            });
        };

        match stream {
            "stderr" => record.stderr.extend_from_slice(chunk),
            _ => record.stdout.extend_from_slice(chunk),
        }
        None
    }

    pub fn end_exec(
        &mut self,
        call_id: &str,
        stdout: &str,
        stderr: &str,
        exit_code: i32,
        conversation: &mut Conversation,
    ) -> Option<EngineFault> {
        let record = match self.close_record(call_id) {
            Ok(record) => record,
            Err(fault) => return Some(fault),
        };

        // The end event's text is the authoritative snapshot; accumulated
        // deltas only fill in when it is empty.
        let stdout_text = pick_output(stdout, &record.stdout);
        let stderr_text = pick_output(stderr, &record.stderr);

        let mut tail = if exit_code == 0 {
            format!("\n✅ Command completed (exit {exit_code})")
        } else {
            format!("\n❌ Command failed (exit {exit_code})")
        };
        if !stdout_text.is_empty() {
            tail.push_str(&format!("\n```\n{stdout_text}\n```"));
        }
        if !stderr_text.is_empty() {
            tail.push_str(&format!("\nstderr:\n```\n{stderr_text}\n```"));
        }

        finalize_message(conversation, &record.message_id, &tail);
        None
    }

    pub fn begin_mcp_tool(
        &mut self,
        invocation: &Value,
        conversation: &mut Conversation,
    ) -> Option<EngineFault> {
        let call_id = invocation_key(invocation);
        // Synthetic keys recur across units; only wire call ids stay closed.
        if invocation.get("call_id").is_none() {
            self.closed.remove(&call_id);
        }
        let content = format!("🔧 {}", invocation_title(invocation));
        let message_id = format!("tool-{}", self.next_seq());
        self.open_unit(
            &call_id,
            UnitKind::McpTool,
            Vec::new(),
            message_id,
            content,
            None,
            conversation,
        )
    }

    pub fn end_mcp_tool(
        &mut self,
        invocation: &Value,
        result: Option<&Value>,
        duration: Option<u64>,
        conversation: &mut Conversation,
    ) -> Option<EngineFault> {
        let call_id = invocation_key(invocation);
        let record = match self.close_record(&call_id) {
            Ok(record) => record,
            Err(fault) => return Some(fault),
        };

        let mut tail = String::new();
        if let Some(result) = result {
            tail.push_str(&format!("\n→ {}", compact_json(result)));
        }
        if let Some(duration) = duration {
            tail.push_str(&format!("\n({duration}ms)"));
        }

        finalize_message(conversation, &record.message_id, &tail);
        None
    }

    pub fn begin_web_search(
        &mut self,
        query: &str,
        conversation: &mut Conversation,
    ) -> Option<EngineFault> {
        let call_id = web_search_key(query);
        // Query-derived key; repeating the same search opens a new unit.
        self.closed.remove(&call_id);
        let content = format!("Web Search: {query}");
        let message_id = format!("web-search-{}", self.next_seq());
        self.open_unit(
            &call_id,
            UnitKind::WebSearch,
            Vec::new(),
            message_id,
            content,
            None,
            conversation,
        )
    }

    pub fn end_web_search(
        &mut self,
        query: &str,
        results: Option<&Value>,
        conversation: &mut Conversation,
    ) -> Option<EngineFault> {
        let record = match self.close_record(&web_search_key(query)) {
            Ok(record) => record,
            Err(fault) => return Some(fault),
        };

        let tail = match results.and_then(result_count) {
            Some(count) => format!("\n{count} results"),
            None => "\ncompleted".to_owned(),
        };

        finalize_message(conversation, &record.message_id, &tail);
        None
    }

    pub fn begin_patch_apply(
        &mut self,
        changes: &Value,
        auto_approved: bool,
        conversation: &mut Conversation,
    ) -> Option<EngineFault> {
        // Single in-flight slot; a new patch apply reuses it after close.
        self.closed.remove(PATCH_APPLY_SLOT);
        let mut content = String::from("✏️ File Changes");
        if auto_approved {
            content.push_str(" (auto-approved)");
        }
        if let Some(files) = changes.as_object() {
            for file in files.keys() {
                content.push_str(&format!("\n• {file}"));
            }
        }

        let message_id = format!("patch-apply-{}", self.next_seq());
        self.open_unit(
            PATCH_APPLY_SLOT,
            UnitKind::PatchApply,
            Vec::new(),
            message_id,
            content,
            None,
            conversation,
        )
    }

    pub fn end_patch_apply(
        &mut self,
        success: bool,
        stdout: Option<&str>,
        stderr: Option<&str>,
        conversation: &mut Conversation,
    ) -> Option<EngineFault> {
        let record = match self.close_record(PATCH_APPLY_SLOT) {
            Ok(record) => record,
            Err(fault) => return Some(fault),
        };

        let mut tail = if success {
            String::from("\n✅ Patch applied")
        } else {
            String::from("\n❌ Patch failed")
        };
        if let Some(stdout) = stdout.filter(|text| !text.is_empty()) {
            tail.push_str(&format!("\n```\n{stdout}\n```"));
        }
        if let Some(stderr) = stderr.filter(|text| !text.is_empty()) {
            tail.push_str(&format!("\nstderr:\n```\n{stderr}\n```"));
        }

        finalize_message(conversation, &record.message_id, &tail);
        None
    }

    /// Finalizes every open record with a failure indicator and whatever
    /// output was captured. Used on turn abort and stream errors.
    pub fn freeze_all(&mut self, conversation: &mut Conversation) {
        let mut records: Vec<CorrelationRecord> = self.open.drain().map(|(_, r)| r).collect();
        records.sort_by(|a, b| a.message_id.cmp(&b.message_id));

        for record in records {
            let marker = match record.kind {
                UnitKind::Exec => "❌ Command aborted",
                UnitKind::McpTool => "❌ Tool call aborted",
                UnitKind::WebSearch => "❌ Search aborted",
                UnitKind::PatchApply => "❌ Patch aborted",
            };
            let mut tail = format!("\n{marker}");
            let stdout_text = String::from_utf8_lossy(&record.stdout);
            if !stdout_text.is_empty() {
                tail.push_str(&format!("\n```\n{stdout_text}\n```"));
            }

            finalize_message(conversation, &record.message_id, &tail);
            self.closed.insert(record.call_id);
        }
    }

    /// Drops all routing state without touching messages. Conversation
    /// teardown path.
    pub fn prune(&mut self) {
        self.open.clear();
        self.closed.clear();
    }

    #[must_use]
    pub fn is_open(&self, call_id: &str) -> bool {
        self.open.contains_key(call_id)
    }

    #[must_use]
    pub fn open_record(&self, call_id: &str) -> Option<&CorrelationRecord> {
        self.open.get(call_id)
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    #[allow(clippy::too_many_arguments)]
    fn open_unit(
        &mut self,
        call_id: &str,
        kind: UnitKind,
        command: Vec<String>,
        message_id: String,
        content: String,
        cwd: Option<&str>,
        conversation: &mut Conversation,
    ) -> Option<EngineFault> {
        if self.closed.contains(call_id) {
            debug!(call_id, "begin reusing a closed call ignored");
            return Some(EngineFault::UnknownCallId {
                call_id: call_id.to_owned(),
            });
        }
        if self.open.contains_key(call_id) {
            warn!(call_id, "duplicate begin for open call rejected");
            return Some(EngineFault::ProtocolViolation {
                detail: format!("duplicate begin for open call '{call_id}'"),
            });
        }

        let mut message = Message::streaming(&message_id, Role::System);
        message.content = content;
        message.working_directory = cwd.map(ToString::to_string);
        conversation.push_message(message);

        self.open.insert(
            call_id.to_owned(),
            CorrelationRecord {
                call_id: call_id.to_owned(),
                kind,
                command,
                stdout: Vec::new(),
                stderr: Vec::new(),
                message_id,
            },
        );
        None
    }

    fn close_record(&mut self, call_id: &str) -> Result<CorrelationRecord, EngineFault> {
        match self.open.remove(call_id) {
            Some(record) => {
                self.closed.insert(call_id.to_owned());
                Ok(record)
            }
            None => {
                debug!(call_id, "end event for unknown or closed call ignored");
                Err(EngineFault::UnknownCallId {
                    call_id: call_id.to_owned(),
                })
            }
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.unit_seq += 1;
        self.unit_seq
    }
}

fn finalize_message(conversation: &mut Conversation, message_id: &str, tail: &str) {
    if let Some(message) = conversation.message_mut(message_id) {
        message.content.push_str(tail);
        message.freeze();
    }
}

fn pick_output<'a>(snapshot: &'a str, accumulated: &[u8]) -> std::borrow::Cow<'a, str> {
    if snapshot.is_empty() {
        String::from_utf8_lossy(accumulated).into_owned().into()
    } else {
        snapshot.into()
    }
}

fn invocation_key(invocation: &Value) -> String {
    invocation
        .get("call_id")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("mcp:{}", compact_json(invocation)))
}

fn invocation_title(invocation: &Value) -> String {
    let tool = invocation
        .get("tool")
        .or_else(|| invocation.get("name"))
        .or_else(|| invocation.get("tool_name"))
        .and_then(Value::as_str)
        .unwrap_or("tool");

    match invocation.get("server").and_then(Value::as_str) {
        Some(server) => format!("{server}.{tool}"),
        None => tool.to_owned(),
    }
}

fn web_search_key(query: &str) -> String {
    format!("web-search:{query}")
}

fn result_count(results: &Value) -> Option<usize> {
    results
        .as_array()
        .map(Vec::len)
        .or_else(|| results.get("results").and_then(Value::as_array).map(Vec::len))
}

fn compact_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::CorrelationRouter;
    use crate::conversation::Conversation;
    use crate::fault::EngineFault;

    fn setup() -> (CorrelationRouter, Conversation) {
        (CorrelationRouter::default(), Conversation::new("c1", "/work"))
    }

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn exec_unit_accumulates_and_finalizes_one_message() {
        let (mut router, mut conversation) = setup();

        assert!(router
            .begin_exec("1", &cmd(&["ls"]), "/work", &mut conversation)
            .is_none());
        assert!(router.append_output("1", "stdout", b"a\n").is_none());
        assert!(router.append_output("1", "stdout", b"b\n").is_none());
        assert!(router
            .end_exec("1", "", "", 0, &mut conversation)
            .is_none());

        assert_eq!(conversation.messages().len(), 1);
        let message = &conversation.messages()[0];
        assert!(!message.is_streaming);
        assert!(message.content.contains("▶️ Executing: ls"));
        assert!(message.content.contains("✅ Command completed (exit 0)"));
        assert!(message.content.contains("a\nb\n"));
    }

    #[test]
    fn end_snapshot_supersedes_accumulated_output() {
        let (mut router, mut conversation) = setup();

        router.begin_exec("1", &cmd(&["cat", "x"]), "/work", &mut conversation);
        router.append_output("1", "stdout", b"partial");
        router.end_exec("1", "full contents", "", 0, &mut conversation);

        let message = &conversation.messages()[0];
        assert!(message.content.contains("full contents"));
        assert!(!message.content.contains("partial"));
    }

    #[test]
    fn duplicate_begin_never_mutates_the_open_record() {
        let (mut router, mut conversation) = setup();

        router.begin_exec("1", &cmd(&["ls"]), "/work", &mut conversation);
        router.append_output("1", "stdout", b"kept");

        let fault = router
            .begin_exec("1", &cmd(&["rm", "-rf"]), "/tmp", &mut conversation)
            .expect("duplicate begin must fault");
        assert!(matches!(fault, EngineFault::ProtocolViolation { .. }));

        let record = router.open_record("1").expect("record stays open");
        assert_eq!(record.command, cmd(&["ls"]));
        assert_eq!(record.stdout, b"kept");
        assert_eq!(conversation.messages().len(), 1);
    }

    #[test]
    fn deltas_for_unknown_or_closed_calls_are_dropped() {
        let (mut router, mut conversation) = setup();

        let fault = router
            .append_output("nope", "stdout", b"x")
            .expect("unknown call must fault");
        assert!(matches!(fault, EngineFault::UnknownCallId { .. }));

        router.begin_exec("9", &cmd(&["true"]), "/work", &mut conversation);
        router.end_exec("9", "", "", 0, &mut conversation);
        let frozen = conversation.messages()[0].content.clone();

        assert!(router.append_output("9", "stdout", b"late").is_some());
        assert!(router.end_exec("9", "late", "", 1, &mut conversation).is_some());
        assert_eq!(conversation.messages()[0].content, frozen);
    }

    #[test]
    fn failed_exec_surfaces_output_and_failure_indicator() {
        let (mut router, mut conversation) = setup();

        router.begin_exec("1", &cmd(&["make"]), "/work", &mut conversation);
        router.end_exec("1", "", "missing target", 2, &mut conversation);

        let message = &conversation.messages()[0];
        assert!(message.content.contains("❌ Command failed (exit 2)"));
        assert!(message.content.contains("missing target"));
    }

    #[test]
    fn mcp_tool_units_match_begin_to_end_by_invocation() {
        let (mut router, mut conversation) = setup();
        let invocation = json!({"server": "docs", "tool": "search", "call_id": "t1"});

        router.begin_mcp_tool(&invocation, &mut conversation);
        router.end_mcp_tool(
            &invocation,
            Some(&json!({"hits": 3})),
            Some(120),
            &mut conversation,
        );

        let message = &conversation.messages()[0];
        assert!(message.content.starts_with("🔧 docs.search"));
        assert!(message.content.contains("(120ms)"));
        assert!(!message.is_streaming);
    }

    #[test]
    fn web_search_units_key_by_query() {
        let (mut router, mut conversation) = setup();

        router.begin_web_search("rust atomics", &mut conversation);
        router.end_web_search(
            "rust atomics",
            Some(&json!([1, 2, 3])),
            &mut conversation,
        );

        let message = &conversation.messages()[0];
        assert!(message.content.contains("Web Search: rust atomics"));
        assert!(message.content.contains("3 results"));
    }

    #[test]
    fn freeze_all_finalizes_open_records_with_kind_markers() {
        let (mut router, mut conversation) = setup();

        router.begin_exec("1", &cmd(&["sleep", "60"]), "/work", &mut conversation);
        router.append_output("1", "stdout", b"tick");
        router.begin_web_search("rust atomics", &mut conversation);
        router.freeze_all(&mut conversation);

        assert_eq!(router.open_count(), 0);
        let exec = &conversation.messages()[0];
        assert!(!exec.is_streaming);
        assert!(exec.content.contains("❌ Command aborted"));
        assert!(exec.content.contains("tick"));

        let search = conversation
            .messages()
            .iter()
            .find(|message| message.content.contains("Web Search:"))
            .expect("search message frozen");
        assert!(search.content.contains("❌ Search aborted"));
    }

    #[test]
    fn begin_reusing_a_closed_call_id_is_ignored() {
        let (mut router, mut conversation) = setup();

        router.begin_exec("1", &cmd(&["ls"]), "/work", &mut conversation);
        router.end_exec("1", "ok", "", 0, &mut conversation);
        let frozen = conversation.messages()[0].content.clone();

        let fault = router
            .begin_exec("1", &cmd(&["rm", "-rf"]), "/work", &mut conversation)
            .expect("reused closed call must fault");
        assert!(matches!(fault, EngineFault::UnknownCallId { .. }));
        assert!(!router.is_open("1"));

        // The follow-up end has nothing to close either.
        assert!(router
            .end_exec("1", "boom", "", 1, &mut conversation)
            .is_some());
        assert_eq!(conversation.messages().len(), 1);
        assert_eq!(conversation.messages()[0].content, frozen);
    }

    #[test]
    fn synthetic_keys_reopen_after_close() {
        let (mut router, mut conversation) = setup();

        router.begin_web_search("rust atomics", &mut conversation);
        router.end_web_search("rust atomics", None, &mut conversation);
        assert!(router
            .begin_web_search("rust atomics", &mut conversation)
            .is_none());

        let changes = json!({"a.rs": {}});
        router.begin_patch_apply(&changes, false, &mut conversation);
        router.end_patch_apply(true, None, None, &mut conversation);
        assert!(router
            .begin_patch_apply(&changes, false, &mut conversation)
            .is_none());
    }
}
