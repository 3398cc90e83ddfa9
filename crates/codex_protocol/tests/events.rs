use codex_protocol::{decode_event, EventMsg, PlanStepStatus};
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn plan_step_status_from_str_parity() {
    assert_eq!(
        PlanStepStatus::parse("pending"),
        Some(PlanStepStatus::Pending)
    );
    assert_eq!(
        PlanStepStatus::parse("in_progress"),
        Some(PlanStepStatus::InProgress)
    );
    assert_eq!(
        PlanStepStatus::parse("completed"),
        Some(PlanStepStatus::Completed)
    );
    assert_eq!(PlanStepStatus::parse("done"), None);
}

#[test]
fn session_configured_round_trips_with_envelope() {
    let raw = json!({
        "id": "ev-7",
        "session_id": "sess-abc",
        "msg": {
            "type": "session_configured",
            "session_id": "sess-abc",
            "model": "gpt-5-codex",
            "history_entry_count": 12
        }
    });

    let event = decode_event(&raw).expect("decode session_configured");
    assert_eq!(event.id, "ev-7");
    assert_eq!(event.session_id.as_deref(), Some("sess-abc"));
    assert_eq!(
        event.msg,
        EventMsg::SessionConfigured {
            session_id: "sess-abc".to_owned(),
            model: "gpt-5-codex".to_owned(),
            history_log_id: None,
            history_entry_count: Some(12),
        }
    );
}

#[test]
fn exec_lifecycle_variants_carry_call_id() {
    let begin = decode_event(&json!({
        "msg": {
            "type": "exec_command_begin",
            "call_id": "call-1",
            "command": ["ls", "-la"],
            "cwd": "/tmp"
        }
    }))
    .expect("decode exec begin");

    let delta = decode_event(&json!({
        "msg": {
            "type": "exec_command_output_delta",
            "call_id": "call-1",
            "stream": "stdout",
            "chunk": [104, 105]
        }
    }))
    .expect("decode exec output delta");

    let end = decode_event(&json!({
        "msg": {
            "type": "exec_command_end",
            "call_id": "call-1",
            "stdout": "hi",
            "stderr": "",
            "exit_code": 0
        }
    }))
    .expect("decode exec end");

    assert_eq!(
        begin.msg,
        EventMsg::ExecCommandBegin {
            call_id: "call-1".to_owned(),
            command: vec!["ls".to_owned(), "-la".to_owned()],
            cwd: "/tmp".to_owned(),
        }
    );
    assert_eq!(
        delta.msg,
        EventMsg::ExecCommandOutputDelta {
            call_id: "call-1".to_owned(),
            stream: "stdout".to_owned(),
            chunk: vec![104, 105],
        }
    );
    assert_eq!(
        end.msg,
        EventMsg::ExecCommandEnd {
            call_id: "call-1".to_owned(),
            stdout: "hi".to_owned(),
            stderr: String::new(),
            exit_code: 0,
        }
    );
}

#[test]
fn plan_update_steps_preserve_status_order() {
    let event = decode_event(&json!({
        "msg": {
            "type": "plan_update",
            "explanation": null,
            "plan": [
                { "step": "read files", "status": "completed" },
                { "step": "apply patch", "status": "in_progress" },
                { "step": "run tests", "status": "pending" }
            ]
        }
    }))
    .expect("decode plan update");

    match event.msg {
        EventMsg::PlanUpdate { explanation, plan } => {
            assert_eq!(explanation, None);
            let statuses: Vec<_> = plan.iter().map(|step| step.status).collect();
            assert_eq!(
                statuses,
                vec![
                    PlanStepStatus::Completed,
                    PlanStepStatus::InProgress,
                    PlanStepStatus::Pending,
                ]
            );
        }
        other => panic!("expected plan update, got {other:?}"),
    }
}

#[test]
fn every_known_discriminant_is_reported_by_event_type() {
    let samples = [
        json!({ "type": "task_started" }),
        json!({ "type": "agent_reasoning_section_break" }),
        json!({ "type": "shutdown_complete" }),
        json!({ "type": "turn_diff", "unified_diff": "--- a\n+++ b\n" }),
        json!({ "type": "background_event", "message": "indexing" }),
    ];

    for body in samples {
        let expected = body["type"].as_str().unwrap().to_owned();
        let event = decode_event(&json!({ "msg": body })).expect("decode sample");
        assert_eq!(event.msg.event_type(), expected);
    }
}
