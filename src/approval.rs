//! Tracks outstanding approval requests and their resolution.
//!
//! One state machine per `call_id`: `pending → approved | denied`, with
//! `invalidated` reachable from `pending` when the turn aborts. Resolution
//! is externally driven and idempotent: resolving anything not pending is a
//! no-op that reports a stale-approval fault.

use std::collections::HashMap;

use tracing::warn;

use crate::conversation::Conversation;
use crate::fault::EngineFault;
use crate::message::{ApprovalKind, ApprovalRequest, Message, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalState {
    Pending,
    Approved,
    Denied,
    Invalidated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Denied,
}

#[derive(Debug)]
struct TrackedApproval {
    request: ApprovalRequest,
    state: ApprovalState,
}

/// Conversation-scoped approval bookkeeping.
#[derive(Debug, Default)]
pub struct ApprovalCoordinator {
    tracked: HashMap<String, TrackedApproval>,
}

impl ApprovalCoordinator {
    /// Accepts a new request and surfaces it as an approval message. A
    /// second request for a call_id that is still pending is rejected
    /// without touching the original.
    pub fn request(
        &mut self,
        request: ApprovalRequest,
        conversation: &mut Conversation,
    ) -> Option<EngineFault> {
        let call_id = request.call_id.clone();
        if let Some(existing) = self.tracked.get(&call_id) {
            if existing.state == ApprovalState::Pending {
                warn!(call_id, "approval re-requested while pending; rejected");
                return Some(EngineFault::ProtocolViolation {
                    detail: format!("approval already pending for call '{call_id}'"),
                });
            }
        }

        let mut message = Message::new(
            format!("approval-{}", request.id),
            Role::Approval,
            describe_request(&request),
        );
        message.approval = Some(request.clone());
        conversation.push_message(message);

        self.tracked.insert(
            call_id,
            TrackedApproval {
                request,
                state: ApprovalState::Pending,
            },
        );
        None
    }

    pub fn approve(&mut self, call_id: &str) -> Result<(), EngineFault> {
        self.resolve(call_id, ApprovalDecision::Approved)
    }

    pub fn deny(&mut self, call_id: &str) -> Result<(), EngineFault> {
        self.resolve(call_id, ApprovalDecision::Denied)
    }

    /// Applies a user decision. Non-pending targets (already resolved,
    /// invalidated, or never requested) report a stale approval and leave
    /// state untouched.
    pub fn resolve(
        &mut self,
        call_id: &str,
        decision: ApprovalDecision,
    ) -> Result<(), EngineFault> {
        match self.tracked.get_mut(call_id) {
            Some(tracked) if tracked.state == ApprovalState::Pending => {
                tracked.state = match decision {
                    ApprovalDecision::Approved => ApprovalState::Approved,
                    ApprovalDecision::Denied => ApprovalState::Denied,
                };
                Ok(())
            }
            _ => {
                warn!(call_id, "stale approval resolution ignored");
                Err(EngineFault::StaleApproval {
                    call_id: call_id.to_owned(),
                })
            }
        }
    }

    /// Invalidates every pending request. Turn-abort path; invalidated
    /// requests are never resolvable afterwards.
    pub fn invalidate_pending(&mut self) {
        for tracked in self.tracked.values_mut() {
            if tracked.state == ApprovalState::Pending {
                tracked.state = ApprovalState::Invalidated;
            }
        }
    }

    #[must_use]
    pub fn state(&self, call_id: &str) -> Option<ApprovalState> {
        self.tracked.get(call_id).map(|tracked| tracked.state)
    }

    /// Pending requests in no particular order.
    pub fn pending(&self) -> impl Iterator<Item = &ApprovalRequest> {
        self.tracked
            .values()
            .filter(|tracked| tracked.state == ApprovalState::Pending)
            .map(|tracked| &tracked.request)
    }

    /// Drops all approval state. Conversation teardown path.
    pub fn prune(&mut self) {
        self.tracked.clear();
    }
}

fn describe_request(request: &ApprovalRequest) -> String {
    match request.kind {
        ApprovalKind::Exec => format!(
            "Approval required to run: {}",
            request.command.as_deref().unwrap_or("(unknown command)")
        ),
        ApprovalKind::Patch => format!(
            "Approval required to apply a patch touching {} file(s)",
            request.files.len()
        ),
        ApprovalKind::ApplyPatch => match &request.reason {
            Some(reason) => format!("Approval required to apply changes: {reason}"),
            None => "Approval required to apply changes".to_owned(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{ApprovalCoordinator, ApprovalState};
    use crate::conversation::Conversation;
    use crate::fault::EngineFault;
    use crate::message::{ApprovalKind, ApprovalRequest, Role};

    fn exec_request(call_id: &str) -> ApprovalRequest {
        ApprovalRequest {
            id: format!("req-{call_id}"),
            kind: ApprovalKind::Exec,
            call_id: call_id.to_owned(),
            command: Some("rm -rf x".to_owned()),
            cwd: Some("/work".to_owned()),
            patch: None,
            files: Vec::new(),
            changes: None,
            reason: None,
            grant_root: None,
        }
    }

    #[test]
    fn request_surfaces_an_approval_message() {
        let mut coordinator = ApprovalCoordinator::default();
        let mut conversation = Conversation::new("c1", "/work");

        assert!(coordinator
            .request(exec_request("9"), &mut conversation)
            .is_none());

        assert_eq!(coordinator.state("9"), Some(ApprovalState::Pending));
        let message = &conversation.messages()[0];
        assert_eq!(message.role, Role::Approval);
        assert!(message.approval.is_some());
        assert!(message.content.contains("rm -rf x"));
    }

    #[test]
    fn double_request_while_pending_is_rejected() {
        let mut coordinator = ApprovalCoordinator::default();
        let mut conversation = Conversation::new("c1", "/work");

        coordinator.request(exec_request("9"), &mut conversation);
        let fault = coordinator
            .request(exec_request("9"), &mut conversation)
            .expect("double request must fault");

        assert!(matches!(fault, EngineFault::ProtocolViolation { .. }));
        assert_eq!(conversation.messages().len(), 1);
    }

    #[test]
    fn second_resolution_reports_stale_approval() {
        let mut coordinator = ApprovalCoordinator::default();
        let mut conversation = Conversation::new("c1", "/work");

        coordinator.request(exec_request("9"), &mut conversation);
        coordinator.approve("9").expect("first resolution applies");
        assert_eq!(coordinator.state("9"), Some(ApprovalState::Approved));

        let fault = coordinator
            .approve("9")
            .expect_err("second resolution must be a no-op");
        assert!(matches!(fault, EngineFault::StaleApproval { .. }));
        assert_eq!(coordinator.state("9"), Some(ApprovalState::Approved));
    }

    #[test]
    fn invalidated_requests_are_never_resolvable() {
        let mut coordinator = ApprovalCoordinator::default();
        let mut conversation = Conversation::new("c1", "/work");

        coordinator.request(exec_request("9"), &mut conversation);
        coordinator.invalidate_pending();
        assert_eq!(coordinator.state("9"), Some(ApprovalState::Invalidated));

        assert!(coordinator.approve("9").is_err());
        assert!(coordinator.deny("9").is_err());
        assert_eq!(coordinator.state("9"), Some(ApprovalState::Invalidated));
    }

    #[test]
    fn re_request_after_resolution_is_allowed() {
        let mut coordinator = ApprovalCoordinator::default();
        let mut conversation = Conversation::new("c1", "/work");

        coordinator.request(exec_request("9"), &mut conversation);
        coordinator.deny("9").expect("deny applies");

        assert!(coordinator
            .request(exec_request("9"), &mut conversation)
            .is_none());
        assert_eq!(coordinator.state("9"), Some(ApprovalState::Pending));
    }

    #[test]
    fn resolving_unknown_call_is_stale() {
        let mut coordinator = ApprovalCoordinator::default();
        assert!(matches!(
            coordinator.approve("ghost"),
            Err(EngineFault::StaleApproval { .. })
        ));
    }
}
