//! Tool-call enforcement hot path.
//!
//! [`Enforcer::authorize`] runs inline on the host assistant's call stack
//! for every tool invocation. It takes one consistent snapshot of the
//! enforcement state, evaluates it with the pure decision engine, and
//! enqueues exactly one audit event whose outcome matches the decision.
//! There is no I/O, no await, and no panic on this path.

use std::sync::Arc;

use clawforge_core::audit::{EventDraft, EventKind};
use clawforge_core::policy::engine::{self, Decision};

use crate::audit::AuditHandle;
use crate::state::EnforcerState;

/// Synchronous authorizer for tool invocations.
#[derive(Debug)]
pub struct Enforcer {
    state: Arc<EnforcerState>,
    audit: AuditHandle,
}

impl Enforcer {
    /// Create an enforcer over the shared state and audit pipeline.
    #[must_use]
    pub const fn new(state: Arc<EnforcerState>, audit: AuditHandle) -> Self {
        Self { state, audit }
    }

    /// Authorize one tool invocation.
    ///
    /// Never blocks and never fails: any unexpected condition resolves to
    /// `Allow` with the `no_policy` reason rather than crashing the host.
    #[must_use]
    pub fn authorize(
        &self,
        tool_name: &str,
        agent_id: Option<&str>,
        session_key: Option<&str>,
    ) -> Decision {
        let snapshot = self.state.load();
        let verdict = engine::evaluate(
            snapshot.policy.as_ref(),
            &snapshot.kill_switch,
            snapshot.offline_override,
            tool_name,
        );

        let mut draft = EventDraft::new(EventKind::ToolCallAttempt, verdict.outcome())
            .with_tool_name(verdict.tool_name.clone())
            .with_reason(verdict.reason.as_str());
        if let Some(agent_id) = agent_id {
            draft = draft.with_agent_id(agent_id);
        }
        if let Some(session_key) = session_key {
            draft = draft.with_session_key(session_key);
        }
        if let Decision::Block(message) = &verdict.decision {
            draft = draft.with_metadata("blockMessage", serde_json::json!(message));
        }
        self.audit.enqueue(draft);

        verdict.decision
    }
}
