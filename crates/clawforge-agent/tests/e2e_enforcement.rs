//! End-to-end enforcement scenarios over the wired components.
//!
//! No live control plane: heartbeat outcomes are applied through the same
//! methods the probe task uses, and audit events are inspected by flushing
//! to the durable buffer (the no-control-plane path) and reading it back.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use clawforge_agent::audit::{AuditPipeline, DurableAuditBuffer};
use clawforge_agent::client::{ClientError, HeartbeatResponse};
use clawforge_agent::enforcer::Enforcer;
use clawforge_agent::heartbeat::{Heartbeat, OFFLINE_BLOCK_MESSAGE};
use clawforge_agent::paths::ConfigRoot;
use clawforge_agent::state::EnforcerState;
use clawforge_agent::GovernanceEngine;
use clawforge_core::audit::{AuditEvent, EventKind, EventOutcome};
use clawforge_core::config::{GovernanceConfig, OfflineMode};
use clawforge_core::connection::{ConnectionFsm, ConnectionState};
use clawforge_core::policy::engine::Decision;
use clawforge_core::policy::{AuditLevel, OrgPolicy, ToolRules, ToolSelector};
use clawforge_core::session::SessionTokens;
use secrecy::SecretString;

fn session() -> SessionTokens {
    SessionTokens {
        access_token: SecretString::new("access-token".to_string()),
        refresh_token: None,
        expires_at_ms: i64::MAX,
        user_id: "user-1".to_string(),
        org_id: Some("org-1".to_string()),
    }
}

fn policy(allow: &[&str], deny: &[&str]) -> OrgPolicy {
    OrgPolicy::new(
        1,
        ToolRules {
            allow: allow.iter().map(|s| ToolSelector::from(*s)).collect(),
            deny: deny.iter().map(|s| ToolSelector::from(*s)).collect(),
        },
    )
}

/// The wired governance components, minus live HTTP.
struct Harness {
    dir: tempfile::TempDir,
    fsm: Arc<Mutex<ConnectionFsm>>,
    pipeline: AuditPipeline,
    enforcer: Enforcer,
    heartbeat: Heartbeat,
}

impl Harness {
    fn new(config: GovernanceConfig, initial_policy: Option<OrgPolicy>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = Arc::new(match initial_policy {
            Some(policy) => EnforcerState::with_policy(policy),
            None => EnforcerState::new(),
        });
        let fsm = Arc::new(Mutex::new(ConnectionFsm::new(
            config.heartbeat_failure_threshold,
        )));
        let pipeline = AuditPipeline::new(
            &config,
            "user-1",
            "org-1",
            DurableAuditBuffer::new(dir.path().join("audit-buffer.jsonl")),
            None,
            SecretString::new("access-token".to_string()),
            AuditLevel::Full,
        );
        let enforcer = Enforcer::new(Arc::clone(&state), pipeline.handle());
        let heartbeat = Heartbeat::new(
            &config,
            None,
            Arc::clone(&state),
            Arc::clone(&fsm),
            pipeline.handle(),
            "user-1",
            "org-1",
            SecretString::new("access-token".to_string()),
            None,
        );

        Self {
            dir,
            fsm,
            pipeline,
            enforcer,
            heartbeat,
        }
    }

    fn heartbeat_error(&self) {
        self.heartbeat
            .apply_failure(&ClientError::Status { status: 503 });
    }

    fn heartbeat_ok(&self) {
        self.heartbeat.apply_success(&HeartbeatResponse {
            policy_version: 1,
            kill_switch: false,
            kill_switch_message: None,
            refresh_policy_now: false,
        });
    }

    /// Flush to disk and read back every buffered event.
    async fn events(&self) -> Vec<AuditEvent> {
        self.pipeline.flush().await;
        DurableAuditBuffer::new(self.dir.path().join("audit-buffer.jsonl")).load()
    }
}

#[tokio::test]
async fn deny_list_blocks_exec_via_alias() -> Result<()> {
    let harness = Harness::new(GovernanceConfig::default(), Some(policy(&[], &["exec"])));

    let decision = harness.enforcer.authorize("bash", None, Some("sess-1"));
    assert_eq!(
        decision,
        Decision::Block("tool is blocked by org policy".to_string())
    );

    let events = harness.events().await;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.kind, EventKind::ToolCallAttempt);
    assert_eq!(event.outcome, EventOutcome::Blocked);
    assert_eq!(event.tool_name.as_deref(), Some("exec"));
    assert_eq!(event.reason.as_deref(), Some("deny_list"));
    assert_eq!(event.session_key.as_deref(), Some("sess-1"));
    Ok(())
}

#[tokio::test]
async fn group_allow_list_admits_fs_read() -> Result<()> {
    let harness = Harness::new(GovernanceConfig::default(), Some(policy(&["group:fs"], &[])));

    let decision = harness.enforcer.authorize("read", Some("agent-7"), None);
    assert_eq!(decision, Decision::Allow);

    let events = harness.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, EventOutcome::Allowed);
    assert_eq!(events[0].reason.as_deref(), Some("allow_list"));
    assert_eq!(events[0].agent_id.as_deref(), Some("agent-7"));
    Ok(())
}

#[tokio::test]
async fn kill_switch_overrides_allow_listed_tool() -> Result<()> {
    let harness = Harness::new(GovernanceConfig::default(), Some(policy(&["read"], &[])));

    harness.heartbeat.apply_success(&HeartbeatResponse {
        policy_version: 1,
        kill_switch: true,
        kill_switch_message: Some("freeze".to_string()),
        refresh_policy_now: false,
    });

    let decision = harness.enforcer.authorize("read", None, None);
    assert_eq!(decision, Decision::Block("freeze".to_string()));

    let events = harness.events().await;
    // One kill-switch activation event, then the blocked tool call.
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, EventKind::KillSwitchActivated);
    assert_eq!(events[1].reason.as_deref(), Some("kill_switch"));
    assert_eq!(events[1].outcome, EventOutcome::Blocked);
    Ok(())
}

#[tokio::test]
async fn offline_block_mode_denies_everything() -> Result<()> {
    let config = GovernanceConfig {
        heartbeat_failure_threshold: 2,
        offline_mode: OfflineMode::Block,
        ..GovernanceConfig::default()
    };
    let harness = Harness::new(config, Some(policy(&[], &[])));

    harness.heartbeat_error();
    harness.heartbeat_error();

    assert_eq!(
        harness.fsm.lock().unwrap().state(),
        ConnectionState::Offline
    );

    let decision = harness.enforcer.authorize("read", None, None);
    assert_eq!(decision, Decision::Block(OFFLINE_BLOCK_MESSAGE.to_string()));

    let events = harness.events().await;
    let blocked: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::ToolCallAttempt)
        .collect();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].reason.as_deref(), Some("kill_switch"));
    Ok(())
}

#[tokio::test]
async fn offline_allow_mode_recovers_on_success() -> Result<()> {
    let config = GovernanceConfig {
        heartbeat_failure_threshold: 2,
        offline_mode: OfflineMode::Allow,
        ..GovernanceConfig::default()
    };
    let harness = Harness::new(config, Some(policy(&[], &["exec"])));

    harness.heartbeat_error();
    harness.heartbeat_error();

    // Offline allow: even a denied tool passes, tagged with the override.
    let decision = harness.enforcer.authorize("exec", None, None);
    assert_eq!(decision, Decision::Allow);

    // Recovery clears the override and normal enforcement resumes.
    harness.heartbeat_ok();
    assert_eq!(
        harness.fsm.lock().unwrap().state(),
        ConnectionState::Connected
    );
    let decision = harness.enforcer.authorize("exec", None, None);
    assert!(matches!(decision, Decision::Block(_)));

    let events = harness.events().await;
    let reasons: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::ToolCallAttempt)
        .map(|e| e.reason.clone().unwrap())
        .collect();
    assert_eq!(reasons, vec!["offline_allow_mode", "deny_list"]);
    Ok(())
}

#[tokio::test]
async fn every_authorize_enqueues_exactly_one_matching_event() -> Result<()> {
    let harness = Harness::new(
        GovernanceConfig::default(),
        Some(policy(&["group:fs"], &["group:runtime"])),
    );

    let calls = [
        ("read", EventOutcome::Allowed),
        ("bash", EventOutcome::Blocked),
        ("web_search", EventOutcome::Blocked),
        ("WRITE", EventOutcome::Allowed),
    ];
    for (tool, _) in &calls {
        let _ = harness.enforcer.authorize(tool, None, None);
    }

    let events = harness.events().await;
    assert_eq!(events.len(), calls.len());
    for (event, (_, outcome)) in events.iter().zip(&calls) {
        assert_eq!(event.kind, EventKind::ToolCallAttempt);
        assert_eq!(event.outcome, *outcome);
    }

    // Shipped in enqueue order.
    let seqs: Vec<u64> = events.iter().map(|e| e.enqueue_seq).collect();
    let mut sorted = seqs.clone();
    sorted.sort_unstable();
    assert_eq!(seqs, sorted);
    Ok(())
}

#[tokio::test]
async fn engine_wires_policy_and_enforcer() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = ConfigRoot::at(dir.path());

    let engine = GovernanceEngine::new(GovernanceConfig::default(), session(), &root, None, None)?;

    // No policy yet: fail open.
    assert_eq!(engine.enforcer().authorize("exec", None, None), Decision::Allow);

    assert!(engine.apply_policy(policy(&[], &["group:runtime"])));
    assert!(matches!(
        engine.enforcer().authorize("exec", None, None),
        Decision::Block(_)
    ));

    // Stale policy is discarded.
    assert!(!engine.apply_policy(OrgPolicy::new(0, ToolRules::default())));

    let status = engine.status();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.consecutive_failures, 0);
    assert!(status.cached_policy_age_ms.is_some());

    engine.stop().await;
    Ok(())
}
