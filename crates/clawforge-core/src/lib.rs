//! # clawforge-core
//!
//! Core building blocks for ClawForge, the client-side governance engine
//! embedded in each OpenClaw assistant process.
//!
//! This crate is deliberately free of I/O and async machinery. It provides
//! the pure pieces the runtime crate (`clawforge-agent`) assembles:
//!
//! - **Policy model and evaluation**: org policies, tool selectors, group
//!   expansion, and the synchronous decision engine that sits on the tool-call
//!   hot path
//! - **Audit events**: the immutable event record shipped to the control
//!   plane, plus the bounded in-memory buffer with oldest-first overflow
//! - **Connection tracking**: the heartbeat-outcome state machine
//! - **Session tokens**: the access/refresh token pair rotated by the agent
//!
//! ## Example
//!
//! ```rust
//! use clawforge_core::policy::engine::{self, KillSwitchState, OfflineOverride};
//! use clawforge_core::policy::{OrgPolicy, ToolRules, ToolSelector};
//!
//! let policy = OrgPolicy::new(
//!     7,
//!     ToolRules {
//!         allow: Vec::new(),
//!         deny: vec![ToolSelector::from("group:runtime")],
//!     },
//! );
//!
//! let verdict = engine::evaluate(
//!     Some(&policy),
//!     &KillSwitchState::default(),
//!     OfflineOverride::None,
//!     "bash",
//! );
//! assert!(!verdict.decision.is_allowed());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod audit;
pub mod config;
pub mod connection;
pub mod policy;
pub mod session;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::audit::{AuditEvent, EventDraft, EventKind, EventOutcome};
    pub use crate::config::{GovernanceConfig, OfflineMode};
    pub use crate::connection::{ConnectionFsm, ConnectionState, ConnectionStatus};
    pub use crate::policy::engine::{Decision, KillSwitchState, OfflineOverride, Verdict};
    pub use crate::policy::{AuditLevel, OrgPolicy, ToolRules, ToolSelector};
    pub use crate::session::SessionTokens;
}

pub use config::{GovernanceConfig, OfflineMode};
pub use connection::{ConnectionFsm, ConnectionState, ConnectionStatus};
pub use policy::{AuditLevel, OrgPolicy};
pub use session::SessionTokens;
