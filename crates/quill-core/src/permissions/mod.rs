//! Permission policy and approval flow for tool execution.
//!
//! Every action is classified before it runs: auto-approved, routed through
//! an [`ApprovalHandler`], or denied outright. Dangerous shell commands are
//! hard-denied regardless of policy or session grants.

pub mod safety;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::tools::ActionKind;

/// How an action class is treated before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    AutoApprove,
    RequireApproval,
    Deny,
}

/// The user's answer to an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// Run this one action.
    ApproveOnce,
    /// Run this action and auto-approve the same action kind for the rest
    /// of the session.
    ApproveForSession,
    /// Skip this action and let the model continue.
    Deny,
    /// Skip this action and interrupt the whole run.
    Stop,
}

/// A pending approval shown to the user.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub tool_use_id: String,
    pub kind: ActionKind,
    pub summary: String,
    /// Unified diff preview for file mutations, when one is available.
    pub diff: Option<String>,
}

/// Answers approval requests, typically by prompting the user.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn request_approval(&self, request: ApprovalRequest) -> ApprovalDecision;
}

/// Static policy mapping action kinds to permission levels.
///
/// Unknown kinds fall back to [`PermissionLevel::RequireApproval`]; the
/// policy never widens access by default.
#[derive(Debug, Clone)]
pub struct PermissionPolicy {
    overrides: HashMap<ActionKind, PermissionLevel>,
    /// Upgrade `RequireApproval` to `AutoApprove`. Never affects `Deny`.
    auto_approve_all: bool,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        let mut overrides = HashMap::new();
        for kind in ActionKind::all() {
            if kind.is_read_only() {
                overrides.insert(*kind, PermissionLevel::AutoApprove);
            }
        }
        Self {
            overrides,
            auto_approve_all: false,
        }
    }
}

impl PermissionPolicy {
    pub fn with_auto_approve_all(mut self, enabled: bool) -> Self {
        self.auto_approve_all = enabled;
        self
    }

    pub fn set_level(&mut self, kind: ActionKind, level: PermissionLevel) {
        self.overrides.insert(kind, level);
    }

    pub fn level_for(&self, kind: ActionKind) -> PermissionLevel {
        let base = self
            .overrides
            .get(&kind)
            .copied()
            .unwrap_or(PermissionLevel::RequireApproval);
        if self.auto_approve_all && base == PermissionLevel::RequireApproval {
            PermissionLevel::AutoApprove
        } else {
            base
        }
    }
}

/// Why an action may not run without (or at all despite) user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionCheck {
    Allowed,
    NeedsApproval,
    Denied(String),
}

/// Combines the static policy with mutable session state.
pub struct PermissionManager {
    policy: PermissionPolicy,
    session_grants: Mutex<HashSet<ActionKind>>,
}

impl PermissionManager {
    pub fn new(policy: PermissionPolicy) -> Self {
        Self {
            policy,
            session_grants: Mutex::new(HashSet::new()),
        }
    }

    /// Classify an action before execution. `command` is the shell command
    /// for [`ActionKind::ExecuteCommand`] actions so it can be screened for
    /// dangerous patterns.
    pub fn check(&self, kind: ActionKind, command: Option<&str>) -> PermissionCheck {
        if kind == ActionKind::ExecuteCommand {
            if let Some(cmd) = command {
                if let Some(reason) = safety::dangerous_command(cmd) {
                    warn!(kind = %kind, reason, "blocked dangerous command");
                    return PermissionCheck::Denied(format!("dangerous command: {reason}"));
                }
            }
        }

        match self.policy.level_for(kind) {
            PermissionLevel::Deny => {
                info!(kind = %kind, "action denied by policy");
                PermissionCheck::Denied("denied by policy".to_string())
            }
            PermissionLevel::AutoApprove => {
                debug!(kind = %kind, "action auto-approved by policy");
                PermissionCheck::Allowed
            }
            PermissionLevel::RequireApproval => {
                if self.session_grants.lock().contains(&kind) {
                    debug!(kind = %kind, "action auto-approved by session grant");
                    PermissionCheck::Allowed
                } else {
                    PermissionCheck::NeedsApproval
                }
            }
        }
    }

    /// Auto-approve an action kind for the rest of the session.
    pub fn grant_session(&self, kind: ActionKind) {
        info!(kind = %kind, "session grant added");
        self.session_grants.lock().insert(kind);
    }

    pub fn revoke_session(&self, kind: ActionKind) {
        self.session_grants.lock().remove(&kind);
    }

    pub fn reset_session(&self) {
        self.session_grants.lock().clear();
    }

    pub fn session_grants(&self) -> Vec<ActionKind> {
        let mut grants: Vec<_> = self.session_grants.lock().iter().copied().collect();
        grants.sort_by_key(|k| k.tool_name());
        grants
    }
}

/// Approves everything. Used by subagents, whose whole tool set is vetted
/// up front by the parent.
pub struct AutoApprover;

#[async_trait]
impl ApprovalHandler for AutoApprover {
    async fn request_approval(&self, _request: ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision::ApproveOnce
    }
}

/// Answers every request with a fixed decision. Test helper and building
/// block for non-interactive runs.
pub struct FixedApprover(pub ApprovalDecision);

#[async_trait]
impl ApprovalHandler for FixedApprover {
    async fn request_approval(&self, _request: ApprovalRequest) -> ApprovalDecision {
        self.0
    }
}

pub type SharedApprovalHandler = Arc<dyn ApprovalHandler>;
