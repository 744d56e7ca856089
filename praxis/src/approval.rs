//! Approval/interrupt channel.
//!
//! A node that needs a human decision suspends with an [`ApprovalRequest`]
//! and is re-entered with an [`ApprovalResponse`]. The same payload shape
//! serves every gated action (pushing to a remote, escalating into a gated
//! tier, accepting a generated plan), so callers handle approvals
//! generically and dispatch on `type` only for display.
//!
//! Wire shapes:
//!
//! ```text
//! request:  {"type": "...", "action": "...", "description": "...", <context fields>...}
//! response: {"approved": true|false, "reason": "..."?}
//! ```

use crate::core::CoreError;
use crate::workflow::{Interrupt, NodeContext, NodeOutput};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Approval kind for pushing changes to a remote repository.
pub const GIT_PUSH: &str = "git_push";
/// Approval kind for escalating into a gated execution tier.
pub const TIER_ESCALATION: &str = "tier_escalation";
/// Approval kind for accepting a generated execution plan.
pub const PLAN_APPROVAL: &str = "plan_approval";

/// Payload a node suspends with when it needs approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub action: String,
    pub description: String,
    /// Free-form fields flattened into the top-level payload.
    #[serde(flatten)]
    pub context: Map<String, Value>,
}

impl ApprovalRequest {
    pub fn new(
        kind: impl Into<String>,
        action: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            action: action.into(),
            description: description.into(),
            context: Map::new(),
        }
    }

    /// Adds a context field. Reserved keys (`type`, `action`, `description`) are ignored.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if !matches!(key.as_str(), "type" | "action" | "description") {
            self.context.insert(key, value.into());
        }
        self
    }
}

/// Value a suspended approval node is resumed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ApprovalResponse {
    pub fn approve() -> Self {
        Self {
            approved: true,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, CoreError> {
        Self::deserialize(value).map_err(CoreError::Deserialization)
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!(self)
    }
}

/// Result of consulting an approval gate from inside a node.
#[derive(Debug)]
pub enum GateDecision<D> {
    Approved,
    Rejected(Option<String>),
    /// No decision yet: return this output to suspend the node.
    Pending(NodeOutput<D>),
}

/// Asks for approval unless the node is being re-entered with a decision.
///
/// On first entry this yields [`GateDecision::Pending`] carrying a suspend
/// output; when the run is resumed, the resume value is decoded as an
/// [`ApprovalResponse`].
///
/// # Example
///
/// ```ignore
/// match approval_gate(ctx, ApprovalRequest::new(GIT_PUSH, "push", "Push branch fix/login"))? {
///     GateDecision::Approved => { /* push */ }
///     GateDecision::Rejected(reason) => { /* record and skip */ }
///     GateDecision::Pending(suspend) => return Ok(suspend),
/// }
/// ```
pub fn approval_gate<D>(
    ctx: &NodeContext,
    request: ApprovalRequest,
) -> Result<GateDecision<D>, CoreError> {
    match ctx.resume_value() {
        None => Ok(GateDecision::Pending(NodeOutput::Suspend(Interrupt::Approval {
            request,
        }))),
        Some(value) => {
            let response = ApprovalResponse::from_value(value)?;
            if response.approved {
                Ok(GateDecision::Approved)
            } else {
                Ok(GateDecision::Rejected(response.reason))
            }
        }
    }
}
