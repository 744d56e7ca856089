use super::detector::{classify, AttemptOutcome};
use super::tier::{next_tier, requires_approval, ElevationPolicy, Tier};
use crate::approval::{ApprovalRequest, ApprovalResponse, TIER_ESCALATION};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EscalationError {
    /// Tiers only move forward along the chain.
    #[error("cannot move from tier {from} to {to}: escalation is forward-only")]
    NotForward { from: Tier, to: Tier },

    #[error("escalation chain already exhausted at tier {0}")]
    Exhausted(Tier),
}

/// Escalation progress of one attempt.
///
/// Persisted inside workflow state so a run resumed after an approval
/// round-trip continues at the tier it reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationState {
    pub current_tier: Tier,
    pub tier_history: Vec<Tier>,
    pub exhausted: bool,
}

impl EscalationState {
    pub fn new(start: Tier) -> Self {
        Self {
            current_tier: start,
            tier_history: vec![start],
            exhausted: false,
        }
    }

    /// Moves to `tier`, which must rank strictly above the current tier.
    pub fn advance(&mut self, tier: Tier) -> Result<(), EscalationError> {
        if self.exhausted {
            return Err(EscalationError::Exhausted(self.current_tier));
        }
        if tier <= self.current_tier {
            return Err(EscalationError::NotForward {
                from: self.current_tier,
                to: tier,
            });
        }
        self.current_tier = tier;
        self.tier_history.push(tier);
        Ok(())
    }

    /// Marks the attempt as out of options. Terminal.
    pub fn exhaust(&mut self) {
        self.exhausted = true;
    }
}

impl Default for EscalationState {
    fn default() -> Self {
        Self::new(Tier::Fast)
    }
}

/// What the caller should do after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "tier", rename_all = "snake_case")]
pub enum EscalationDecision {
    /// Output is usable; keep it.
    Accept,
    /// Retry at this tier. The state has already advanced.
    Escalate(Tier),
    /// Retry at this tier only after approval. The state has not advanced.
    AwaitApproval(Tier),
    /// No tier left to try.
    Exhausted,
}

/// Pure decision logic over [`EscalationState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EscalationController {
    policy: ElevationPolicy,
}

impl EscalationController {
    pub fn new(policy: ElevationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ElevationPolicy {
        self.policy
    }

    /// Decides whether to keep an attempt's output or escalate.
    pub fn evaluate(
        &self,
        state: &mut EscalationState,
        outcome: &AttemptOutcome,
    ) -> Result<EscalationDecision, EscalationError> {
        if state.exhausted {
            return Ok(EscalationDecision::Exhausted);
        }

        let Some(trigger) = classify(outcome) else {
            return Ok(EscalationDecision::Accept);
        };

        let current = state.current_tier;
        let Some(next) = next_tier(current, self.policy) else {
            warn!(
                "Escalation exhausted at tier {} (trigger={:?}, history={:?})",
                current, trigger, state.tier_history
            );
            state.exhaust();
            return Ok(EscalationDecision::Exhausted);
        };

        if requires_approval(current, next, self.policy) {
            info!(
                "Escalation from {} to gated tier {} awaits approval (trigger={:?})",
                current, next, trigger
            );
            return Ok(EscalationDecision::AwaitApproval(next));
        }

        debug!("Escalating from {} to {} (trigger={:?})", current, next, trigger);
        state.advance(next)?;
        Ok(EscalationDecision::Escalate(next))
    }

    /// Applies the decision of an approval round-trip for `tier`.
    pub fn apply_approval(
        &self,
        state: &mut EscalationState,
        tier: Tier,
        response: &ApprovalResponse,
    ) -> Result<EscalationDecision, EscalationError> {
        if !response.approved {
            info!(
                "Escalation to {} rejected: {}",
                tier,
                response.reason.as_deref().unwrap_or("no reason given")
            );
            state.exhaust();
            return Ok(EscalationDecision::Exhausted);
        }

        state.advance(tier)?;
        Ok(EscalationDecision::Escalate(tier))
    }

    /// Builds the approval payload for crossing into `tier`.
    pub fn approval_request(&self, state: &EscalationState, tier: Tier) -> ApprovalRequest {
        ApprovalRequest::new(
            TIER_ESCALATION,
            format!("escalate_to_{}", tier),
            format!(
                "Attempts up to tier {} produced unusable output. Retry on gated tier {}?",
                state.current_tier, tier
            ),
        )
        .with_context("from_tier", state.current_tier.as_str())
        .with_context("to_tier", tier.as_str())
        .with_context(
            "tier_history",
            state
                .tier_history
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>(),
        )
    }
}
