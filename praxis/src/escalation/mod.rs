//! Tiered escalation controller.
//!
//! Walks an ordered chain of execution strategies from cheap and fast to
//! expensive and capable whenever an attempt's output is unusable. Leaving
//! the unrestricted chain for the gated one is governed by an
//! [`ElevationPolicy`] and, unless pre-authorized, by an approval
//! round-trip through the workflow state machine.
//!
//! Escalation tracks tiers only; it has no notion of cost.
//!
//! # Example
//!
//! ```
//! use praxis::escalation::{
//!     AttemptOutcome, EscalationController, EscalationDecision, EscalationState, ElevationPolicy, Tier,
//! };
//!
//! let controller = EscalationController::new(ElevationPolicy::Deny);
//! let mut state = EscalationState::new(Tier::Fast);
//!
//! let decision = controller.evaluate(&mut state, &AttemptOutcome::new("")).unwrap();
//! assert_eq!(decision, EscalationDecision::Escalate(Tier::Standard));
//! ```

mod controller;
mod detector;
mod tier;

pub use controller::{EscalationController, EscalationDecision, EscalationError, EscalationState};
pub use detector::{
    classify, needs_escalation, AttemptOutcome, EscalationTrigger, MALFORMED_THRESHOLD,
    MIN_OUTPUT_CHARS,
};
pub use tier::{next_tier, requires_approval, ElevationPolicy, Tier};
