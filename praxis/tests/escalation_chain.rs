//! Walking the tier chain the way an agent loop drives it.

use praxis::approval::{ApprovalResponse, TIER_ESCALATION};
use praxis::escalation::{
    AttemptOutcome, ElevationPolicy, EscalationController, EscalationDecision, EscalationState, Tier,
};

const UNUSABLE: &str = "ok";
const USABLE: &str = "Refactored the retry loop and added a regression test for the timeout path.";

/// Feeds the controller unusable output until it stops escalating.
fn escalate_until_blocked(
    controller: &EscalationController,
    state: &mut EscalationState,
) -> EscalationDecision {
    loop {
        let decision = controller
            .evaluate(state, &AttemptOutcome::new(UNUSABLE))
            .unwrap();
        if !matches!(decision, EscalationDecision::Escalate(_)) {
            return decision;
        }
    }
}

#[test]
fn test_deny_policy_stops_at_unrestricted_chain_end() {
    let controller = EscalationController::new(ElevationPolicy::Deny);
    let mut state = EscalationState::default();

    assert_eq!(escalate_until_blocked(&controller, &mut state), EscalationDecision::Exhausted);
    assert_eq!(state.current_tier, Tier::XLarge);
    assert_eq!(state.tier_history, Tier::UNRESTRICTED.to_vec());
    assert!(state.exhausted);

    // Exhaustion is terminal, even for good output.
    assert_eq!(
        controller.evaluate(&mut state, &AttemptOutcome::new(USABLE)).unwrap(),
        EscalationDecision::Exhausted
    );
}

#[test]
fn test_approval_round_trip_into_gated_chain() {
    let controller = EscalationController::new(ElevationPolicy::RequireApproval);
    let mut state = EscalationState::new(Tier::Large);

    assert_eq!(
        escalate_until_blocked(&controller, &mut state),
        EscalationDecision::AwaitApproval(Tier::Cloud)
    );
    assert_eq!(state.current_tier, Tier::XLarge);

    let request = controller.approval_request(&state, Tier::Cloud);
    assert_eq!(request.kind, TIER_ESCALATION);
    assert_eq!(request.context["to_tier"], "cloud");

    // The state survives a persist/resume cycle while approval is pending.
    let persisted = serde_json::to_value(&state).unwrap();
    let mut state: EscalationState = serde_json::from_value(persisted).unwrap();

    assert_eq!(
        controller
            .apply_approval(&mut state, Tier::Cloud, &ApprovalResponse::approve())
            .unwrap(),
        EscalationDecision::Escalate(Tier::Cloud)
    );

    // Within the gated chain no further approval is needed.
    assert_eq!(
        controller.evaluate(&mut state, &AttemptOutcome::new(UNUSABLE)).unwrap(),
        EscalationDecision::Escalate(Tier::CloudPremium)
    );
    assert_eq!(
        controller.evaluate(&mut state, &AttemptOutcome::new(UNUSABLE)).unwrap(),
        EscalationDecision::Exhausted
    );
    assert_eq!(
        state.tier_history,
        vec![Tier::Large, Tier::XLarge, Tier::Cloud, Tier::CloudPremium]
    );
}

#[test]
fn test_rejected_approval_exhausts() {
    let controller = EscalationController::new(ElevationPolicy::RequireApproval);
    let mut state = EscalationState::new(Tier::XLarge);

    assert_eq!(
        controller.evaluate(&mut state, &AttemptOutcome::new(UNUSABLE)).unwrap(),
        EscalationDecision::AwaitApproval(Tier::Cloud)
    );
    assert_eq!(
        controller
            .apply_approval(&mut state, Tier::Cloud, &ApprovalResponse::reject("budget"))
            .unwrap(),
        EscalationDecision::Exhausted
    );
    assert!(state.exhausted);
    assert_eq!(state.current_tier, Tier::XLarge);
}

#[test]
fn test_preauthorized_policy_crosses_without_asking() {
    let controller = EscalationController::new(ElevationPolicy::PreAuthorized);
    let mut state = EscalationState::new(Tier::XLarge);

    assert_eq!(
        controller
            .evaluate(&mut state, &AttemptOutcome::new("I'm unable to complete that request."))
            .unwrap(),
        EscalationDecision::Escalate(Tier::Cloud)
    );
    assert_eq!(
        controller.evaluate(&mut state, &AttemptOutcome::new(USABLE)).unwrap(),
        EscalationDecision::Accept
    );
    assert_eq!(state.current_tier, Tier::Cloud);
}
