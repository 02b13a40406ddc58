//! Six-factor Authorization Engine (§4.2).
//!
//! `authorize` evaluates all six factors independently and never
//! short-circuits: every failing factor contributes a reason, so operators
//! can see the full picture of why an action was denied. The only
//! authoritative "yes" is all six factors passing.

mod policy;
mod rank;

pub use policy::{AlwaysCompliant, DoctrineAdapter, DoctrineVerdict, ExternalPolicyClient, PolicyOutcome};
pub use rank::OfficerRank;

use aether_core::{AgentId, AgentProfile, CategoryPolicy, CycleId, CycleSchedule, Decision, InformationCategory, Phase};
use std::collections::HashMap;

/// One privileged action submitted for authorization.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub action: String,
    /// Information categories this action touches (factor 3). Empty if the
    /// action doesn't read or write categorized information.
    pub categories: Vec<InformationCategory>,
    /// Set when the action is performed on behalf of another agent
    /// (factor 4).
    pub on_behalf_of: Option<AgentId>,
    /// Depth of the delegation chain this action is part of. A direct
    /// action has depth 0; one hop of delegation is depth 1.
    pub delegation_depth: u8,
    /// Marks an emergency reallocation, which additionally requires
    /// `approved_by_rank` (§4.2 edge policy).
    pub emergency_reallocation: bool,
    pub approved_by_rank: Option<OfficerRank>,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            categories: Vec::new(),
            on_behalf_of: None,
            delegation_depth: 0,
            emergency_reallocation: false,
            approved_by_rank: None,
        }
    }

    pub fn touching(mut self, categories: impl IntoIterator<Item = InformationCategory>) -> Self {
        self.categories = categories.into_iter().collect();
        self
    }

    pub fn on_behalf_of(mut self, agent: AgentId, depth: u8) -> Self {
        self.on_behalf_of = Some(agent);
        self.delegation_depth = depth;
        self
    }

    pub fn emergency(mut self, approved_by_rank: Option<OfficerRank>) -> Self {
        self.emergency_reallocation = true;
        self.approved_by_rank = approved_by_rank;
        self
    }
}

/// Maximum delegation chain depth before factor 4 fails (§4.2: "delegation
/// depth ≤ 1").
pub const MAX_DELEGATION_DEPTH: u8 = 1;

/// The minimum officer rank required to approve an emergency reallocation
/// (§4.2 edge policy: "approved_by_rank ≥ O-5").
pub const MIN_EMERGENCY_APPROVAL_RANK: OfficerRank = OfficerRank(5);

/// Evaluate all six factors for `request` and return the combined
/// [`Decision`]. `policies` is keyed by category so factor 3 can look up
/// `min_level`/`phase_restricted` without a linear scan per call.
pub async fn authorize(
    profile: &AgentProfile,
    policies: &HashMap<InformationCategory, CategoryPolicy>,
    schedule: &CycleSchedule,
    current_phase: Phase,
    cycle_id: CycleId,
    request: &ActionRequest,
    doctrine: &dyn DoctrineAdapter,
    external: &ExternalPolicyClient,
) -> Decision {
    let mut reasons = Vec::new();

    // 1. Role authority.
    if !profile.is_authorized_for_action(&request.action) {
        reasons.push(format!(
            "role authority: action '{}' not in authorized_actions for {}",
            request.action, profile.id
        ));
    }

    // 2. Phase appropriateness.
    if !profile.can_act_in(current_phase) {
        reasons.push(format!(
            "phase appropriateness: {} not active in {current_phase}",
            profile.id
        ));
    } else if !schedule.allows_action(current_phase, &request.action) {
        reasons.push(format!(
            "phase appropriateness: action '{}' not permitted in {current_phase}",
            request.action
        ));
    }

    // 3. Information access.
    for category in &request.categories {
        if !profile.has_category(*category) {
            reasons.push(format!(
                "information access: {} lacks authorization for {category}",
                profile.id
            ));
            continue;
        }
        if let Some(policy) = policies.get(category) {
            if profile.access_level < policy.min_level {
                reasons.push(format!(
                    "information access: {} clearance {} below required {} for {category}",
                    profile.id, profile.access_level, policy.min_level
                ));
            }
        }
    }

    // 4. Delegation chain.
    if request.on_behalf_of.is_some() {
        if !profile.delegation_authority {
            reasons.push(format!(
                "delegation chain: {} lacks delegation_authority",
                profile.id
            ));
        }
        if request.delegation_depth > MAX_DELEGATION_DEPTH {
            reasons.push(format!(
                "delegation chain: depth {} exceeds maximum {}",
                request.delegation_depth, MAX_DELEGATION_DEPTH
            ));
        }
    }

    // 5. Doctrinal fit — soft-fail is not a denial.
    match doctrine.check_compliance(&request.action).await {
        Ok(DoctrineVerdict::Compliant) => {}
        Ok(DoctrineVerdict::NonCompliant { reason }) => {
            reasons.push(format!("doctrinal fit: non-compliant ({reason})"));
        }
        Err(_unavailable) => {
            tracing::debug!(action = %request.action, "doctrine adapter unavailable, soft-failing factor 5");
        }
    }

    // 6. External policy — authoritative when reachable, degrades to deny
    // once the circuit breaker opens.
    match external.evaluate(profile.id, &request.action, cycle_id).await {
        PolicyOutcome::Allow => {}
        PolicyOutcome::Deny { reason } => {
            reasons.push(format!("external policy: denied ({reason})"));
        }
        PolicyOutcome::Unconfigured => {}
        PolicyOutcome::CircuitOpen => {
            reasons.push("external policy: circuit breaker open, degrading to deny".to_string());
        }
        PolicyOutcome::Unreachable => {
            reasons.push("external policy: evaluator unreachable".to_string());
        }
    }

    // Edge policy: emergency reallocation requires an explicit rank.
    if request.emergency_reallocation {
        match request.approved_by_rank {
            Some(rank) if rank >= MIN_EMERGENCY_APPROVAL_RANK => {}
            _ => reasons.push(format!(
                "emergency reallocation: requires approved_by_rank >= {MIN_EMERGENCY_APPROVAL_RANK}"
            )),
        }
    }

    if reasons.is_empty() {
        Decision::allow()
    } else {
        Decision::deny(reasons)
    }
}
