//! Immutable agent identity and authorization surface (§3).

use crate::{AccessLevel, AgentId, InformationCategory, Phase};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Immutable per-agent profile, fixed at registration. Every authorization
/// factor in the Authorization Engine reads from this structure; nothing
/// about it changes once registered (re-registration replaces it wholesale).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: AgentId,
    pub role: String,
    pub access_level: AccessLevel,
    pub authorized_categories: HashSet<InformationCategory>,
    pub authorized_actions: HashSet<String>,
    pub active_phases: HashSet<Phase>,
    pub delegation_authority: bool,
}

impl AgentProfile {
    pub fn new(id: AgentId, role: impl Into<String>, access_level: AccessLevel) -> Self {
        Self {
            id,
            role: role.into(),
            access_level,
            authorized_categories: HashSet::new(),
            authorized_actions: HashSet::new(),
            active_phases: HashSet::new(),
            delegation_authority: false,
        }
    }

    pub fn with_categories(mut self, categories: impl IntoIterator<Item = InformationCategory>) -> Self {
        self.authorized_categories = categories.into_iter().collect();
        self
    }

    pub fn with_actions(mut self, actions: impl IntoIterator<Item = String>) -> Self {
        self.authorized_actions = actions.into_iter().collect();
        self
    }

    pub fn with_active_phases(mut self, phases: impl IntoIterator<Item = Phase>) -> Self {
        self.active_phases = phases.into_iter().collect();
        self
    }

    pub fn with_delegation_authority(mut self, yes: bool) -> Self {
        self.delegation_authority = yes;
        self
    }

    pub fn can_act_in(&self, phase: Phase) -> bool {
        self.active_phases.contains(&phase)
    }

    pub fn is_authorized_for_action(&self, action: &str) -> bool {
        self.authorized_actions.contains(action)
    }

    pub fn has_category(&self, category: InformationCategory) -> bool {
        self.authorized_categories.contains(&category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_builder_roundtrips() {
        let profile = AgentProfile::new(AgentId::now_v7(), "spectrum_manager", AccessLevel::Operational)
            .with_categories([InformationCategory::SpectrumAllocation])
            .with_actions(["allocate_frequency".to_string()])
            .with_active_phases([Phase::Phase3, Phase::Phase5])
            .with_delegation_authority(false);

        assert!(profile.can_act_in(Phase::Phase3));
        assert!(!profile.can_act_in(Phase::Phase1));
        assert!(profile.is_authorized_for_action("allocate_frequency"));
        assert!(profile.has_category(InformationCategory::SpectrumAllocation));
    }
}
