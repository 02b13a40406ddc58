//! Access levels and information categories.

use crate::Phase;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Totally ordered clearance rank. Comparison against a category's
/// `min_level` is the sole authorization predicate for information access
/// (§3, §4.3).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum AccessLevel {
    Public = 1,
    Internal = 2,
    Operational = 3,
    Sensitive = 4,
    Critical = 5,
}

impl AccessLevel {
    pub const fn rank(self) -> u8 {
        self as u8
    }

    pub const ALL: [AccessLevel; 5] = [
        AccessLevel::Public,
        AccessLevel::Internal,
        AccessLevel::Operational,
        AccessLevel::Sensitive,
        AccessLevel::Critical,
    ];
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessLevel::Public => "PUBLIC",
            AccessLevel::Internal => "INTERNAL",
            AccessLevel::Operational => "OPERATIONAL",
            AccessLevel::Sensitive => "SENSITIVE",
            AccessLevel::Critical => "CRITICAL",
        };
        write!(f, "{s}")
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PUBLIC" => Ok(AccessLevel::Public),
            "INTERNAL" => Ok(AccessLevel::Internal),
            "OPERATIONAL" => Ok(AccessLevel::Operational),
            "SENSITIVE" => Ok(AccessLevel::Sensitive),
            "CRITICAL" => Ok(AccessLevel::Critical),
            other => Err(format!("invalid access level: {other}")),
        }
    }
}

/// Closed enumeration of information categories the broker routes queries
/// to (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InformationCategory {
    Doctrine,
    ThreatData,
    AssetStatus,
    SpectrumAllocation,
    MissionPlan,
    Organizational,
    ProcessMetrics,
}

impl InformationCategory {
    pub const ALL: [InformationCategory; 7] = [
        InformationCategory::Doctrine,
        InformationCategory::ThreatData,
        InformationCategory::AssetStatus,
        InformationCategory::SpectrumAllocation,
        InformationCategory::MissionPlan,
        InformationCategory::Organizational,
        InformationCategory::ProcessMetrics,
    ];
}

impl fmt::Display for InformationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InformationCategory::Doctrine => "DOCTRINE",
            InformationCategory::ThreatData => "THREAT_DATA",
            InformationCategory::AssetStatus => "ASSET_STATUS",
            InformationCategory::SpectrumAllocation => "SPECTRUM_ALLOCATION",
            InformationCategory::MissionPlan => "MISSION_PLAN",
            InformationCategory::Organizational => "ORGANIZATIONAL",
            InformationCategory::ProcessMetrics => "PROCESS_METRICS",
        };
        write!(f, "{s}")
    }
}

/// Per-category access policy (§3): minimum clearance, need-to-know gating,
/// phase restriction, and whether results must be sanitized / audited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPolicy {
    pub category: InformationCategory,
    pub min_level: AccessLevel,
    pub need_to_know: bool,
    /// Empty set means "not phase-restricted" (queryable in any phase).
    pub phase_restricted: HashSet<Phase>,
    pub sanitize: bool,
    pub audit: bool,
}

impl CategoryPolicy {
    pub fn new(category: InformationCategory, min_level: AccessLevel) -> Self {
        Self {
            category,
            min_level,
            need_to_know: false,
            phase_restricted: HashSet::new(),
            sanitize: false,
            audit: true,
        }
    }

    pub fn need_to_know(mut self, yes: bool) -> Self {
        self.need_to_know = yes;
        self
    }

    pub fn restricted_to(mut self, phases: impl IntoIterator<Item = Phase>) -> Self {
        self.phase_restricted = phases.into_iter().collect();
        self
    }

    pub fn sanitized(mut self) -> Self {
        self.sanitize = true;
        self
    }

    pub fn unaudited(mut self) -> Self {
        self.audit = false;
        self
    }

    /// True if `phase` is permitted to query this category; an empty
    /// restriction set means every phase is allowed.
    pub fn allows_phase(&self, phase: Phase) -> bool {
        self.phase_restricted.is_empty() || self.phase_restricted.contains(&phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_level_ordering_is_monotone() {
        assert!(AccessLevel::Public < AccessLevel::Internal);
        assert!(AccessLevel::Internal < AccessLevel::Operational);
        assert!(AccessLevel::Operational < AccessLevel::Sensitive);
        assert!(AccessLevel::Sensitive < AccessLevel::Critical);
    }

    #[test]
    fn category_policy_default_phase_restriction_allows_all() {
        let policy = CategoryPolicy::new(InformationCategory::Doctrine, AccessLevel::Public);
        assert!(policy.allows_phase(Phase::Phase1));
        assert!(policy.allows_phase(Phase::Phase6));
    }

    #[test]
    fn category_policy_restricted_phases() {
        let policy = CategoryPolicy::new(
            InformationCategory::SpectrumAllocation,
            AccessLevel::Operational,
        )
        .restricted_to([Phase::Phase3, Phase::Phase5]);
        assert!(policy.allows_phase(Phase::Phase3));
        assert!(!policy.allows_phase(Phase::Phase1));
    }
}
