//! Process-improvement flag taxonomy (§3, §4.5).

use crate::{AgentId, CycleId, FlagId, Phase, SequenceNumber, Timestamp};
use serde::{Deserialize, Serialize};

/// Closed taxonomy of procedural deviations the Process-Improvement Logger
/// classifies flags into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InefficiencyType {
    RedundantCoordination,
    InformationGap,
    TimingConstraint,
    DoctrineContradiction,
    AutomationOpportunity,
    DeconflictionIssue,
    ResourceBottleneck,
}

impl std::fmt::Display for InefficiencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InefficiencyType::RedundantCoordination => "REDUNDANT_COORDINATION",
            InefficiencyType::InformationGap => "INFORMATION_GAP",
            InefficiencyType::TimingConstraint => "TIMING_CONSTRAINT",
            InefficiencyType::DoctrineContradiction => "DOCTRINE_CONTRADICTION",
            InefficiencyType::AutomationOpportunity => "AUTOMATION_OPPORTUNITY",
            InefficiencyType::DeconflictionIssue => "DECONFLICTION_ISSUE",
            InefficiencyType::ResourceBottleneck => "RESOURCE_BOTTLENECK",
        };
        write!(f, "{s}")
    }
}

/// One append-only record of a detected deviation from doctrinal
/// expectations (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessImprovementFlag {
    pub id: FlagId,
    pub sequence: SequenceNumber,
    pub cycle_id: CycleId,
    pub phase: Phase,
    pub agent_id: AgentId,
    pub workflow: String,
    pub flag_type: InefficiencyType,
    pub description: String,
    pub time_wasted_hours: Option<f64>,
    pub suggested_improvement: String,
    pub created_at: Timestamp,
}
