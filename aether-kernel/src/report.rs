//! Kernel-level aggregation views over the Process-Improvement Logger
//! (§4.5). The logger itself only accumulates flags and mines patterns;
//! rolling those up per agent or per cycle is a kernel-boundary concern
//! since it's the shape a commander actually wants to read.

use aether_core::{AgentId, CycleId, InefficiencyType, ProcessImprovementFlag};
use aether_pi::PatternRecommendation;
use std::collections::HashMap;

/// Every flag raised so far, plus the recurring-pattern recommendations
/// mined from them.
#[derive(Debug, Clone)]
pub struct ProcessImprovementReport {
    pub flags: Vec<ProcessImprovementFlag>,
    pub recommendations: Vec<PatternRecommendation>,
}

/// One agent's standing across a given set of cycles.
#[derive(Debug, Clone)]
pub struct PerformanceReport {
    pub agent_id: AgentId,
    pub cycles_considered: Vec<CycleId>,
    pub total_flags: usize,
    pub flags_by_type: HashMap<InefficiencyType, u32>,
    pub total_hours_wasted: f64,
}
