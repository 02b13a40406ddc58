//! Process-Improvement Logger (§4.5): classifies deviations from doctrinal
//! expectations into the closed [`InefficiencyType`] taxonomy, logs them
//! append-only, and mines the log for recurring patterns worth a standing
//! recommendation.
//!
//! The instrumentation itself (timing a doctrinal procedure call, counting
//! coordination round-trips) is the Agent Runtime's job; this crate only
//! decides, given the measurements, whether a threshold was crossed.

use aether_core::{
    AgentId, CycleId, FlagId, InefficiencyType, InformationCategory, Phase, PiThresholds,
    ProcessImprovementFlag, SequenceGenerator,
};
use std::collections::HashMap;
use std::sync::RwLock;

/// Outcome of an information request the Agent Runtime made on an agent's
/// behalf, as observed by the broker (§4.5: "returns Unauthorized or
/// empty for a category the caller needs").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InformationOutcome {
    Ok,
    Unauthorized,
    Empty,
}

/// Append-only log of [`ProcessImprovementFlag`]s plus the auto-flag rules
/// (§4.5) that decide when a measurement crosses into a flag.
#[derive(Default)]
pub struct FlagLog {
    flags: RwLock<Vec<ProcessImprovementFlag>>,
    sequence: SequenceGenerator,
    thresholds: PiThresholds,
}

impl FlagLog {
    pub fn new(thresholds: PiThresholds) -> Self {
        Self {
            flags: RwLock::new(Vec::new()),
            sequence: SequenceGenerator::new(),
            thresholds,
        }
    }

    pub fn flags(&self) -> Vec<ProcessImprovementFlag> {
        self.flags.read().expect("flag log lock poisoned").clone()
    }

    fn record(
        &self,
        cycle_id: CycleId,
        phase: Phase,
        agent_id: AgentId,
        workflow: impl Into<String>,
        flag_type: InefficiencyType,
        description: impl Into<String>,
        time_wasted_hours: Option<f64>,
        suggested_improvement: impl Into<String>,
    ) -> ProcessImprovementFlag {
        let flag = ProcessImprovementFlag {
            id: FlagId::now_v7(),
            sequence: self.sequence.next(),
            cycle_id,
            phase,
            agent_id,
            workflow: workflow.into(),
            flag_type,
            description: description.into(),
            time_wasted_hours,
            suggested_improvement: suggested_improvement.into(),
            created_at: chrono::Utc::now(),
        };
        tracing::debug!(flag_type = %flag.flag_type, workflow = %flag.workflow, "process-improvement flag raised");
        self.flags.write().expect("flag log lock poisoned").push(flag.clone());
        flag
    }

    /// TIMING_CONSTRAINT: `elapsed > timing_overrun_ratio * expected`.
    pub fn check_timing(
        &self,
        cycle_id: CycleId,
        phase: Phase,
        agent_id: AgentId,
        workflow: impl Into<String>,
        expected_hours: f64,
        elapsed_hours: f64,
    ) -> Option<ProcessImprovementFlag> {
        if elapsed_hours > self.thresholds.timing_overrun_ratio * expected_hours {
            let time_wasted = elapsed_hours - expected_hours;
            Some(self.record(
                cycle_id,
                phase,
                agent_id,
                workflow,
                InefficiencyType::TimingConstraint,
                format!("elapsed {elapsed_hours:.2}h exceeded expected {expected_hours:.2}h"),
                Some(time_wasted),
                "review the expected duration or the procedure's bottleneck step",
            ))
        } else {
            None
        }
    }

    /// INFORMATION_GAP: an information request came back `Unauthorized` or
    /// empty for a category the caller needed.
    pub fn check_information_request(
        &self,
        cycle_id: CycleId,
        phase: Phase,
        agent_id: AgentId,
        workflow: impl Into<String>,
        category: InformationCategory,
        outcome: InformationOutcome,
    ) -> Option<ProcessImprovementFlag> {
        match outcome {
            InformationOutcome::Ok => None,
            InformationOutcome::Unauthorized | InformationOutcome::Empty => Some(self.record(
                cycle_id,
                phase,
                agent_id,
                workflow,
                InefficiencyType::InformationGap,
                format!("request for {category} returned {outcome:?}"),
                None,
                "review access policy or backend coverage for this category",
            )),
        }
    }

    /// REDUNDANT_COORDINATION: round-trips to the same agent for one
    /// logical decision at or above the configured count.
    pub fn check_redundant_coordination(
        &self,
        cycle_id: CycleId,
        phase: Phase,
        agent_id: AgentId,
        workflow: impl Into<String>,
        round_trips: u32,
    ) -> Option<ProcessImprovementFlag> {
        if round_trips >= self.thresholds.redundant_coordination_round_trips {
            Some(self.record(
                cycle_id,
                phase,
                agent_id,
                workflow,
                InefficiencyType::RedundantCoordination,
                format!("{round_trips} round-trips for one decision"),
                None,
                "consolidate into a single structured request",
            ))
        } else {
            None
        }
    }

    /// DOCTRINE_CONTRADICTION: two doctrine snippets retrieved for the
    /// same query disagree.
    pub fn check_doctrine_contradiction(
        &self,
        cycle_id: CycleId,
        phase: Phase,
        agent_id: AgentId,
        workflow: impl Into<String>,
        query: &str,
        verdict_a: &str,
        verdict_b: &str,
    ) -> Option<ProcessImprovementFlag> {
        if verdict_a != verdict_b {
            Some(self.record(
                cycle_id,
                phase,
                agent_id,
                workflow,
                InefficiencyType::DoctrineContradiction,
                format!("query '{query}' returned contradictory verdicts: '{verdict_a}' vs '{verdict_b}'"),
                None,
                "reconcile doctrine sources or escalate for a ruling",
            ))
        } else {
            None
        }
    }

    /// AUTOMATION_OPPORTUNITY: manual step count above threshold for an
    /// automatable pattern.
    pub fn check_automation_opportunity(
        &self,
        cycle_id: CycleId,
        phase: Phase,
        agent_id: AgentId,
        workflow: impl Into<String>,
        manual_steps: u32,
    ) -> Option<ProcessImprovementFlag> {
        if manual_steps > self.thresholds.automation_opportunity_steps {
            Some(self.record(
                cycle_id,
                phase,
                agent_id,
                workflow,
                InefficiencyType::AutomationOpportunity,
                format!("{manual_steps} manual steps observed"),
                None,
                "candidate for scripting or a doctrinal procedure template",
            ))
        } else {
            None
        }
    }

    /// DECONFLICTION_ISSUE: spectrum conflict rate above threshold within
    /// a cycle.
    pub fn check_deconfliction_issue(
        &self,
        cycle_id: CycleId,
        phase: Phase,
        agent_id: AgentId,
        workflow: impl Into<String>,
        conflicts: u32,
    ) -> Option<ProcessImprovementFlag> {
        if conflicts > self.thresholds.deconfliction_issue_rate {
            Some(self.record(
                cycle_id,
                phase,
                agent_id,
                workflow,
                InefficiencyType::DeconflictionIssue,
                format!("{conflicts} spectrum conflicts this cycle"),
                None,
                "revisit spectrum allocation for the affected band",
            ))
        } else {
            None
        }
    }

    /// RESOURCE_BOTTLENECK: asset-reservation denials above threshold.
    pub fn check_resource_bottleneck(
        &self,
        cycle_id: CycleId,
        phase: Phase,
        agent_id: AgentId,
        workflow: impl Into<String>,
        denials: u32,
    ) -> Option<ProcessImprovementFlag> {
        if denials > self.thresholds.resource_bottleneck_denials {
            Some(self.record(
                cycle_id,
                phase,
                agent_id,
                workflow,
                InefficiencyType::ResourceBottleneck,
                format!("{denials} asset-reservation denials"),
                None,
                "review asset allocation capacity for this workflow",
            ))
        } else {
            None
        }
    }

    /// Groups flags by `(workflow, type)` and emits a recommendation when
    /// cardinality or cycle span clears the configured threshold (§4.5).
    pub fn analyze_patterns(&self) -> Vec<PatternRecommendation> {
        let flags = self.flags();
        let mut groups: HashMap<(String, InefficiencyType), Vec<&ProcessImprovementFlag>> = HashMap::new();
        for flag in &flags {
            groups.entry((flag.workflow.clone(), flag.flag_type)).or_default().push(flag);
        }

        let mut recommendations = Vec::new();
        for ((workflow, flag_type), group) in groups {
            let cardinality = group.len();
            let cycle_span = group.iter().map(|f| f.cycle_id).collect::<std::collections::HashSet<_>>().len();

            if cardinality >= self.thresholds.pattern_min_cardinality
                || cycle_span >= self.thresholds.pattern_min_cycle_span
            {
                recommendations.push(PatternRecommendation {
                    pattern: format!("{workflow}/{flag_type}"),
                    evidence: group.iter().map(|f| f.id).collect(),
                    suggested_action: group[0].suggested_improvement.clone(),
                });
            }
        }
        recommendations
    }
}

/// One recommendation emitted by [`FlagLog::analyze_patterns`]: a
/// recurring `(workflow, type)` grouping with the flags that evidence it.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternRecommendation {
    pub pattern: String,
    pub evidence: Vec<FlagId>,
    pub suggested_action: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> FlagLog {
        FlagLog::new(PiThresholds::default())
    }

    #[test]
    fn timing_flag_raised_above_ratio() {
        let log = log();
        let flag = log.check_timing(CycleId::now_v7(), Phase::Phase2, AgentId::now_v7(), "targeting", 10.0, 14.0);
        assert!(flag.is_some());
        assert_eq!(flag.unwrap().time_wasted_hours, Some(4.0));
    }

    #[test]
    fn timing_flag_not_raised_within_ratio() {
        let log = log();
        let flag = log.check_timing(CycleId::now_v7(), Phase::Phase2, AgentId::now_v7(), "targeting", 10.0, 11.0);
        assert!(flag.is_none());
    }

    #[test]
    fn information_gap_flagged_on_unauthorized() {
        let log = log();
        let flag = log.check_information_request(
            CycleId::now_v7(),
            Phase::Phase2,
            AgentId::now_v7(),
            "targeting",
            InformationCategory::ThreatData,
            InformationOutcome::Unauthorized,
        );
        assert!(flag.is_some());
    }

    #[test]
    fn information_gap_not_flagged_on_ok() {
        let log = log();
        let flag = log.check_information_request(
            CycleId::now_v7(),
            Phase::Phase2,
            AgentId::now_v7(),
            "targeting",
            InformationCategory::ThreatData,
            InformationOutcome::Ok,
        );
        assert!(flag.is_none());
    }

    #[test]
    fn doctrine_contradiction_detects_disagreement() {
        let log = log();
        let flag = log.check_doctrine_contradiction(
            CycleId::now_v7(),
            Phase::Phase1,
            AgentId::now_v7(),
            "planning",
            "rules of engagement for band X",
            "authorized",
            "prohibited",
        );
        assert!(flag.is_some());
    }

    #[test]
    fn analyze_patterns_triggers_on_cardinality() {
        let log = log();
        let agent = AgentId::now_v7();
        for _ in 0..5 {
            log.check_timing(CycleId::now_v7(), Phase::Phase2, agent, "targeting", 10.0, 20.0);
        }
        let recs = log.analyze_patterns();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].evidence.len(), 5);
    }

    #[test]
    fn analyze_patterns_triggers_on_cycle_span() {
        let log = log();
        let agent = AgentId::now_v7();
        let cycle_a = CycleId::now_v7();
        let cycle_b = CycleId::now_v7();
        log.check_redundant_coordination(cycle_a, Phase::Phase3, agent, "deconfliction", 3);
        log.check_redundant_coordination(cycle_b, Phase::Phase3, agent, "deconfliction", 3);
        let recs = log.analyze_patterns();
        assert_eq!(recs.len(), 1);
    }

    #[test]
    fn analyze_patterns_ignores_isolated_flags() {
        let log = log();
        log.check_timing(CycleId::now_v7(), Phase::Phase2, AgentId::now_v7(), "targeting", 10.0, 20.0);
        assert!(log.analyze_patterns().is_empty());
    }
}
