//! ATO cycle phases and the fixed six-phase schedule.

use crate::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Closed, strictly ordered enumeration of the six phases of an ATO cycle
/// (§3, §4.1). The legal transition graph is linear with a single
/// cycle-restart edge from `Phase6` back to `Phase1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    Phase1,
    Phase2,
    Phase3,
    Phase4,
    Phase5,
    Phase6,
}

impl Phase {
    pub const ORDER: [Phase; 6] = [
        Phase::Phase1,
        Phase::Phase2,
        Phase::Phase3,
        Phase::Phase4,
        Phase::Phase5,
        Phase::Phase6,
    ];

    /// The phase that follows this one in the transition graph. `Phase6`
    /// wraps to `Phase1` (the single cycle-restart edge).
    pub const fn next(self) -> Phase {
        match self {
            Phase::Phase1 => Phase::Phase2,
            Phase::Phase2 => Phase::Phase3,
            Phase::Phase3 => Phase::Phase4,
            Phase::Phase4 => Phase::Phase5,
            Phase::Phase5 => Phase::Phase6,
            Phase::Phase6 => Phase::Phase1,
        }
    }

    /// Index into `ORDER`, 0-based. Used to detect skip-ahead transitions.
    pub const fn index(self) -> usize {
        match self {
            Phase::Phase1 => 0,
            Phase::Phase2 => 1,
            Phase::Phase3 => 2,
            Phase::Phase4 => 3,
            Phase::Phase5 => 4,
            Phase::Phase6 => 5,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PHASE{}", self.index() + 1)
    }
}

/// Fixed configuration for one phase slot in the cycle schedule (§3, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub phase: Phase,
    pub duration_hours: f64,
    pub offset_hours: f64,
    pub active_agent_ids: HashSet<AgentId>,
    /// Critical phases (PHASE3, PHASE4 by default) can never be skipped,
    /// even with an override (§4.1).
    pub critical: bool,
    /// Actions permitted during this phase. Empty means unrestricted, same
    /// convention as `CategoryPolicy::phase_restricted` (§4.2 factor 2:
    /// "action is listed under current phase's allowed actions").
    pub allowed_actions: HashSet<String>,
}

impl PhaseConfig {
    pub fn new(phase: Phase, duration_hours: f64, offset_hours: f64) -> Self {
        Self {
            phase,
            duration_hours,
            offset_hours,
            active_agent_ids: HashSet::new(),
            critical: false,
            allowed_actions: HashSet::new(),
        }
    }

    pub fn with_active_agents(mut self, agents: impl IntoIterator<Item = AgentId>) -> Self {
        self.active_agent_ids = agents.into_iter().collect();
        self
    }

    pub fn with_allowed_actions(mut self, actions: impl IntoIterator<Item = String>) -> Self {
        self.allowed_actions = actions.into_iter().collect();
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn allows_action(&self, action: &str) -> bool {
        self.allowed_actions.is_empty() || self.allowed_actions.contains(action)
    }
}

/// The full six-phase schedule of one ATO cycle: 72 hours, split across the
/// phases named in `PhaseConfig` entries (§3, §6). `PHASE3` and `PHASE4` are
/// critical by construction in the canonical `standard_72_hour` schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSchedule {
    pub phases: Vec<PhaseConfig>,
}

impl CycleSchedule {
    pub fn config_for(&self, phase: Phase) -> Option<&PhaseConfig> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn duration_hours(&self, phase: Phase) -> f64 {
        self.config_for(phase).map(|c| c.duration_hours).unwrap_or(0.0)
    }

    pub fn is_critical(&self, phase: Phase) -> bool {
        self.config_for(phase).map(|c| c.critical).unwrap_or(false)
    }

    pub fn active_agents(&self, phase: Phase) -> HashSet<AgentId> {
        self.config_for(phase)
            .map(|c| c.active_agent_ids.clone())
            .unwrap_or_default()
    }

    pub fn allows_action(&self, phase: Phase, action: &str) -> bool {
        self.config_for(phase).map(|c| c.allows_action(action)).unwrap_or(false)
    }
}
