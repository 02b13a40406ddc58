//! The single mutable ATO cycle (§3).

use crate::{AgentId, CycleId, Phase, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// The mutable state of the one cycle that is current at any instant.
/// Prior cycles become read-only history once superseded by a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtoCycle {
    pub cycle_id: CycleId,
    pub start_time: Timestamp,
    pub current_phase: Phase,
    pub phase_start_time: Timestamp,
    pub per_phase_outputs: HashMap<Phase, serde_json::Value>,
    pub active_agents: HashSet<AgentId>,
}

impl AtoCycle {
    pub fn start(cycle_id: CycleId, now: Timestamp) -> Self {
        Self {
            cycle_id,
            start_time: now,
            current_phase: Phase::Phase1,
            phase_start_time: now,
            per_phase_outputs: HashMap::new(),
            active_agents: HashSet::new(),
        }
    }

    pub fn record_output(&mut self, phase: Phase, output: serde_json::Value) {
        self.per_phase_outputs.insert(phase, output);
    }

    pub fn output_for(&self, phase: Phase) -> Option<&serde_json::Value> {
        self.per_phase_outputs.get(&phase)
    }
}
