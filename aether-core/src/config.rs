//! Configuration types.
//!
//! All three logical config trees from §6 (agent profiles, access
//! policies, cycle schedule) plus the operational knobs the ambient stack
//! needs (retry/backoff, circuit breaker, context template, PI thresholds)
//! live here so the kernel can be constructed from one fully-validated
//! value, in the spirit of the teacher's "ALL values are required, no
//! defaults anywhere" `CaliberConfig`.

use crate::{AgentProfile, CategoryPolicy, CycleSchedule};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Token-budget split across the four context layers, in percent points
/// that must sum to 100 (§4.4 default: 40/30/20/10).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextSplit {
    pub doctrinal: u8,
    pub situational: u8,
    pub historical: u8,
    pub collaborative: u8,
}

impl ContextSplit {
    pub const DEFAULT: ContextSplit = ContextSplit {
        doctrinal: 40,
        situational: 30,
        historical: 20,
        collaborative: 10,
    };

    pub fn validate(&self) -> Result<(), String> {
        let total = self.doctrinal as u32 + self.situational as u32 + self.historical as u32 + self.collaborative as u32;
        if total != 100 {
            return Err(format!("context split must sum to 100, got {total}"));
        }
        Ok(())
    }
}

/// Per-phase override of the default context split (§4.4: "PHASE3 boosts
/// situational").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextTemplate {
    pub default_split: ContextSplit,
    pub phase_overrides: Vec<(crate::Phase, ContextSplit)>,
    /// Minimum doctrinal elements that must survive pruning before the
    /// context is marked `degraded` (§4.4).
    pub doctrinal_floor: usize,
}

impl ContextTemplate {
    pub fn split_for(&self, phase: crate::Phase) -> ContextSplit {
        self.phase_overrides
            .iter()
            .find(|(p, _)| *p == phase)
            .map(|(_, split)| *split)
            .unwrap_or(self.default_split)
    }
}

/// Retry/backoff policy shared by the LLM adapter and the external policy
/// client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(with = "duration_ms")]
    pub initial_backoff: Duration,
    #[serde(with = "duration_ms")]
    pub max_backoff: Duration,
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Circuit-breaker thresholds for the external policy evaluator (§4.2) and,
/// reused, for LLM provider fallback (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "duration_ms_copy")]
    pub window: Duration,
    #[serde(with = "duration_ms_copy")]
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(30),
            open_duration: Duration::from_secs(15),
        }
    }
}

mod duration_ms_copy {
    pub use super::duration_ms::{deserialize, serialize};
}

/// Thresholds driving the §4.5 auto-flag rules. Defaults mirror the
/// representative (non-normative) values in §4.5; the kernel owner may
/// override any of them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PiThresholds {
    /// `elapsed > timing_overrun_ratio * expected` raises TIMING_CONSTRAINT.
    pub timing_overrun_ratio: f64,
    /// Round-trips to the same agent for one logical decision at or above
    /// this count raises REDUNDANT_COORDINATION.
    pub redundant_coordination_round_trips: u32,
    /// Manual step count above this raises AUTOMATION_OPPORTUNITY.
    pub automation_opportunity_steps: u32,
    /// Spectrum conflicts per cycle above this raises DECONFLICTION_ISSUE.
    pub deconfliction_issue_rate: u32,
    /// Asset-reservation denials above this raises RESOURCE_BOTTLENECK.
    pub resource_bottleneck_denials: u32,
    /// Minimum flag count for `analyze_patterns` to emit a recommendation.
    pub pattern_min_cardinality: usize,
    /// Minimum distinct cycles a pattern must recur across, as an
    /// alternative trigger to cardinality.
    pub pattern_min_cycle_span: usize,
}

impl Default for PiThresholds {
    fn default() -> Self {
        Self {
            timing_overrun_ratio: 1.3,
            redundant_coordination_round_trips: 3,
            automation_opportunity_steps: 5,
            deconfliction_issue_rate: 3,
            resource_bottleneck_denials: 3,
            pattern_min_cardinality: 5,
            pattern_min_cycle_span: 2,
        }
    }
}

/// Root configuration for one kernel instance. All three logical config
/// trees from §6, plus operational knobs. Constructed once at process
/// startup; immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    pub agent_profiles: Vec<AgentProfile>,
    pub access_policies: Vec<CategoryPolicy>,
    pub cycle_schedule: CycleSchedule,
    pub context_template: ContextTemplate,
    pub pi_thresholds: PiThresholds,
    pub auth_circuit_breaker: CircuitBreakerConfig,
    pub llm_retry: RetryConfig,
    pub external_policy_url: Option<String>,
    pub external_policy_package: String,
}

impl KernelConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.context_template.default_split.validate()?;
        for (_, split) in &self.context_template.phase_overrides {
            split.validate()?;
        }
        if self.cycle_schedule.phases.len() != 6 {
            return Err(format!(
                "cycle schedule must have exactly 6 phases, got {}",
                self.cycle_schedule.phases.len()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_context_split_sums_to_100() {
        assert!(ContextSplit::DEFAULT.validate().is_ok());
    }

    #[test]
    fn invalid_split_is_rejected() {
        let bad = ContextSplit {
            doctrinal: 50,
            situational: 30,
            historical: 20,
            collaborative: 10,
        };
        assert!(bad.validate().is_err());
    }
}
