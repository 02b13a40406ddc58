//! Shared fixtures for AetherOS's test suites: a canonical 72-hour cycle
//! schedule, sample agent profiles, default category policies, and mock
//! doubles for the Information Broker, Context Provisioner, and Agent
//! Runtime's pluggable seams.

pub use aether_broker::{InMemoryBackend, InformationRecord};
pub use aether_llm::MockLlmProvider;

use aether_agents::MessageHandler;
use aether_context::ResponseEmbedder;
use aether_core::{
    AccessLevel, AgentId, AgentProfile, CategoryPolicy, CycleSchedule, InformationCategory, Phase, PhaseConfig,
};
use async_trait::async_trait;
use std::collections::HashMap;

/// The canonical six-phase, 72-hour schedule referenced throughout the
/// other crates' doc comments. PHASE3 (weaponeering) and PHASE4 (execution
/// planning) are critical and can never be skipped.
pub fn standard_72_hour_schedule() -> CycleSchedule {
    CycleSchedule {
        phases: vec![
            PhaseConfig::new(Phase::Phase1, 8.0, 0.0),
            PhaseConfig::new(Phase::Phase2, 14.0, 8.0),
            PhaseConfig::new(Phase::Phase3, 16.0, 22.0).critical(),
            PhaseConfig::new(Phase::Phase4, 14.0, 38.0).critical(),
            PhaseConfig::new(Phase::Phase5, 16.0, 52.0),
            PhaseConfig::new(Phase::Phase6, 4.0, 68.0),
        ],
    }
}

/// Every category open to `access_level`, a reasonable default profile for
/// a generic test agent with no phase restriction.
pub fn sample_profile(role: impl Into<String>, access_level: AccessLevel) -> AgentProfile {
    AgentProfile::new(AgentId::now_v7(), role, access_level)
        .with_categories(InformationCategory::ALL)
        .with_active_phases(Phase::ORDER)
}

/// One public-access, unsanitized, audited policy per category — a
/// permissive default for tests that don't care about the Authorization
/// Engine's finer edge cases.
pub fn permissive_policies() -> HashMap<InformationCategory, CategoryPolicy> {
    InformationCategory::ALL
        .into_iter()
        .map(|category| (category, CategoryPolicy::new(category, AccessLevel::Public)))
        .collect()
}

/// Deterministic, dependency-free embedder for exercising
/// [`aether_context::ContextProvisioner::record_utilization`]'s semantic
/// path without a real embedding model: folds each byte into a fixed-width
/// vector and normalizes it, the same scheme the teacher's mock embedding
/// provider used for text.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl ResponseEmbedder for HashEmbedder {
    fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let mut data = vec![0.0f32; self.dimensions];
        for (i, byte) in text.bytes().enumerate() {
            data[i % self.dimensions] += byte as f32 / 255.0;
        }
        let norm: f32 = data.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut data {
                *x /= norm;
            }
        }
        Some(data)
    }
}

/// Echoes the message payload back as the reply, for runtime tests that
/// only care about delivery and activation gating, not handler logic.
pub struct EchoHandler;

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn handle(&self, message: &aether_agents::Message) -> Result<serde_json::Value, String> {
        Ok(message.payload.clone())
    }
}

/// Always refuses, for exercising `send_message`'s error path without a
/// second `NotActive` agent.
pub struct RefusingHandler;

#[async_trait]
impl MessageHandler for RefusingHandler {
    async fn handle(&self, _message: &aether_agents::Message) -> Result<serde_json::Value, String> {
        Err("refused".to_string())
    }
}
