//! Context window types consumed by the Context Provisioner (§3, §4.4).

use crate::{AgentId, ElementId, Phase, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Which of the four context layers an element was selected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextLayer {
    Doctrinal,
    Situational,
    Historical,
    Collaborative,
}

impl ContextLayer {
    pub const ALL: [ContextLayer; 4] = [
        ContextLayer::Doctrinal,
        ContextLayer::Situational,
        ContextLayer::Historical,
        ContextLayer::Collaborative,
    ];

    /// Prune order when the total exceeds the token budget: collaborative
    /// goes first, doctrinal last (§4.4).
    pub const PRUNE_ORDER: [ContextLayer; 4] = [
        ContextLayer::Collaborative,
        ContextLayer::Historical,
        ContextLayer::Situational,
        ContextLayer::Doctrinal,
    ];
}

/// One citable unit of context, stamped with a globally unique typed ID
/// (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextElement {
    pub id: ElementId,
    pub layer: ContextLayer,
    pub content: String,
    pub metadata: serde_json::Value,
    pub relevance_score: f32,
    pub token_count: u32,
    pub embedding: Option<Vec<f32>>,
}

impl ContextElement {
    pub fn new(id: ElementId, layer: ContextLayer, content: impl Into<String>, relevance_score: f32, token_count: u32) -> Self {
        Self {
            id,
            layer,
            content: content.into(),
            metadata: serde_json::Value::Null,
            relevance_score,
            token_count,
            embedding: None,
        }
    }
}

/// Per-agent, per-task context snapshot (§3, §4.4).
///
/// Invariants: Σ tokens(elements) ≤ token_budget; `referenced ⊆
/// {e.id for e in elements}`; no element id repeats across layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent_id: AgentId,
    pub phase: Phase,
    pub task: String,
    pub doctrinal: Vec<ContextElement>,
    pub situational: Vec<ContextElement>,
    pub historical: Vec<ContextElement>,
    pub collaborative: Vec<ContextElement>,
    pub token_budget: u32,
    pub referenced: HashSet<ElementId>,
    pub utilization_rate: f32,
    /// Set when the doctrinal floor (§4.4) could not be met.
    pub degraded: bool,
    pub created_at: Timestamp,
}

impl AgentContext {
    pub fn elements(&self) -> impl Iterator<Item = &ContextElement> {
        self.doctrinal
            .iter()
            .chain(self.situational.iter())
            .chain(self.historical.iter())
            .chain(self.collaborative.iter())
    }

    pub fn layer_mut(&mut self, layer: ContextLayer) -> &mut Vec<ContextElement> {
        match layer {
            ContextLayer::Doctrinal => &mut self.doctrinal,
            ContextLayer::Situational => &mut self.situational,
            ContextLayer::Historical => &mut self.historical,
            ContextLayer::Collaborative => &mut self.collaborative,
        }
    }

    pub fn layer(&self, layer: ContextLayer) -> &[ContextElement] {
        match layer {
            ContextLayer::Doctrinal => &self.doctrinal,
            ContextLayer::Situational => &self.situational,
            ContextLayer::Historical => &self.historical,
            ContextLayer::Collaborative => &self.collaborative,
        }
    }

    pub fn total_tokens(&self) -> u32 {
        self.elements().map(|e| e.token_count).sum()
    }

    pub fn provisioned_ids(&self) -> HashSet<ElementId> {
        self.elements().map(|e| e.id.clone()).collect()
    }

    /// §3/§8 invariant check: budget respected and referenced ⊆ provisioned.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.total_tokens() > self.token_budget {
            return Err(format!(
                "token budget exceeded: {} > {}",
                self.total_tokens(),
                self.token_budget
            ));
        }
        let provisioned = self.provisioned_ids();
        if !self.referenced.is_subset(&provisioned) {
            return Err("referenced elements not a subset of provisioned elements".to_string());
        }
        let mut seen = HashSet::new();
        for element in self.elements() {
            if !seen.insert(element.id.clone()) {
                return Err(format!("duplicate element id across layers: {}", element.id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ElementPrefix;

    fn element(layer: ContextLayer, prefix: ElementPrefix, tokens: u32, score: f32) -> ContextElement {
        ContextElement::new(ElementId::new(prefix), layer, "content", score, tokens)
    }

    #[test]
    fn invariants_hold_for_well_formed_context() {
        let doc = element(ContextLayer::Doctrinal, ElementPrefix::Doctrine, 100, 0.9);
        let id = doc.id.clone();
        let ctx = AgentContext {
            agent_id: AgentId::now_v7(),
            phase: Phase::Phase1,
            task: "plan".into(),
            doctrinal: vec![doc],
            situational: vec![],
            historical: vec![],
            collaborative: vec![],
            token_budget: 1000,
            referenced: [id].into_iter().collect(),
            utilization_rate: 1.0,
            degraded: false,
            created_at: chrono::Utc::now(),
        };
        assert!(ctx.check_invariants().is_ok());
    }

    #[test]
    fn invariants_reject_budget_overrun() {
        let doc = element(ContextLayer::Doctrinal, ElementPrefix::Doctrine, 2000, 0.9);
        let ctx = AgentContext {
            agent_id: AgentId::now_v7(),
            phase: Phase::Phase1,
            task: "plan".into(),
            doctrinal: vec![doc],
            situational: vec![],
            historical: vec![],
            collaborative: vec![],
            token_budget: 1000,
            referenced: HashSet::new(),
            utilization_rate: 0.0,
            degraded: false,
            created_at: chrono::Utc::now(),
        };
        assert!(ctx.check_invariants().is_err());
    }

    #[test]
    fn invariants_reject_unreferenced_leakage() {
        let ctx = AgentContext {
            agent_id: AgentId::now_v7(),
            phase: Phase::Phase1,
            task: "plan".into(),
            doctrinal: vec![],
            situational: vec![],
            historical: vec![],
            collaborative: vec![],
            token_budget: 1000,
            referenced: [ElementId::new(ElementPrefix::Doctrine)].into_iter().collect(),
            utilization_rate: 0.0,
            degraded: false,
            created_at: chrono::Utc::now(),
        };
        assert!(ctx.check_invariants().is_err());
    }
}
