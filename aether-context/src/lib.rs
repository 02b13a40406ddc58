//! Context Provisioner (§4.4): assembles a per-agent, per-task
//! [`AgentContext`] window under a hard token budget, querying the
//! Information Broker under the requesting agent's identity for each
//! layer's candidate elements.

use aether_broker::{InformationBroker, InformationRecord, QueryParams};
use aether_core::{
    AgentContext, AgentId, AgentProfile, ContextElement, ContextError, ContextLayer, ContextTemplate,
    ElementId, InformationCategory, Phase,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Scores a candidate record's relevance to the requesting task, in
/// `[0.0, 1.0]`. Selection within a layer is greedy by descending score.
pub trait RelevanceScorer: Send + Sync {
    fn score(&self, task: &str, record: &InformationRecord) -> f32;
}

/// Fraction of task keywords found in the record's field values. A
/// reasonable default absent a retrieval index; kernels with a real
/// embedding store supply their own scorer.
pub struct KeywordOverlapScorer;

impl RelevanceScorer for KeywordOverlapScorer {
    fn score(&self, task: &str, record: &InformationRecord) -> f32 {
        let keywords: HashSet<String> = task
            .split_whitespace()
            .map(|w| w.to_ascii_lowercase())
            .filter(|w| w.len() > 2)
            .collect();
        if keywords.is_empty() {
            return 0.5;
        }
        let haystack: String = record
            .fields
            .values()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();
        let hits = keywords.iter().filter(|k| haystack.contains(k.as_str())).count();
        hits as f32 / keywords.len() as f32
    }
}

/// Estimates token count from character length (§4.4 budgeting), at the
/// same 0.75 tokens-per-char ratio used elsewhere in the ambient stack.
pub fn estimate_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    (text.len() as f32 * 0.75).ceil() as u32
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Optional semantic-similarity signal for utilization tracking (§4.4:
/// "semantic similarity ... when embeddings are available"). A kernel with
/// no embedding model simply never supplies one and utilization falls back
/// to citation matching alone.
pub trait ResponseEmbedder: Send + Sync {
    fn embed(&self, text: &str) -> Option<Vec<f32>>;
}

/// Outcome of scoring a completed response against the context it was
/// given (§4.4).
#[derive(Debug, Clone)]
pub struct UtilizationReport {
    pub utilization_rate: f32,
    pub underutilized: Vec<ElementId>,
}

#[derive(Clone, Hash, Eq, PartialEq)]
struct CacheKey {
    agent_id: AgentId,
    phase: Phase,
    task: String,
}

/// Assembles and caches [`AgentContext`] windows (§4.4). One instance is
/// shared across all agents in a kernel.
pub struct ContextProvisioner {
    broker: Arc<InformationBroker>,
    template: ContextTemplate,
    scorer: Arc<dyn RelevanceScorer>,
    layer_sources: HashMap<ContextLayer, Vec<InformationCategory>>,
    cache: Mutex<HashMap<CacheKey, AgentContext>>,
}

impl ContextProvisioner {
    pub fn new(broker: Arc<InformationBroker>, template: ContextTemplate) -> Self {
        Self {
            broker,
            template,
            scorer: Arc::new(KeywordOverlapScorer),
            layer_sources: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Registers which information categories feed a context layer. A
    /// layer with no registered category is simply left empty.
    pub fn with_layer_source(mut self, layer: ContextLayer, category: InformationCategory) -> Self {
        self.layer_sources.entry(layer).or_default().push(category);
        self
    }

    /// Drops every cached window for `agent_id`. Call on phase
    /// transition, a new intelligence event, or a task change (§4.4's
    /// required refresh triggers); the orchestrator and broker wire this
    /// in as a side effect of those events.
    pub async fn invalidate(&self, agent_id: AgentId) {
        self.cache.lock().await.retain(|key, _| key.agent_id != agent_id);
    }

    /// Forces a rebuild regardless of cache state (§4.4's explicit
    /// `refresh()` trigger).
    pub async fn refresh(
        &self,
        profile: &AgentProfile,
        phase: Phase,
        task: impl Into<String>,
        max_tokens: u32,
    ) -> Result<AgentContext, ContextError> {
        let task = task.into();
        self.cache.lock().await.remove(&CacheKey {
            agent_id: profile.id,
            phase,
            task: task.clone(),
        });
        self.build(profile, phase, task, max_tokens).await
    }

    /// Returns the cached window for `(agent_id, phase, task)` if one
    /// exists, otherwise assembles and caches a fresh one (§4.4).
    pub async fn build(
        &self,
        profile: &AgentProfile,
        phase: Phase,
        task: impl Into<String>,
        max_tokens: u32,
    ) -> Result<AgentContext, ContextError> {
        let task = task.into();
        let key = CacheKey {
            agent_id: profile.id,
            phase,
            task: task.clone(),
        };
        if let Some(cached) = self.cache.lock().await.get(&key) {
            return Ok(cached.clone());
        }

        let split = self.template.split_for(phase);
        let mut context = AgentContext {
            agent_id: profile.id,
            phase,
            task: task.clone(),
            doctrinal: Vec::new(),
            situational: Vec::new(),
            historical: Vec::new(),
            collaborative: Vec::new(),
            token_budget: max_tokens,
            referenced: HashSet::new(),
            utilization_rate: 0.0,
            degraded: false,
            created_at: chrono::Utc::now(),
        };

        for layer in ContextLayer::ALL {
            let pct = match layer {
                ContextLayer::Doctrinal => split.doctrinal,
                ContextLayer::Situational => split.situational,
                ContextLayer::Historical => split.historical,
                ContextLayer::Collaborative => split.collaborative,
            };
            let sub_budget = max_tokens * pct as u32 / 100;
            let mut elements = self.candidates(profile, layer, &task).await?;
            elements.sort_by(|a, b| b.relevance_score.partial_cmp(&a.relevance_score).unwrap());

            let mut used = 0u32;
            let mut selected = Vec::new();
            for element in elements {
                if used + element.token_count > sub_budget {
                    continue;
                }
                used += element.token_count;
                selected.push(element);
            }
            *context.layer_mut(layer) = selected;
        }

        self.enforce_budget(&mut context, max_tokens);

        if context.doctrinal.len() < self.template.doctrinal_floor {
            context.degraded = true;
            tracing::warn!(
                agent_id = %profile.id,
                floor = self.template.doctrinal_floor,
                actual = context.doctrinal.len(),
                "doctrinal floor not met, context degraded"
            );
        }

        context
            .check_invariants()
            .map_err(ContextError::InvariantViolation)?;

        self.cache.lock().await.insert(key, context.clone());
        Ok(context)
    }

    async fn candidates(
        &self,
        profile: &AgentProfile,
        layer: ContextLayer,
        task: &str,
    ) -> Result<Vec<ContextElement>, ContextError> {
        let mut elements = Vec::new();
        let Some(categories) = self.layer_sources.get(&layer) else {
            return Ok(elements);
        };
        for category in categories {
            let result = self
                .broker
                .query(profile, *category, QueryParams::new(task), None)
                .await?;
            for record in result.records {
                let content = serde_json::to_string(&record.fields).unwrap_or_default();
                let relevance = self.scorer.score(task, &record);
                let token_count = estimate_tokens(&content);
                elements.push(ContextElement::new(record.element_id, layer, content, relevance, token_count));
            }
        }
        Ok(elements)
    }

    /// Prunes lowest-relevance elements in the order collaborative →
    /// historical → situational → doctrinal until `total_tokens <=
    /// max_tokens` (§4.4).
    fn enforce_budget(&self, context: &mut AgentContext, max_tokens: u32) {
        for layer in ContextLayer::PRUNE_ORDER {
            if context.total_tokens() <= max_tokens {
                return;
            }
            while context.total_tokens() > max_tokens {
                let elements = context.layer_mut(layer);
                if elements.is_empty() {
                    break;
                }
                let (min_idx, _) = elements
                    .iter()
                    .enumerate()
                    .min_by(|(_, a), (_, b)| a.relevance_score.partial_cmp(&b.relevance_score).unwrap())
                    .unwrap();
                elements.remove(min_idx);
            }
        }
    }

    /// Scores how much of a completed response actually drew on the
    /// context it was given (§4.4). Citation matching always runs;
    /// semantic similarity only contributes when `embedder` is supplied
    /// and the element carries a precomputed embedding.
    pub fn record_utilization(
        &self,
        context: &mut AgentContext,
        response_text: &str,
        embedder: Option<&dyn ResponseEmbedder>,
        underutilized_threshold: f32,
    ) -> UtilizationReport {
        let response_embedding = embedder.and_then(|e| e.embed(response_text));

        let mut used = HashSet::new();
        let mut underutilized = Vec::new();
        let provisioned = context.provisioned_ids();

        let scores: Vec<(ElementId, f32)> = context
            .elements()
            .map(|element| {
                let cited = response_text.contains(element.id.as_str());
                let semantic = match (&response_embedding, &element.embedding) {
                    (Some(resp), Some(elem)) => cosine_similarity(resp, elem),
                    _ => 0.0,
                };
                let score = if cited { 1.0 } else { semantic };
                (element.id.clone(), score)
            })
            .collect();

        for (id, score) in &scores {
            if *score > 0.0 {
                used.insert(id.clone());
            }
            if *score < underutilized_threshold {
                underutilized.push(id.clone());
            }
        }

        context.referenced = used.intersection(&provisioned).cloned().collect();
        context.utilization_rate = if provisioned.is_empty() {
            0.0
        } else {
            context.referenced.len() as f32 / provisioned.len() as f32
        };

        UtilizationReport {
            utilization_rate: context.utilization_rate,
            underutilized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_broker::AuditLog;
    use aether_core::{AccessLevel, CategoryPolicy, ElementPrefix};

    fn provisioner(doctrinal_floor: usize) -> ContextProvisioner {
        let policies = [
            CategoryPolicy::new(InformationCategory::Doctrine, AccessLevel::Public),
            CategoryPolicy::new(InformationCategory::ThreatData, AccessLevel::Public),
        ];
        let mut broker = InformationBroker::new(policies, Arc::new(AuditLog::new()));
        broker.register_backend(Arc::new(aether_broker::InMemoryBackend::seed(
            InformationCategory::Doctrine,
            ElementPrefix::Doctrine,
            3,
        )));
        broker.register_backend(Arc::new(aether_broker::InMemoryBackend::seed(
            InformationCategory::ThreatData,
            ElementPrefix::Situational,
            5,
        )));

        let template = ContextTemplate {
            default_split: aether_core::ContextSplit::DEFAULT,
            phase_overrides: Vec::new(),
            doctrinal_floor,
        };

        ContextProvisioner::new(Arc::new(broker), template)
            .with_layer_source(ContextLayer::Doctrinal, InformationCategory::Doctrine)
            .with_layer_source(ContextLayer::Situational, InformationCategory::ThreatData)
    }

    fn profile() -> AgentProfile {
        AgentProfile::new(AgentId::now_v7(), "analyst", AccessLevel::Public)
            .with_categories([InformationCategory::Doctrine, InformationCategory::ThreatData])
    }

    #[tokio::test]
    async fn builds_context_within_budget() {
        let provisioner = provisioner(1);
        let context = provisioner
            .build(&profile(), Phase::Phase1, "threat posture", 1000)
            .await
            .unwrap();
        assert!(context.total_tokens() <= 1000);
        assert!(context.check_invariants().is_ok());
    }

    #[tokio::test]
    async fn second_build_is_served_from_cache() {
        let provisioner = provisioner(1);
        let profile = profile();
        let first = provisioner.build(&profile, Phase::Phase1, "threat posture", 1000).await.unwrap();
        let second = provisioner.build(&profile, Phase::Phase1, "threat posture", 1000).await.unwrap();
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn refresh_bypasses_cache() {
        let provisioner = provisioner(1);
        let profile = profile();
        let first = provisioner.build(&profile, Phase::Phase1, "threat posture", 1000).await.unwrap();
        let second = provisioner.refresh(&profile, Phase::Phase1, "threat posture", 1000).await.unwrap();
        assert_ne!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn doctrinal_floor_marks_context_degraded() {
        let provisioner = provisioner(10);
        let context = provisioner
            .build(&profile(), Phase::Phase1, "threat posture", 1000)
            .await
            .unwrap();
        assert!(context.degraded);
    }

    #[tokio::test]
    async fn tiny_budget_prunes_non_doctrinal_first() {
        let provisioner = provisioner(0);
        let context = provisioner
            .build(&profile(), Phase::Phase1, "threat posture", 5)
            .await
            .unwrap();
        assert!(context.total_tokens() <= 5);
    }

    proptest::proptest! {
        /// §4.4: "assembles ... under a hard token budget" — the assembled
        /// window never exceeds `max_tokens`, for any budget.
        #[test]
        fn build_never_exceeds_token_budget(max_tokens in 0u32..2000) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let provisioner = provisioner(0);
                let context = provisioner
                    .build(&profile(), Phase::Phase1, "threat posture", max_tokens)
                    .await
                    .unwrap();
                prop_assert!(context.total_tokens() <= max_tokens);
                Ok(())
            })?;
        }
    }

    #[test]
    fn literal_citation_drives_utilization() {
        let provisioner = provisioner(1);
        let id = ElementId::new(ElementPrefix::Doctrine);
        let element = ContextElement::new(id.clone(), ContextLayer::Doctrinal, "doctrine text", 0.9, 10);
        let mut context = AgentContext {
            agent_id: AgentId::now_v7(),
            phase: Phase::Phase1,
            task: "t".into(),
            doctrinal: vec![element],
            situational: Vec::new(),
            historical: Vec::new(),
            collaborative: Vec::new(),
            token_budget: 100,
            referenced: HashSet::new(),
            utilization_rate: 0.0,
            degraded: false,
            created_at: chrono::Utc::now(),
        };
        let response = format!("Plan cites {}", id.as_str());
        let report = provisioner.record_utilization(&mut context, &response, None, 0.5);
        assert_eq!(report.utilization_rate, 1.0);
        assert!(context.referenced.contains(&id));
    }
}
