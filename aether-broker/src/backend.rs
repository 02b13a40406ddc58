//! Category backend adapters.
//!
//! Narrow per-category async traits, mirroring the teacher's narrow
//! per-entity `AsyncStorageTrait` methods but split one trait per category
//! instead of one trait with every entity's CRUD surface, since each
//! category here is backed by an independent system in a real deployment
//! (doctrine KB, threat database, spectrum planner, ...).

use aether_core::{AgentId, BrokerError, ElementId, ElementPrefix, InformationCategory};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Free-text query params passed through to a backend. Kept deliberately
/// unstructured since each category's backend interprets it differently;
/// the broker never inspects the contents itself.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pub query: String,
    pub limit: Option<usize>,
}

impl QueryParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: None,
        }
    }
}

/// One record returned by a backend, already stamped with a globally
/// unique typed-prefix element ID (§3: "Elements are the citation unit").
/// `fields` is category-shaped JSON; the sanitizer strips keys by name, so
/// backends are free to vary their schema per category.
#[derive(Debug, Clone, PartialEq)]
pub struct InformationRecord {
    pub element_id: ElementId,
    pub fields: Map<String, Value>,
}

impl InformationRecord {
    pub fn new(element_id: ElementId) -> Self {
        Self {
            element_id,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// A single category's backend. Real deployments implement this against
/// whatever system of record backs that category; this crate ships only
/// [`InMemoryBackend`] for tests and local development.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn category(&self) -> InformationCategory;

    async fn query(&self, requester: AgentId, params: &QueryParams) -> Result<Vec<InformationRecord>, BrokerError>;
}

/// In-memory backend seeded with a fixed record set, used for tests and by
/// [`aether_test_utils`](../aether_test_utils) fixtures. `query` does a
/// case-insensitive substring match against field values when `query` is
/// non-empty, otherwise returns every record.
pub struct InMemoryBackend {
    category: InformationCategory,
    records: Vec<InformationRecord>,
}

impl InMemoryBackend {
    pub fn new(category: InformationCategory, records: Vec<InformationRecord>) -> Self {
        Self { category, records }
    }

    pub fn seed(category: InformationCategory, prefix: ElementPrefix, count: usize) -> Self {
        let records = (0..count)
            .map(|i| {
                InformationRecord::new(ElementId::new(prefix))
                    .with_field("summary", format!("{category} record {i}"))
            })
            .collect();
        Self::new(category, records)
    }
}

#[async_trait]
impl BackendAdapter for InMemoryBackend {
    fn category(&self) -> InformationCategory {
        self.category
    }

    async fn query(&self, _requester: AgentId, params: &QueryParams) -> Result<Vec<InformationRecord>, BrokerError> {
        let matches: Vec<InformationRecord> = self
            .records
            .iter()
            .filter(|r| {
                params.query.is_empty()
                    || r.fields.values().any(|v| {
                        v.as_str()
                            .map(|s| s.to_ascii_lowercase().contains(&params.query.to_ascii_lowercase()))
                            .unwrap_or(false)
                    })
            })
            .cloned()
            .collect();

        let limited = match params.limit {
            Some(n) => matches.into_iter().take(n).collect(),
            None => matches,
        };
        Ok(limited)
    }
}
