//! Information Broker (§4.3): the single entry point for every
//! cross-category read. `query` authorizes against the category policy,
//! routes to the category's backend, sanitizes when the policy requires
//! it, and audits when the policy requires it — in that fixed order.

pub mod audit;
pub mod backend;
pub mod sanitize;

pub use audit::AuditLog;
pub use backend::{BackendAdapter, InMemoryBackend, InformationRecord, QueryParams};
pub use sanitize::{FieldVisibilitySanitizer, Sanitizer};

use aether_core::{AgentProfile, BrokerError, CategoryPolicy, ElementId, InformationCategory};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Everything a successful query returns: the (possibly sanitized)
/// records, plus the set of element IDs supplied — the citation unit the
/// Context Provisioner tracks against `referenced` (§3, §4.4).
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub records: Vec<InformationRecord>,
    pub provisioned: HashSet<ElementId>,
}

/// The Information Broker (§4.3). One instance is shared across every
/// agent in a kernel; `query` is reentrant and safe under parallel
/// callers (§5).
pub struct InformationBroker {
    backends: HashMap<InformationCategory, Arc<dyn BackendAdapter>>,
    policies: HashMap<InformationCategory, CategoryPolicy>,
    sanitizers: HashMap<InformationCategory, Arc<dyn Sanitizer>>,
    audit_log: Arc<AuditLog>,
}

impl InformationBroker {
    pub fn new(policies: impl IntoIterator<Item = CategoryPolicy>, audit_log: Arc<AuditLog>) -> Self {
        Self {
            backends: HashMap::new(),
            policies: policies.into_iter().map(|p| (p.category, p)).collect(),
            sanitizers: HashMap::new(),
            audit_log,
        }
    }

    pub fn register_backend(&mut self, backend: Arc<dyn BackendAdapter>) {
        self.backends.insert(backend.category(), backend);
    }

    /// Override the default field-visibility sanitizer for a category.
    pub fn register_sanitizer(&mut self, category: InformationCategory, sanitizer: Arc<dyn Sanitizer>) {
        self.sanitizers.insert(category, sanitizer);
    }

    /// Single entry point for all cross-category reads (§4.3).
    pub async fn query(
        &self,
        profile: &AgentProfile,
        category: InformationCategory,
        params: QueryParams,
        deadline: Option<Duration>,
    ) -> Result<QueryResult, BrokerError> {
        let policy = self.policies.get(&category);

        // 1. Authorize.
        if !profile.has_category(category) {
            return Err(BrokerError::Unauthorized {
                agent_id: profile.id,
                category,
            });
        }
        if let Some(policy) = policy {
            if profile.access_level < policy.min_level {
                return Err(BrokerError::Unauthorized {
                    agent_id: profile.id,
                    category,
                });
            }
        }

        // 2. Route to the backend.
        let backend = self
            .backends
            .get(&category)
            .ok_or(BrokerError::Unavailable(category))?;

        let query_future = backend.query(profile.id, &params);
        let mut records = match deadline {
            Some(d) => tokio::time::timeout(d, query_future)
                .await
                .map_err(|_| BrokerError::DeadlineExceeded(category))??,
            None => query_future.await?,
        };

        // 3. Sanitize, if the policy requires it.
        let sanitized = policy.map(|p| p.sanitize).unwrap_or(false);
        if sanitized {
            let sanitizer = self.sanitizer_for(category);
            records = records
                .into_iter()
                .map(|r| sanitizer.sanitize(r, profile.access_level))
                .collect();
        }

        let provisioned: HashSet<ElementId> = records.iter().map(|r| r.element_id.clone()).collect();

        // 4. Audit, if the policy requires it.
        if policy.map(|p| p.audit).unwrap_or(true) {
            self.audit_log.append(
                profile.id,
                category,
                params.query.clone(),
                "allow".to_string(),
                profile.access_level,
                sanitized,
            );
        }

        Ok(QueryResult { records, provisioned })
    }

    fn sanitizer_for(&self, category: InformationCategory) -> Arc<dyn Sanitizer> {
        if let Some(custom) = self.sanitizers.get(&category) {
            return custom.clone();
        }
        match category {
            InformationCategory::ThreatData => Arc::new(FieldVisibilitySanitizer::threat_data_default()),
            InformationCategory::MissionPlan => Arc::new(FieldVisibilitySanitizer::mission_plan_default()),
            _ => Arc::new(FieldVisibilitySanitizer::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_core::{AccessLevel, AgentId, ElementPrefix};

    fn profile(access_level: AccessLevel, categories: impl IntoIterator<Item = InformationCategory>) -> AgentProfile {
        AgentProfile::new(AgentId::now_v7(), "analyst", access_level).with_categories(categories)
    }

    fn broker() -> InformationBroker {
        let policy = CategoryPolicy::new(InformationCategory::ThreatData, AccessLevel::Internal).sanitized();
        let mut broker = InformationBroker::new([policy], Arc::new(AuditLog::new()));
        broker.register_backend(Arc::new(InMemoryBackend::new(
            InformationCategory::ThreatData,
            vec![InformationRecord::new(ElementId::new(ElementPrefix::Situational))
                .with_field("precise_geolocation", "47.6,-122.3")
                .with_field("region", "PACNORTHWEST")],
        )));
        broker
    }

    #[tokio::test]
    async fn unauthorized_category_is_rejected() {
        let broker = broker();
        let profile = profile(AccessLevel::Internal, []);
        let result = broker
            .query(&profile, InformationCategory::ThreatData, QueryParams::default(), None)
            .await;
        assert!(matches!(result, Err(BrokerError::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn insufficient_clearance_is_rejected() {
        let broker = broker();
        let profile = profile(AccessLevel::Public, [InformationCategory::ThreatData]);
        let result = broker
            .query(&profile, InformationCategory::ThreatData, QueryParams::default(), None)
            .await;
        assert!(matches!(result, Err(BrokerError::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn missing_backend_is_unavailable() {
        let policy = CategoryPolicy::new(InformationCategory::MissionPlan, AccessLevel::Internal);
        let broker = InformationBroker::new([policy], Arc::new(AuditLog::new()));
        let profile = profile(AccessLevel::Critical, [InformationCategory::MissionPlan]);
        let result = broker
            .query(&profile, InformationCategory::MissionPlan, QueryParams::default(), None)
            .await;
        assert!(matches!(result, Err(BrokerError::Unavailable(_))));
    }

    #[tokio::test]
    async fn sanitizes_below_clearance_and_audits() {
        let broker = broker();
        let audit_log = broker.audit_log.clone();
        let profile = profile(AccessLevel::Internal, [InformationCategory::ThreatData]);

        let result = broker
            .query(&profile, InformationCategory::ThreatData, QueryParams::default(), None)
            .await
            .unwrap();

        assert_eq!(result.records.len(), 1);
        assert!(!result.records[0].fields.contains_key("precise_geolocation"));
        assert_eq!(result.provisioned.len(), 1);
        assert_eq!(audit_log.entries().len(), 1);
        assert!(audit_log.entries()[0].sanitized);
    }

    #[tokio::test]
    async fn deadline_exceeded_maps_to_correct_error() {
        struct SlowBackend;

        #[async_trait::async_trait]
        impl BackendAdapter for SlowBackend {
            fn category(&self) -> InformationCategory {
                InformationCategory::ThreatData
            }

            async fn query(
                &self,
                _requester: AgentId,
                _params: &QueryParams,
            ) -> Result<Vec<InformationRecord>, BrokerError> {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(Vec::new())
            }
        }

        let policy = CategoryPolicy::new(InformationCategory::ThreatData, AccessLevel::Internal);
        let mut broker = InformationBroker::new([policy], Arc::new(AuditLog::new()));
        broker.register_backend(Arc::new(SlowBackend));
        let profile = profile(AccessLevel::Internal, [InformationCategory::ThreatData]);

        let result = broker
            .query(
                &profile,
                InformationCategory::ThreatData,
                QueryParams::default(),
                Some(Duration::from_millis(1)),
            )
            .await;
        assert!(matches!(result, Err(BrokerError::DeadlineExceeded(_))));
    }
}
