//! The AetherOS kernel (§6): the single public API surface. Construction
//! wires every subsystem together and subscribes agent activation to the
//! Phase Orchestrator's event bus; everything else on [`Kernel`] is a thin,
//! authorization-aware delegation to exactly one subsystem.

mod report;
mod telemetry;

pub use report::{PerformanceReport, ProcessImprovementReport};
pub use telemetry::{init_tracing, TelemetryConfig};

use aether_agents::{AgentRuntime, Message, MessageHandler};
use aether_auth::{ActionRequest, DoctrineAdapter, ExternalPolicyClient};
use aether_broker::{AuditLog, BackendAdapter, InformationBroker, QueryParams, QueryResult};
use aether_context::ContextProvisioner;
use aether_core::{
    AetherError, AetherResult, AgentContext, AgentId, AgentProfile, AtoCycle, CategoryPolicy, CycleId, CycleSchedule,
    Decision, InformationCategory, KernelConfig, KernelError, Phase,
};
use aether_events::{PhaseEvent, PhaseEventBus, PhaseEventHandler};
use aether_llm::{CompletionRequest, LlmProvider, ProviderRegistry, StructuredResponse};
use aether_orchestrator::PhaseOrchestrator;
use aether_pi::FlagLog;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Subscribed to the orchestrator's event bus at construction time;
/// (de)activates agents per `active_agent_ids` on every phase boundary.
/// Synchronous because [`aether_events::PhaseEventHandler::handle`] is
/// synchronous and `AgentRuntime`'s activation methods were made
/// synchronous for exactly this reason.
struct ActivationHandler {
    runtime: Arc<AgentRuntime>,
    schedule: CycleSchedule,
}

impl PhaseEventHandler for ActivationHandler {
    fn handle(&self, event: &PhaseEvent) -> Result<(), String> {
        match event {
            PhaseEvent::Entered { phase, .. } => {
                for agent_id in self.schedule.active_agents(*phase) {
                    self.runtime.activate(agent_id);
                }
            }
            PhaseEvent::Exited { phase, .. } => {
                for agent_id in self.schedule.active_agents(*phase) {
                    self.runtime.deactivate(agent_id);
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "kernel_activation_handler"
    }
}

/// The AetherOS kernel (§6). One instance per deployment, built once from a
/// validated [`KernelConfig`] plus the external interfaces a deployment
/// supplies: category backends and a doctrine adapter.
pub struct Kernel {
    orchestrator: Arc<PhaseOrchestrator>,
    broker: Arc<InformationBroker>,
    schedule: CycleSchedule,
    policies: HashMap<InformationCategory, CategoryPolicy>,
    context: Arc<ContextProvisioner>,
    flag_log: Arc<FlagLog>,
    runtime: Arc<AgentRuntime>,
    llm: Arc<ProviderRegistry>,
    doctrine: Arc<dyn DoctrineAdapter>,
    external_policy: Arc<ExternalPolicyClient>,
}

impl Kernel {
    /// Validates `config`, registers `backends` into a fresh
    /// [`InformationBroker`], and subscribes agent activation to the
    /// orchestrator's phase transitions.
    ///
    /// Backends and the doctrine adapter are constructor parameters rather
    /// than config fields: `InformationBroker::register_backend` takes
    /// `&mut self`, and the kernel shares the broker immutably (via `Arc`)
    /// with the Context Provisioner from the moment it's built, so there's
    /// no later point at which `&mut self` access would be possible. §6
    /// treats backends and the doctrine KB as external interfaces distinct
    /// from the configuration surface anyway.
    pub fn new(
        config: KernelConfig,
        backends: Vec<Arc<dyn BackendAdapter>>,
        doctrine: Arc<dyn DoctrineAdapter>,
    ) -> Result<Self, KernelError> {
        config.validate().map_err(KernelError::InvalidConfig)?;

        let policies: HashMap<InformationCategory, CategoryPolicy> =
            config.access_policies.iter().cloned().map(|p| (p.category, p)).collect();

        let mut broker = InformationBroker::new(config.access_policies.clone(), Arc::new(AuditLog::new()));
        for backend in backends {
            broker.register_backend(backend);
        }
        let broker = Arc::new(broker);

        let context = Arc::new(ContextProvisioner::new(broker.clone(), config.context_template.clone()));
        let flag_log = Arc::new(FlagLog::new(config.pi_thresholds));

        let bus = Arc::new(PhaseEventBus::new());
        let orchestrator = Arc::new(PhaseOrchestrator::new(config.cycle_schedule.clone(), bus));
        let runtime = Arc::new(AgentRuntime::new(orchestrator.clone(), context.clone(), flag_log.clone()));

        orchestrator.subscribe(Arc::new(ActivationHandler {
            runtime: runtime.clone(),
            schedule: config.cycle_schedule.clone(),
        }));

        let llm = Arc::new(ProviderRegistry::new(config.llm_retry.clone(), config.auth_circuit_breaker));

        let external_policy = Arc::new(match &config.external_policy_url {
            Some(url) => ExternalPolicyClient::new(url.clone(), &config.external_policy_package, config.auth_circuit_breaker),
            None => ExternalPolicyClient::unconfigured(),
        });

        for profile in config.agent_profiles {
            runtime.register_agent(profile);
        }

        Ok(Self {
            orchestrator,
            broker,
            schedule: config.cycle_schedule,
            policies,
            context,
            flag_log,
            runtime,
            llm,
            doctrine,
            external_policy,
        })
    }

    /// Register an agent outside initial configuration, e.g. a
    /// reinforcement arriving mid-cycle (§4.6).
    pub fn register_agent(&self, profile: AgentProfile) {
        self.runtime.register_agent(profile);
    }

    pub fn register_message_handler(&self, agent_id: AgentId, handler: Arc<dyn MessageHandler>) {
        self.runtime.register_handler(agent_id, handler);
    }

    pub fn activate_agent(&self, agent_id: AgentId) {
        self.runtime.activate(agent_id);
    }

    pub fn deactivate_agent(&self, agent_id: AgentId) {
        self.runtime.deactivate(agent_id);
    }

    pub fn is_agent_active(&self, agent_id: AgentId) -> bool {
        self.runtime.is_active(agent_id)
    }

    /// §4.1: starts a new ATO cycle at PHASE1. The activation handler fires
    /// synchronously as part of this call, so every agent with PHASE1 in
    /// its `active_agent_ids` is active by the time this returns.
    pub fn start_cycle(&self, cycle_id: CycleId, now: DateTime<Utc>) -> AetherResult<AtoCycle> {
        Ok(self.orchestrator.start_cycle(cycle_id, now)?)
    }

    pub fn current_phase(&self) -> AetherResult<Phase> {
        Ok(self.orchestrator.current_phase()?)
    }

    pub fn current_cycle(&self) -> AetherResult<AtoCycle> {
        Ok(self.orchestrator.current_cycle()?)
    }

    /// §4.1: advance to the next phase in the transition graph.
    pub fn advance_phase(&self, now: DateTime<Utc>) -> AetherResult<Phase> {
        let (phase, failures) = self.orchestrator.advance(now)?;
        log_handler_failures(&failures);
        Ok(phase)
    }

    /// §4.1: wall-clock-driven advance, carrying through however many
    /// phases `now` has passed since the last tick.
    pub fn tick(&self, now: DateTime<Utc>) -> AetherResult<Vec<Phase>> {
        let outcome = self.orchestrator.tick(now)?;
        log_handler_failures(&outcome.failures);
        Ok(outcome.transitioned)
    }

    /// §4.1 edge case: jump past the single next-phase step. Critical
    /// phases can never be skipped over; non-critical ones require
    /// `override_reason`.
    pub fn skip_to_phase(&self, target: Phase, now: DateTime<Utc>, override_reason: Option<String>) -> AetherResult<Phase> {
        Ok(self.orchestrator.skip_to(target, now, override_reason)?)
    }

    /// §4.3: the sole entry point for a categorized information read. Looks
    /// the requesting agent's profile up from the runtime so callers never
    /// have to carry their own copy of it.
    pub async fn query_information(
        &self,
        agent_id: AgentId,
        category: InformationCategory,
        params: QueryParams,
        deadline: Option<Duration>,
    ) -> AetherResult<QueryResult> {
        let profile = self.runtime.profile(agent_id).ok_or(KernelError::NotRegistered(agent_id))?;
        Ok(self.broker.query(&profile, category, params, deadline).await?)
    }

    /// §4.2: evaluate all six authorization factors for `request`.
    pub async fn authorize_action(&self, agent_id: AgentId, request: ActionRequest) -> AetherResult<Decision> {
        let profile = self.runtime.profile(agent_id).ok_or(KernelError::NotRegistered(agent_id))?;
        let cycle = self.orchestrator.current_cycle()?;
        Ok(aether_auth::authorize(
            &profile,
            &self.policies,
            &self.schedule,
            cycle.current_phase,
            cycle.cycle_id,
            &request,
            self.doctrine.as_ref(),
            &self.external_policy,
        )
        .await)
    }

    /// §4.4: build a phase- and task-scoped context for `agent_id`.
    pub async fn request_context(&self, agent_id: AgentId, task: impl Into<String>, max_tokens: u32) -> AetherResult<AgentContext> {
        Ok(self.runtime.request_context(agent_id, task, max_tokens).await?)
    }

    /// §4.6: point-to-point message between two active agents.
    pub async fn send_agent_message(
        &self,
        from: AgentId,
        to: AgentId,
        message_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> AetherResult<Message> {
        Ok(self.runtime.send_message(from, to, message_type, payload).await?)
    }

    /// §4.6: escalate to a human operator; always succeeds.
    pub fn escalate_to_human(&self, agent_id: AgentId, reason: impl Into<String>, payload: serde_json::Value) -> aether_agents::Escalation {
        self.runtime.escalate_to_human(agent_id, reason, payload)
    }

    pub async fn register_llm_provider(&self, provider: Arc<dyn LlmProvider>) {
        self.llm.register(provider).await;
    }

    /// §4.7: dispatch a structured completion request through the
    /// registered provider chain.
    pub async fn dispatch_completion<T: serde::de::DeserializeOwned>(
        &self,
        request: CompletionRequest,
    ) -> AetherResult<StructuredResponse<T>> {
        Ok(self.llm.dispatch(request).await?)
    }

    /// §4.5: every flag raised so far plus the recurring-pattern
    /// recommendations mined from them.
    pub fn process_improvement_report(&self) -> ProcessImprovementReport {
        ProcessImprovementReport {
            flags: self.flag_log.flags(),
            recommendations: self.flag_log.analyze_patterns(),
        }
    }

    /// §4.5: per-agent rollup across the given cycles — flag counts by
    /// type and total hours wasted, the shape a commander reviewing one
    /// agent's standing wants rather than the raw append-only log.
    pub fn performance_report(&self, agent_id: AgentId, cycles: &[CycleId]) -> PerformanceReport {
        let cycle_set: HashSet<CycleId> = cycles.iter().copied().collect();
        let relevant: Vec<_> = self
            .flag_log
            .flags()
            .into_iter()
            .filter(|f| f.agent_id == agent_id && cycle_set.contains(&f.cycle_id))
            .collect();

        let mut flags_by_type = HashMap::new();
        let mut total_hours_wasted = 0.0;
        for flag in &relevant {
            *flags_by_type.entry(flag.flag_type).or_insert(0u32) += 1;
            total_hours_wasted += flag.time_wasted_hours.unwrap_or(0.0);
        }

        PerformanceReport {
            agent_id,
            cycles_considered: cycles.to_vec(),
            total_flags: relevant.len(),
            flags_by_type,
            total_hours_wasted,
        }
    }
}

fn log_handler_failures(failures: &[aether_events::HandlerFailure]) {
    for failure in failures {
        tracing::warn!(handler = %failure.handler_name, reason = %failure.reason, "phase event handler failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_broker::InMemoryBackend;
    use aether_core::{
        AccessLevel, CircuitBreakerConfig, ContextSplit, ContextTemplate, ElementId, ElementPrefix, InefficiencyType,
        PhaseConfig, PiThresholds, RetryConfig,
    };
    use aether_test_utils::{sample_profile, standard_72_hour_schedule, EchoHandler};

    fn config(profiles: Vec<AgentProfile>) -> KernelConfig {
        KernelConfig {
            agent_profiles: profiles,
            access_policies: vec![CategoryPolicy::new(InformationCategory::ThreatData, AccessLevel::Public)],
            cycle_schedule: standard_72_hour_schedule(),
            context_template: ContextTemplate {
                default_split: ContextSplit::DEFAULT,
                phase_overrides: Vec::new(),
                doctrinal_floor: 0,
            },
            pi_thresholds: PiThresholds::default(),
            auth_circuit_breaker: CircuitBreakerConfig::default(),
            llm_retry: RetryConfig::default(),
            external_policy_url: None,
            external_policy_package: "aetheros.policy".to_string(),
        }
    }

    fn backend() -> Arc<dyn BackendAdapter> {
        Arc::new(InMemoryBackend::new(
            InformationCategory::ThreatData,
            vec![aether_broker::InformationRecord::new(ElementId::new(ElementPrefix::Situational))
                .with_field("summary", "SA-2 battery")],
        ))
    }

    #[tokio::test]
    async fn full_lifecycle_register_cycle_query_authorize_message() {
        let profile = sample_profile("analyst", AccessLevel::Operational).with_actions(["brief".to_string()]);
        let agent_id = profile.id;
        let receiver = sample_profile("planner", AccessLevel::Operational);
        let receiver_id = receiver.id;

        let kernel = Kernel::new(config(vec![profile, receiver]), vec![backend()], Arc::new(aether_auth::AlwaysCompliant)).unwrap();
        kernel.register_message_handler(receiver_id, Arc::new(EchoHandler));

        let cycle_id = CycleId::now_v7();
        kernel.start_cycle(cycle_id, Utc::now()).unwrap();
        assert_eq!(kernel.current_phase().unwrap(), Phase::Phase1);
        kernel.activate_agent(agent_id);
        kernel.activate_agent(receiver_id);
        assert!(kernel.is_agent_active(agent_id));

        let result = kernel
            .query_information(agent_id, InformationCategory::ThreatData, QueryParams::new(""), None)
            .await
            .unwrap();
        assert_eq!(result.records.len(), 1);

        let decision = kernel.authorize_action(agent_id, ActionRequest::new("brief")).await.unwrap();
        assert!(decision.allow);

        let reply = kernel
            .send_agent_message(agent_id, receiver_id, "ping", serde_json::json!({"n": 1}))
            .await
            .unwrap();
        assert_eq!(reply.payload, serde_json::json!({"n": 1}));
    }

    #[tokio::test]
    async fn advance_phase_deactivates_agents_outside_their_window() {
        let profile = sample_profile("phase1_only", AccessLevel::Operational).with_active_phases([Phase::Phase1]);
        let agent_id = profile.id;

        let kernel = Kernel::new(config(vec![profile]), vec![backend()], Arc::new(aether_auth::AlwaysCompliant)).unwrap();

        kernel.start_cycle(CycleId::now_v7(), Utc::now()).unwrap();
        kernel.activate_agent(agent_id);
        assert!(kernel.is_agent_active(agent_id));

        kernel.advance_phase(Utc::now()).unwrap();
        assert!(!kernel.is_agent_active(agent_id));
    }

    #[tokio::test]
    async fn schedule_active_agents_drive_automatic_activation() {
        let profile = sample_profile("analyst", AccessLevel::Operational);
        let agent_id = profile.id;
        let mut cfg = config(vec![profile]);
        cfg.cycle_schedule.phases[0] = PhaseConfig::new(Phase::Phase1, 8.0, 0.0).with_active_agents([agent_id]);

        let kernel = Kernel::new(cfg, vec![], Arc::new(aether_auth::AlwaysCompliant)).unwrap();
        assert!(!kernel.is_agent_active(agent_id));

        kernel.start_cycle(CycleId::now_v7(), Utc::now()).unwrap();
        assert!(kernel.is_agent_active(agent_id));

        kernel.advance_phase(Utc::now()).unwrap();
        assert!(!kernel.is_agent_active(agent_id));
    }

    #[tokio::test]
    async fn unregistered_agent_query_returns_kernel_error() {
        let kernel = Kernel::new(config(vec![]), vec![backend()], Arc::new(aether_auth::AlwaysCompliant)).unwrap();
        let result = kernel
            .query_information(AgentId::now_v7(), InformationCategory::ThreatData, QueryParams::default(), None)
            .await;
        assert!(matches!(result, Err(AetherError::Kernel(KernelError::NotRegistered(_)))));
    }

    #[test]
    fn invalid_config_is_rejected_before_any_wiring() {
        let mut bad = config(vec![]);
        bad.cycle_schedule.phases.pop();
        let result = Kernel::new(bad, vec![], Arc::new(aether_auth::AlwaysCompliant));
        assert!(matches!(result, Err(KernelError::InvalidConfig(_))));
    }

    #[test]
    fn performance_report_aggregates_flags_by_type() {
        let kernel = Kernel::new(config(vec![]), vec![], Arc::new(aether_auth::AlwaysCompliant)).unwrap();
        let agent_id = AgentId::now_v7();
        let cycle_id = CycleId::now_v7();
        kernel.flag_log.check_timing(cycle_id, Phase::Phase1, agent_id, "targeting", 1.0, 5.0);

        let report = kernel.performance_report(agent_id, &[cycle_id]);
        assert_eq!(report.total_flags, 1);
        assert_eq!(report.flags_by_type.get(&InefficiencyType::TimingConstraint), Some(&1));
    }
}
