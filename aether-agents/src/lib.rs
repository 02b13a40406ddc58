//! Agent Runtime (§4.6): the base surface every registered agent runs
//! against — context requisition, instrumented doctrinal procedures,
//! point-to-point messaging, and human escalation — gated on whether the
//! agent is currently active per the Phase Orchestrator.

use aether_context::ContextProvisioner;
use aether_core::{
    AetherError, AgentContext, AgentId, AgentProfile, AgentRuntimeError, CycleId, MessageId, Phase, Timestamp,
};
use aether_orchestrator::PhaseOrchestrator;
use aether_pi::FlagLog;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as TokioMutex;

/// A point-to-point message between two agents (§4.6). The payload is
/// deliberately untyped JSON; each `message_type` defines its own shape.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub from: AgentId,
    pub to: AgentId,
    pub message_type: String,
    pub payload: serde_json::Value,
    pub sent_at: Timestamp,
}

impl Message {
    fn new(from: AgentId, to: AgentId, message_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: MessageId::now_v7(),
            from,
            to,
            message_type: message_type.into(),
            payload,
            sent_at: chrono::Utc::now(),
        }
    }
}

/// Handles inbound messages for one agent and produces the reply payload.
/// Registered per agent with [`AgentRuntime::register_handler`].
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<serde_json::Value, String>;
}

/// A record of a human escalation raised via
/// [`AgentRuntime::escalate_to_human`] (§4.6).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Escalation {
    pub agent_id: AgentId,
    pub reason: String,
    pub payload: serde_json::Value,
    pub raised_at: Timestamp,
}

/// The Agent Runtime (§4.6). One instance per kernel, shared across every
/// registered agent.
pub struct AgentRuntime {
    profiles: RwLock<HashMap<AgentId, AgentProfile>>,
    activated: RwLock<HashSet<AgentId>>,
    handlers: RwLock<HashMap<AgentId, Arc<dyn MessageHandler>>>,
    /// One lock per ordered sender/receiver pair, held for the full
    /// request/reply round trip so concurrent callers to the same pair
    /// are served in the order they acquire it (§4.6: "per pair FIFO").
    pair_locks: TokioMutex<HashMap<(AgentId, AgentId), Arc<TokioMutex<()>>>>,
    orchestrator: Arc<PhaseOrchestrator>,
    context: Arc<ContextProvisioner>,
    flag_log: Arc<FlagLog>,
    escalations: RwLock<Vec<Escalation>>,
}

impl AgentRuntime {
    pub fn new(orchestrator: Arc<PhaseOrchestrator>, context: Arc<ContextProvisioner>, flag_log: Arc<FlagLog>) -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            activated: RwLock::new(HashSet::new()),
            handlers: RwLock::new(HashMap::new()),
            pair_locks: TokioMutex::new(HashMap::new()),
            orchestrator,
            context,
            flag_log,
            escalations: RwLock::new(Vec::new()),
        }
    }

    pub fn register_agent(&self, profile: AgentProfile) {
        let id = profile.id;
        self.profiles.write().expect("agent runtime lock poisoned").insert(id, profile);
    }

    pub fn register_handler(&self, agent_id: AgentId, handler: Arc<dyn MessageHandler>) {
        self.handlers.write().expect("agent runtime lock poisoned").insert(agent_id, handler);
    }

    pub fn profile(&self, agent_id: AgentId) -> Option<AgentProfile> {
        self.profiles.read().expect("agent runtime lock poisoned").get(&agent_id).cloned()
    }

    /// §4.6 activation gate: an agent may send or receive only while the
    /// kernel has explicitly activated it (normally driven by a
    /// `PhaseEventHandler` wired to `active_agent_ids`, which is why this
    /// is synchronous rather than async — a sync event handler can call it
    /// directly) *and* its profile permits acting in the orchestrator's
    /// current phase.
    pub fn activate(&self, agent_id: AgentId) {
        self.activated.write().expect("agent runtime lock poisoned").insert(agent_id);
    }

    pub fn deactivate(&self, agent_id: AgentId) {
        self.activated.write().expect("agent runtime lock poisoned").remove(&agent_id);
    }

    pub fn is_active(&self, agent_id: AgentId) -> bool {
        if !self.activated.read().expect("agent runtime lock poisoned").contains(&agent_id) {
            return false;
        }
        let Ok(phase) = self.orchestrator.current_phase() else {
            return false;
        };
        self.profiles
            .read()
            .expect("agent runtime lock poisoned")
            .get(&agent_id)
            .map(|p| p.can_act_in(phase))
            .unwrap_or(false)
    }

    fn ensure_active(&self, agent_id: AgentId) -> Result<(), AetherError> {
        if self.is_active(agent_id) {
            Ok(())
        } else {
            Err(AgentRuntimeError::NotActive(agent_id).into())
        }
    }

    /// §4.6: `request_context(task, max_tokens)`.
    pub async fn request_context(
        &self,
        agent_id: AgentId,
        task: impl Into<String>,
        max_tokens: u32,
    ) -> Result<AgentContext, AetherError> {
        self.ensure_active(agent_id)?;
        let profile = self
            .profiles
            .read()
            .expect("agent runtime lock poisoned")
            .get(&agent_id)
            .cloned()
            .ok_or(AgentRuntimeError::NotRegistered(agent_id))?;
        let phase = self.orchestrator.current_phase()?;
        Ok(self.context.build(&profile, phase, task, max_tokens).await?)
    }

    /// §4.5's instrumentation contract: records `t_start`, invokes `body`,
    /// records `t_end`, and raises a TIMING_CONSTRAINT flag when the
    /// elapsed time overruns `expected_hours` by the configured ratio.
    pub async fn execute_doctrinal_procedure<F, Fut, T, E>(
        &self,
        cycle_id: CycleId,
        phase: Phase,
        agent_id: AgentId,
        workflow: impl Into<String> + Clone,
        expected_hours: f64,
        body: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let t_start = Instant::now();
        let result = body().await;
        let elapsed_hours = t_start.elapsed().as_secs_f64() / 3600.0;
        self.flag_log
            .check_timing(cycle_id, phase, agent_id, workflow, expected_hours, elapsed_hours);
        result
    }

    fn pair_key(from: AgentId, to: AgentId) -> (AgentId, AgentId) {
        (from, to)
    }

    async fn pair_lock(&self, from: AgentId, to: AgentId) -> Arc<TokioMutex<()>> {
        let mut locks = self.pair_locks.lock().await;
        locks
            .entry(Self::pair_key(from, to))
            .or_insert_with(|| Arc::new(TokioMutex::new(())))
            .clone()
    }

    /// §4.6: point-to-point request/reply. Both sender and receiver must
    /// be active in the current phase; an undeliverable message fails
    /// with `NotActive` rather than buffering.
    pub async fn send_message(
        &self,
        from: AgentId,
        to: AgentId,
        message_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<Message, AetherError> {
        self.ensure_active(from)?;
        self.ensure_active(to)?;

        let lock = self.pair_lock(from, to).await;
        let _guard = lock.lock().await;

        let message = Message::new(from, to, message_type, payload);
        let handler = self
            .handlers
            .read()
            .expect("agent runtime lock poisoned")
            .get(&to)
            .cloned()
            .ok_or(AgentRuntimeError::NotActive(to))?;

        let reply_payload = handler
            .handle(&message)
            .await
            .map_err(|_| AgentRuntimeError::NotActive(to))?;

        Ok(Message::new(to, from, format!("{}_reply", message.message_type), reply_payload))
    }

    /// Delivers to every currently active agent except `from`. Reply
    /// aggregation is best-effort: a receiver that doesn't answer within
    /// `timeout` is simply missing from the result, not an error for the
    /// whole broadcast.
    pub async fn broadcast(
        &self,
        from: AgentId,
        message_type: impl Into<String> + Clone,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Vec<(AgentId, Option<Message>)> {
        let recipients: Vec<AgentId> = {
            let activated = self.activated.read().expect("agent runtime lock poisoned");
            activated.iter().copied().filter(|id| *id != from).collect()
        };

        let mut replies = Vec::new();
        for to in recipients {
            let reply = tokio::time::timeout(timeout, self.send_message(from, to, message_type.clone(), payload.clone()))
                .await
                .ok()
                .and_then(|r| r.ok());
            replies.push((to, reply));
        }
        replies
    }

    /// §4.6: escalate to a human operator. Always succeeds; the caller's
    /// job is to continue once it returns, not to block on a resolution.
    pub fn escalate_to_human(
        &self,
        agent_id: AgentId,
        reason: impl Into<String>,
        payload: serde_json::Value,
    ) -> Escalation {
        let escalation = Escalation {
            agent_id,
            reason: reason.into(),
            payload,
            raised_at: chrono::Utc::now(),
        };
        tracing::warn!(agent_id = %agent_id, reason = %escalation.reason, "agent escalated to human operator");
        self.escalations.write().expect("agent runtime lock poisoned").push(escalation.clone());
        escalation
    }

    pub fn escalations(&self) -> Vec<Escalation> {
        self.escalations.read().expect("agent runtime lock poisoned").clone()
    }
}
