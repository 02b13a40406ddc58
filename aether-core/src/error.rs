//! Error taxonomy for AetherOS operations (§7).
//!
//! Each subsystem gets its own `thiserror`-derived enum; the kernel
//! boundary returns the composed `AetherError`. No exception ever escapes
//! the kernel boundary (§7) — every fallible public API returns
//! `AetherResult<T>`.

use crate::{AccessLevel, AgentId, InformationCategory, Phase};
use thiserror::Error;

/// Authorization Engine errors (§4.2, §7).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AuthError {
    #[error("unauthorized: {0:?}")]
    Unauthorized(Vec<String>),

    #[error("agent {0} not active in current phase")]
    NotActive(AgentId),

    #[error("external policy evaluator unavailable")]
    PolicyUnavailable,

    #[error("delegation depth {depth} exceeds maximum {max}")]
    DelegationDepthExceeded { depth: u8, max: u8 },

    #[error("emergency reallocation missing approved_by_rank")]
    MissingEmergencyApproval,
}

/// Information Broker errors (§4.3, §7).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BrokerError {
    #[error("agent {agent_id} unauthorized for category {category}")]
    Unauthorized {
        agent_id: AgentId,
        category: InformationCategory,
    },

    #[error("backend unavailable for category {0}")]
    Unavailable(InformationCategory),

    #[error("deadline exceeded querying category {0}")]
    DeadlineExceeded(InformationCategory),
}

/// Phase Orchestrator errors (§4.1, §7).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OrchestratorError {
    #[error("a cycle is already active")]
    AlreadyActive,

    #[error("no cycle is currently active")]
    NoActiveCycle,

    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: Phase, to: Phase },

    #[error("cannot skip critical phase {0}")]
    CannotSkipCriticalPhase(Phase),
}

/// Context Provisioner errors (§4.4, §7).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ContextError {
    #[error("token budget invariant violated: {0}")]
    InvariantViolation(String),

    #[error("broker error while provisioning: {0}")]
    Broker(#[from] BrokerError),
}

/// Process-Improvement Logger errors (§4.5, §7).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PiError {
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),
}

/// LLM Adapter errors (§4.7, §7).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LlmError {
    #[error("no provider configured")]
    NoProviderConfigured,

    #[error("all providers exhausted after {attempts} attempts")]
    AllProvidersExhausted { attempts: u32 },

    #[error("request to {provider} failed: {message}")]
    RequestFailed { provider: String, message: String },

    #[error("rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited { provider: String, retry_after_ms: u64 },

    #[error("response from {provider} failed schema validation: {reason}")]
    SchemaViolation { provider: String, reason: String },

    #[error("deadline exceeded dispatching to {provider}")]
    DeadlineExceeded { provider: String },
}

/// Agent runtime messaging errors (§4.6, §7).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AgentRuntimeError {
    #[error("agent {0} is not active")]
    NotActive(AgentId),

    #[error("agent {0} not registered")]
    NotRegistered(AgentId),

    #[error("deadline exceeded waiting for reply from {0}")]
    DeadlineExceeded(AgentId),
}

/// Kernel-level configuration/construction errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum KernelError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("agent {0} already registered")]
    AlreadyRegistered(AgentId),

    #[error("agent {0} not registered")]
    NotRegistered(AgentId),
}

/// Top-level error type returned across the kernel boundary (§7). No
/// exception escapes the boundary unwrapped into this enum.
#[derive(Debug, Clone, Error)]
pub enum AetherError {
    #[error("authorization error: {0}")]
    Auth(#[from] AuthError),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("context error: {0}")]
    Context(#[from] ContextError),

    #[error("process-improvement error: {0}")]
    Pi(#[from] PiError),

    #[error("llm error: {0}")]
    Llm(#[from] LlmError),

    #[error("agent runtime error: {0}")]
    AgentRuntime(#[from] AgentRuntimeError),

    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),
}

impl AetherError {
    /// True for errors that, per §7, a caller may retry after backing off
    /// (deadline/availability), as opposed to errors that are permanent for
    /// the given input (unauthorized, schema violation).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AetherError::Broker(BrokerError::Unavailable(_) | BrokerError::DeadlineExceeded(_))
                | AetherError::Llm(LlmError::RateLimited { .. } | LlmError::DeadlineExceeded { .. })
                | AetherError::Auth(AuthError::PolicyUnavailable)
        )
    }
}

pub type AetherResult<T> = Result<T, AetherError>;

/// Helper used by the broker when the category min-level check fails; kept
/// here so every subsystem reports the same message shape.
pub fn insufficient_clearance(have: AccessLevel, need: AccessLevel) -> String {
    format!("access level {have} below required minimum {need}")
}
