//! Doctrinal-fit and external-policy factors (§4.2 factors 5 and 6).

use aether_core::{AgentId, CircuitBreakerConfig, CycleId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::RwLock;
use std::time::Instant;

/// Doctrine KB's verdict on an action description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoctrineVerdict {
    Compliant,
    NonCompliant { reason: String },
}

/// The doctrine adapter is down. Per §4.2 this is a soft-fail: it never
/// turns into a hard deny on its own.
#[derive(Debug, Clone)]
pub struct DoctrineUnavailable;

impl fmt::Display for DoctrineUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doctrine adapter unavailable")
    }
}

impl std::error::Error for DoctrineUnavailable {}

/// Consults the doctrine knowledge base for a compliance verdict on an
/// action description (§4.2 factor 5).
#[async_trait]
pub trait DoctrineAdapter: Send + Sync {
    async fn check_compliance(&self, action_description: &str) -> Result<DoctrineVerdict, DoctrineUnavailable>;
}

/// Test double that always reports compliant, used to exercise the other
/// five factors in isolation.
pub struct AlwaysCompliant;

#[async_trait]
impl DoctrineAdapter for AlwaysCompliant {
    async fn check_compliance(&self, _action_description: &str) -> Result<DoctrineVerdict, DoctrineUnavailable> {
        Ok(DoctrineVerdict::Compliant)
    }
}

/// Result of consulting the external policy evaluator (§4.2 factor 6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyOutcome {
    Allow,
    Deny { reason: String },
    /// No evaluator configured for this kernel instance; the factor is
    /// skipped rather than denied.
    Unconfigured,
    /// The breaker has seen enough consecutive failures within the window
    /// to degrade to deny without attempting the call (§4.2: "degrades to
    /// deny after N consecutive failures within a window").
    CircuitOpen,
    /// The call itself failed (timeout, transport error, malformed body).
    Unreachable,
}

#[derive(Serialize)]
struct PolicyInput {
    agent: String,
    action: String,
    ato_cycle: String,
}

#[derive(Serialize)]
struct PolicyRequestBody {
    input: PolicyInput,
}

#[derive(Deserialize)]
struct PolicyResponseBody {
    result: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(v: u8) -> Self {
        match v {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }
}

struct CircuitBreaker {
    state: AtomicU8,
    failure_count: AtomicU32,
    last_failure: RwLock<Option<Instant>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU32::new(0),
            last_failure: RwLock::new(None),
            config,
        }
    }

    fn is_allowed(&self) -> bool {
        match CircuitState::from(self.state.load(Ordering::SeqCst)) {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let reopen = self
                    .last_failure
                    .read()
                    .ok()
                    .and_then(|g| *g)
                    .map(|last| last.elapsed() > self.config.open_duration)
                    .unwrap_or(false);
                if reopen {
                    self.state.store(CircuitState::HalfOpen as u8, Ordering::SeqCst);
                }
                reopen
            }
        }
    }

    fn record_success(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        self.state.store(CircuitState::Closed as u8, Ordering::SeqCst);
    }

    fn record_failure(&self) {
        if let Ok(mut guard) = self.last_failure.write() {
            *guard = Some(Instant::now());
        }
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.config.failure_threshold {
            self.state.store(CircuitState::Open as u8, Ordering::SeqCst);
        }
    }
}

/// Client for the external policy evaluator (§4.2 factor 6, §6). Decisions
/// from a reachable evaluator are authoritative; once the breaker opens,
/// every call degrades to deny without attempting the network.
pub struct ExternalPolicyClient {
    client: reqwest::Client,
    url: Option<String>,
    breaker: CircuitBreaker,
}

impl ExternalPolicyClient {
    /// `base_url` is the evaluator's root (e.g. `https://policy.example.com`);
    /// `package` is the OPA-style dotted policy package (e.g.
    /// `aetheros.policy`). The two are joined into the `/v1/data/<pkg>/allow`
    /// path §6 pins down, with package dots mapped to path segments the way
    /// OPA itself addresses packages.
    pub fn new(base_url: impl Into<String>, package: &str, breaker_config: CircuitBreakerConfig) -> Self {
        let base_url = base_url.into();
        let package_path = package.replace('.', "/");
        let url = format!("{}/v1/data/{package_path}/allow", base_url.trim_end_matches('/'));
        Self {
            client: reqwest::Client::new(),
            url: Some(url),
            breaker: CircuitBreaker::new(breaker_config),
        }
    }

    /// A client with no evaluator configured; factor 6 is skipped for
    /// every request (kernel instances that don't wire one in).
    pub fn unconfigured() -> Self {
        Self {
            client: reqwest::Client::new(),
            url: None,
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
        }
    }

    pub async fn evaluate(&self, agent: AgentId, action: &str, cycle: CycleId) -> PolicyOutcome {
        let Some(url) = &self.url else {
            return PolicyOutcome::Unconfigured;
        };
        if !self.breaker.is_allowed() {
            return PolicyOutcome::CircuitOpen;
        }

        let body = PolicyRequestBody {
            input: PolicyInput {
                agent: agent.to_string(),
                action: action.to_string(),
                ato_cycle: cycle.to_string(),
            },
        };

        let result = self.client.post(url.as_str()).json(&body).send().await;
        match result {
            Ok(response) if response.status().is_success() => match response.json::<PolicyResponseBody>().await {
                Ok(parsed) => {
                    self.breaker.record_success();
                    if parsed.result {
                        PolicyOutcome::Allow
                    } else {
                        PolicyOutcome::Deny {
                            reason: "denied by external policy".to_string(),
                        }
                    }
                }
                Err(e) => {
                    self.breaker.record_failure();
                    tracing::warn!(%e, "external policy response malformed");
                    PolicyOutcome::Unreachable
                }
            },
            Ok(response) => {
                self.breaker.record_failure();
                tracing::warn!(status = %response.status(), "external policy evaluator returned error status");
                PolicyOutcome::Unreachable
            }
            Err(e) => {
                self.breaker.record_failure();
                tracing::warn!(%e, "external policy evaluator unreachable");
                PolicyOutcome::Unreachable
            }
        }
    }
}
