//! LLM Adapter and structured-output dispatch (§4.7).
//!
//! A [`ProviderRegistry`] holds providers in declared-priority order
//! (primary, secondary, tertiary, ...). `dispatch` walks the list,
//! retrying each provider up to its configured limit with exponential
//! backoff before falling through to the next. A circuit breaker per
//! provider short-circuits dispatch to providers that are currently
//! failing, independent of the retry loop.
//!
//! Structured-output validation is a hard error: a response that fails to
//! deserialize into the caller's schema is reported to the caller as-is,
//! never silently repaired or retried against the same provider.

mod provider;

pub use provider::{HttpLlmProvider, MockLlmProvider};

use aether_core::{CircuitBreakerConfig, ElementId, LlmError, RetryConfig};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::RwLock as TokioRwLock;

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

/// A `(system_prompt, user_prompt)` pair to dispatch to a provider (§4.7).
/// The schema itself is carried as a type parameter on [`ProviderRegistry::dispatch`]
/// rather than as data here, so validation happens through ordinary
/// deserialization instead of a second schema-description format.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub deadline: Option<Duration>,
}

/// Token accounting returned alongside every completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenUsage {
    pub prompt: u32,
    pub completion: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt + self.completion
    }
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Other(String),
}

/// The unparsed text a provider returned, before schema validation.
#[derive(Debug, Clone)]
pub struct RawCompletion {
    pub content: String,
    pub tokens: TokenUsage,
    pub model: String,
    pub finish_reason: FinishReason,
}

/// A schema-validated, citation-extracted completion (§4.7).
#[derive(Debug, Clone)]
pub struct StructuredResponse<T> {
    pub content: T,
    pub tokens: TokenUsage,
    pub provider: String,
    pub model: String,
    pub finish_reason: FinishReason,
    /// Element IDs found in `content`'s free text by prefix grammar, even
    /// when `T` carries no explicit citations field.
    pub referenced: Vec<ElementId>,
}

/// A single provider backend. `complete` returns the raw text; schema
/// parsing happens one layer up in [`ProviderRegistry::dispatch`] so every
/// provider is validated identically regardless of implementation.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<RawCompletion, LlmError>;
}

// ============================================================================
// CITATION EXTRACTION
// ============================================================================

static CITATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(DOC|THR|MSN|HIST|COLL)-[A-Za-z0-9]+\b").expect("citation regex is valid")
});

/// Extract element-ID tokens from free text by prefix grammar (§4.7).
/// Unknown prefixes never match; malformed IDs (wrong arity of `-`) are
/// simply not captured rather than erroring, since this runs over
/// untrusted model output.
pub fn extract_citations(text: &str) -> Vec<ElementId> {
    CITATION_PATTERN
        .find_iter(text)
        .map(|m| ElementId::from(m.as_str()))
        .collect()
}

// ============================================================================
// CIRCUIT BREAKER (per provider, §4.7 fallback)
// ============================================================================

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

/// Tracks a single provider's recent health so a provider stuck failing
/// isn't retried on every dispatch; reused verbatim from the shape the
/// external policy evaluator uses (§4.2), parameterized on the same
/// [`CircuitBreakerConfig`].
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

// ============================================================================
// PROVIDER REGISTRY
// ============================================================================

/// Providers in declared-priority order with per-provider retry/backoff and
/// circuit breaking (§4.7: "Primary → secondary → tertiary on transport
/// failure or rate-limit; retries up to R per provider with exponential
/// backoff").
pub struct ProviderRegistry {
    providers: TokioRwLock<Vec<Arc<dyn LlmProvider>>>,
    breakers: TokioRwLock<HashMap<String, Arc<CircuitBreaker>>>,
    retry: RetryConfig,
    breaker_config: CircuitBreakerConfig,
}

impl ProviderRegistry {
    pub fn new(retry: RetryConfig, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            providers: TokioRwLock::new(Vec::new()),
            breakers: TokioRwLock::new(HashMap::new()),
            retry,
            breaker_config,
        }
    }

    /// Register a provider. Priority is registration order: the first
    /// registered provider is primary.
    pub async fn register(&self, provider: Arc<dyn LlmProvider>) {
        let id = provider.provider_id().to_string();
        self.breakers
            .write()
            .await
            .insert(id, Arc::new(CircuitBreaker::new(self.breaker_config)));
        self.providers.write().await.push(provider);
    }

    pub async fn provider_count(&self) -> usize {
        self.providers.read().await.len()
    }

    /// Dispatch `request`, parsing the winning provider's response into
    /// `T`. A schema-validation failure is returned immediately as
    /// [`LlmError::SchemaViolation`] without trying the next provider —
    /// the content is malformed, not the transport.
    pub async fn dispatch<T: DeserializeOwned>(
        &self,
        request: CompletionRequest,
    ) -> Result<StructuredResponse<T>, LlmError> {
        let providers = self.providers.read().await.clone();
        if providers.is_empty() {
            return Err(LlmError::NoProviderConfigured);
        }
        let breakers = self.breakers.read().await;

        let mut attempts = 0u32;
        for provider in providers.iter() {
            let provider_id = provider.provider_id().to_string();
            let breaker = breakers.get(&provider_id).cloned();
            if let Some(ref b) = breaker {
                if !b.is_allowed() {
                    tracing::debug!(provider = %provider_id, "circuit open, skipping provider");
                    continue;
                }
            }

            let mut backoff = self.retry.initial_backoff;
            for retry_attempt in 0..=self.retry.max_retries {
                attempts += 1;
                match provider.complete(&request).await {
                    Ok(raw) => {
                        if let Some(b) = &breaker {
                            b.record_success();
                        }
                        return Self::validate(raw, provider_id);
                    }
                    Err(err) if is_retryable(&err) && retry_attempt < self.retry.max_retries => {
                        if let Some(b) = &breaker {
                            b.record_failure();
                        }
                        tracing::warn!(provider = %provider_id, attempt = retry_attempt, %err, "llm request failed, retrying");
                        tokio::time::sleep(backoff).await;
                        backoff = Duration::from_secs_f32(
                            (backoff.as_secs_f32() * self.retry.backoff_multiplier)
                                .min(self.retry.max_backoff.as_secs_f32()),
                        );
                    }
                    Err(err) => {
                        if let Some(b) = &breaker {
                            b.record_failure();
                        }
                        tracing::warn!(provider = %provider_id, %err, "llm provider exhausted, falling through");
                        break;
                    }
                }
            }
        }

        Err(LlmError::AllProvidersExhausted { attempts })
    }

    fn validate<T: DeserializeOwned>(
        raw: RawCompletion,
        provider_id: String,
    ) -> Result<StructuredResponse<T>, LlmError> {
        let referenced = extract_citations(&raw.content);
        let content: T = serde_json::from_str(&raw.content).map_err(|e| LlmError::SchemaViolation {
            provider: provider_id.clone(),
            reason: e.to_string(),
        })?;

        Ok(StructuredResponse {
            content,
            tokens: raw.tokens,
            provider: provider_id,
            model: raw.model,
            finish_reason: raw.finish_reason,
            referenced,
        })
    }
}

fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::RequestFailed { .. } | LlmError::RateLimited { .. } | LlmError::DeadlineExceeded { .. }
    )
}
