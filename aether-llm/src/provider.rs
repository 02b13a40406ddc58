//! Concrete [`LlmProvider`] implementations.
//!
//! [`HttpLlmProvider`] is a generic JSON-over-HTTP backend (grounded on the
//! rate-limited `reqwest` client the teacher used for its OpenAI/Anthropic
//! adapters) that works against any chat-completions-shaped endpoint.
//! [`MockLlmProvider`] is the in-process test double used throughout this
//! crate and by callers wiring up a kernel for tests.

use crate::{CompletionRequest, FinishReason, LlmProvider, RawCompletion, TokenUsage};
use aether_core::LlmError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct ChatResponseBody {
    content: String,
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    finish_reason: String,
}

/// A generic chat-completions HTTP provider. `base_url`/`model` identify
/// the backend; `provider_id` is the name used in registry priority and
/// circuit-breaker bookkeeping, which may differ from `model` (e.g. two
/// registrations of the same model behind different endpoints).
pub struct HttpLlmProvider {
    client: Client,
    provider_id: String,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpLlmProvider {
    pub fn new(
        provider_id: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            provider_id: provider_id.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<RawCompletion, LlmError> {
        let body = ChatRequestBody {
            model: &self.model,
            system: &request.system_prompt,
            prompt: &request.user_prompt,
        };

        let mut req = self
            .client
            .post(format!("{}/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body);
        if let Some(deadline) = request.deadline {
            req = req.timeout(deadline);
        }

        let response = req.send().await.map_err(|e| LlmError::RequestFailed {
            provider: self.provider_id.clone(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(LlmError::RateLimited {
                provider: self.provider_id.clone(),
                retry_after_ms,
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| status.to_string());
            return Err(LlmError::RequestFailed {
                provider: self.provider_id.clone(),
                message,
            });
        }

        let parsed: ChatResponseBody = response.json().await.map_err(|e| LlmError::RequestFailed {
            provider: self.provider_id.clone(),
            message: format!("malformed envelope: {e}"),
        })?;

        let finish_reason = match parsed.finish_reason.as_str() {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        };

        Ok(RawCompletion {
            content: parsed.content,
            tokens: TokenUsage {
                prompt: parsed.prompt_tokens,
                completion: parsed.completion_tokens,
            },
            model: self.model.clone(),
            finish_reason,
        })
    }
}

/// Deterministic test double. Can be wired to always succeed with fixed
/// content, always fail, or fail a fixed number of times before
/// succeeding (to exercise the retry loop).
pub struct MockLlmProvider {
    provider_id: String,
    content: String,
    fails_remaining: Arc<AtomicU32>,
    call_counter: Option<Arc<AtomicU32>>,
}

impl MockLlmProvider {
    pub fn succeeding(provider_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            content: content.into(),
            fails_remaining: Arc::new(AtomicU32::new(0)),
            call_counter: None,
        }
    }

    pub fn failing(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            content: String::new(),
            fails_remaining: Arc::new(AtomicU32::new(u32::MAX)),
            call_counter: None,
        }
    }

    /// Fails `fail_count` times, then succeeds with `content`. `call_counter`
    /// is incremented on every call (success or failure) so tests can
    /// assert the total attempt count.
    pub fn flaky(
        provider_id: impl Into<String>,
        call_counter: Arc<AtomicU32>,
        fail_count: u32,
        content: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            content: content.into(),
            fails_remaining: Arc::new(AtomicU32::new(fail_count)),
            call_counter: Some(call_counter),
        }
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<RawCompletion, LlmError> {
        if let Some(counter) = &self.call_counter {
            counter.fetch_add(1, Ordering::SeqCst);
        }

        let remaining = self.fails_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fails_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(LlmError::RequestFailed {
                provider: self.provider_id.clone(),
                message: "mock failure".to_string(),
            });
        }

        Ok(RawCompletion {
            content: self.content.clone(),
            tokens: TokenUsage {
                prompt: 10,
                completion: 10,
            },
            model: "mock-model".to_string(),
            finish_reason: FinishReason::Stop,
        })
    }
}
