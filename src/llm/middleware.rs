//! Interceptor chain around [`LlmService`]
//!
//! Layers are composed once when the service is built. The last layer added
//! is the outermost one, so `LlmStack::new(p).layer(A).layer(B)` calls
//! `B -> A -> p`.

use super::{ContentBlock, LlmError, LlmRequest, LlmResponse, LlmService};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Wraps a service with additional behaviour
pub trait LlmLayer {
    fn layer(&self, inner: Arc<dyn LlmService>) -> Arc<dyn LlmService>;
}

/// Builder for a layered service
pub struct LlmStack {
    service: Arc<dyn LlmService>,
}

impl LlmStack {
    pub fn new(base: Arc<dyn LlmService>) -> Self {
        Self { service: base }
    }

    #[must_use]
    pub fn layer(self, layer: impl LlmLayer) -> Self {
        Self {
            service: layer.layer(self.service),
        }
    }

    pub fn build(self) -> Arc<dyn LlmService> {
        self.service
    }
}

// ============================================================================
// Sanitizing
// ============================================================================

/// Drops empty text blocks and messages left without content.
///
/// Providers reject empty text blocks, and the transcript builder can
/// legitimately produce them (a reply consisting only of tool calls).
pub struct SanitizeLayer;

impl LlmLayer for SanitizeLayer {
    fn layer(&self, inner: Arc<dyn LlmService>) -> Arc<dyn LlmService> {
        Arc::new(SanitizeService { inner })
    }
}

struct SanitizeService {
    inner: Arc<dyn LlmService>,
}

fn sanitize(request: &LlmRequest) -> LlmRequest {
    let mut cleaned = request.clone();
    for message in &mut cleaned.messages {
        message.content.retain(|block| {
            !matches!(block, ContentBlock::Text { text } if text.trim().is_empty())
        });
    }
    cleaned.messages.retain(|m| !m.content.is_empty());
    cleaned.system.retain(|s| !s.text.trim().is_empty());
    cleaned
}

#[async_trait]
impl LlmService for SanitizeService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.inner.complete(&sanitize(request)).await
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

// ============================================================================
// Timeout
// ============================================================================

/// Bounds each call; an elapsed timer surfaces as a transient error
pub struct TimeoutLayer {
    timeout: Duration,
}

impl TimeoutLayer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl LlmLayer for TimeoutLayer {
    fn layer(&self, inner: Arc<dyn LlmService>) -> Arc<dyn LlmService> {
        Arc::new(TimeoutService {
            inner,
            timeout: self.timeout,
        })
    }
}

struct TimeoutService {
    inner: Arc<dyn LlmService>,
    timeout: Duration,
}

#[async_trait]
impl LlmService for TimeoutService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        match tokio::time::timeout(self.timeout, self.inner.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::timeout(format!(
                "LLM request exceeded {}s",
                self.timeout.as_secs_f64()
            ))),
        }
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

// ============================================================================
// Usage accounting
// ============================================================================

/// Process-wide token counters
#[derive(Debug, Default)]
pub struct UsageMeter {
    requests: AtomicU64,
    failures: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl UsageMeter {
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens.load(Ordering::Relaxed)
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens.load(Ordering::Relaxed)
    }
}

pub struct UsageLayer {
    meter: Arc<UsageMeter>,
}

impl UsageLayer {
    pub fn new(meter: Arc<UsageMeter>) -> Self {
        Self { meter }
    }
}

impl LlmLayer for UsageLayer {
    fn layer(&self, inner: Arc<dyn LlmService>) -> Arc<dyn LlmService> {
        Arc::new(UsageService {
            inner,
            meter: self.meter.clone(),
        })
    }
}

struct UsageService {
    inner: Arc<dyn LlmService>,
    meter: Arc<UsageMeter>,
}

#[async_trait]
impl LlmService for UsageService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.meter.requests.fetch_add(1, Ordering::Relaxed);
        let result = self.inner.complete(request).await;
        match &result {
            Ok(response) => {
                self.meter
                    .input_tokens
                    .fetch_add(response.usage.input_tokens, Ordering::Relaxed);
                self.meter
                    .output_tokens
                    .fetch_add(response.usage.output_tokens, Ordering::Relaxed);
            }
            Err(_) => {
                self.meter.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

// ============================================================================
// Logging
// ============================================================================

pub struct LoggingLayer;

impl LlmLayer for LoggingLayer {
    fn layer(&self, inner: Arc<dyn LlmService>) -> Arc<dyn LlmService> {
        let model_id = inner.model_id().to_string();
        Arc::new(LoggingService { inner, model_id })
    }
}

/// Logging wrapper for LLM services
struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    cache_read_tokens = response.usage.cache_read_tokens,
                    cache_creation_tokens = response.usage.cache_creation_tokens,
                    "LLM request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "LLM request failed"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
