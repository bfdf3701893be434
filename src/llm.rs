//! LLM provider abstraction
//!
//! The conversation engine treats the model as an opaque remote procedure
//! behind [`LlmService`]. Cross-cutting behaviour (timeouts, usage
//! accounting, request sanitizing, logging) is layered on with
//! [`LlmStack`] instead of patching the provider.

mod anthropic;
mod error;
mod middleware;
mod types;

pub use anthropic::AnthropicService;
pub use error::{LlmError, LlmErrorKind};
pub use middleware::{
    LlmLayer, LlmStack, LoggingLayer, SanitizeLayer, TimeoutLayer, UsageLayer, UsageMeter,
};
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a completion request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

#[async_trait]
impl<T: LlmService + ?Sized> LlmService for Arc<T> {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        (**self).complete(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

/// Stand-in used when no provider credentials are configured.
///
/// Every call fails with a non-retryable auth error so sessions fail fast
/// instead of burning their retry budget.
pub struct UnavailableService;

#[async_trait]
impl LlmService for UnavailableService {
    async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        Err(LlmError::auth(
            "No LLM configured. Set ANTHROPIC_API_KEY or LLM_GATEWAY.",
        ))
    }

    fn model_id(&self) -> &'static str {
        "unavailable"
    }
}

/// Provider configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub anthropic_api_key: Option<String>,
    /// Gateway URL that proxies provider calls and handles auth
    pub gateway: Option<String>,
    pub model: String,
    pub timeout: std::time::Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            gateway: None,
            model: anthropic::DEFAULT_MODEL.to_string(),
            timeout: std::time::Duration::from_secs(300),
        }
    }
}

/// Build the production service stack from configuration
pub fn build_service(config: &LlmConfig, meter: Arc<UsageMeter>) -> Arc<dyn LlmService> {
    let api_key = match (&config.gateway, &config.anthropic_api_key) {
        (Some(_), _) => Some("implicit".to_string()),
        (None, Some(key)) if !key.is_empty() => Some(key.clone()),
        _ => None,
    };

    let base: Arc<dyn LlmService> = match api_key {
        Some(key) => match AnthropicService::new(key, &config.model, config.gateway.as_deref()) {
            Ok(service) => Arc::new(service),
            Err(e) => {
                tracing::error!(error = %e, "Failed to build LLM client");
                Arc::new(UnavailableService)
            }
        },
        None => Arc::new(UnavailableService),
    };

    LlmStack::new(base)
        .layer(SanitizeLayer)
        .layer(TimeoutLayer::new(config.timeout))
        .layer(UsageLayer::new(meter))
        .layer(LoggingLayer)
        .build()
}
