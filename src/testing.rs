//! Test doubles for the LLM boundary
//!
//! Sessions are driven end to end against [`MockLlmService`], which replays
//! queued responses and records every request it sees.

use crate::llm::{ContentBlock, LlmError, LlmRequest, LlmResponse, LlmService, Usage};
use crate::session::EngineConfig;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Mock LLM service that returns queued responses.
///
/// An empty queue yields a retryable network error, so "the model is down"
/// is simply a mock with nothing queued.
pub struct MockLlmService {
    responses: Mutex<VecDeque<(Duration, Result<LlmResponse, LlmError>)>>,
    model_id: String,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmService {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_response(&self, response: LlmResponse) {
        self.responses
            .lock()
            .unwrap()
            .push_back((Duration::ZERO, Ok(response)));
    }

    /// Response that arrives only after `delay`
    pub fn queue_delayed_response(&self, response: LlmResponse, delay: Duration) {
        self.responses.lock().unwrap().push_back((delay, Ok(response)));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.responses
            .lock()
            .unwrap()
            .push_back((Duration::ZERO, Err(error)));
    }

    pub fn queue_text(&self, text: &str) {
        self.queue_response(text_response(text));
    }

    pub fn queue_tool_use(&self, id: &str, name: &str, input: Value) {
        self.queue_response(tool_use_response(id, name, input));
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmService for MockLlmService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.responses.lock().unwrap().pop_front();
        let Some((delay, result)) = next else {
            return Err(LlmError::network("No mock response queued"));
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

pub fn text_response(text: &str) -> LlmResponse {
    LlmResponse {
        content: vec![ContentBlock::text(text)],
        usage: Usage::default(),
    }
}

pub fn tool_use_response(id: &str, name: &str, input: Value) -> LlmResponse {
    LlmResponse {
        content: vec![ContentBlock::tool_use(id, name, input)],
        usage: Usage::default(),
    }
}

/// Engine settings with no backoff sleeps
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        retry_base_delay: Duration::ZERO,
        retry_max_delay: Duration::ZERO,
        ..EngineConfig::default()
    }
}
