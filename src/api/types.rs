//! API request and response types

use crate::session::{RetryCounters, SessionState};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A client message for one conversation
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub task: String,
    /// Kind for a new conversation; ignored when one is live
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Curated reply; the transcript never leaves the server
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_name: String,
    pub last_message: String,
    pub state: SessionState,
}

/// Status of a live conversation, without its transcript
#[derive(Debug, Serialize)]
pub struct ConversationStatus {
    pub session_name: String,
    pub kind: String,
    pub state: SessionState,
    /// Speaking roles, in turn order
    pub participants: Vec<String>,
    pub tools: Vec<String>,
    pub max_round: usize,
    pub messages: usize,
    pub counters: RetryCounters,
    pub awaiting_approval: bool,
}

#[derive(Debug, Serialize)]
pub struct RemoveResponse {
    pub removed: bool,
}

#[derive(Debug, Serialize)]
pub struct KindsResponse {
    pub kinds: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub requests: u64,
    pub failures: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
