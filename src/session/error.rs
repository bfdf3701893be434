//! Session error types

use super::SessionState;
use crate::llm::LlmError;
use crate::tools::DispatchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session kind `{name}` is already registered")]
    DuplicateKind {
        name: String,
        /// Set when the factory is already registered under another name
        existing: Option<String>,
    },

    #[error("unknown session kind `{name}`")]
    UnknownKind { name: String },

    #[error("session {session} already exists")]
    DuplicateSession { session: String },

    #[error("session {session} is handling another request")]
    SessionBusy { session: String },

    #[error("cannot {operation} session {session} while {state}")]
    InvalidState {
        session: String,
        state: SessionState,
        operation: &'static str,
    },

    #[error("invalid blueprint for kind `{kind}`: {reason}")]
    InvalidBlueprint { kind: String, reason: String },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("session {session} failed after {nudges} nudge(s) and {restarts} restart(s): {source}")]
    TransientServiceError {
        session: String,
        nudges: u32,
        restarts: u32,
        #[source]
        source: LlmError,
    },

    #[error("session {session} reached {max_round} rounds without finishing")]
    RoundLimitExceeded { session: String, max_round: usize },

    #[error("LLM request failed: {0}")]
    Llm(#[source] LlmError),

    #[error("tool `{tool}` failed: {message}")]
    ToolFault { tool: String, message: String },

    /// The task driving a turn panicked or was cancelled
    #[error("turn for session {session} aborted: {message}")]
    TurnAborted { session: String, message: String },

    #[error("session manager has shut down")]
    ManagerUnavailable,
}

impl SessionError {
    /// Worth retrying the whole request later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionError::TransientServiceError { .. } | SessionError::SessionBusy { .. }
        )
    }
}
