//! Tool dispatch error types

use crate::session::SessionError;
use thiserror::Error;

/// Dispatcher contract violations. These are raised, never shown to the model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("tool `{name}` is already registered")]
    DuplicateTool { name: String },

    #[error("tool `{name}` is not available")]
    UnknownTool { name: String },

    #[error("tool `{tool}` expects {expected} argument(s), got {got}")]
    ArityMismatch {
        tool: String,
        /// Human-readable arity, e.g. `1..=2`
        expected: String,
        got: usize,
    },

    #[error("tool `{tool}` needs a conversation context but none is set")]
    MissingContext { tool: String },
}

/// Raised by a tool body. Business failures belong in `ToolOutput::error`.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Fault(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A nested session (delegation) failed
    #[error(transparent)]
    Session(Box<SessionError>),
}

impl From<SessionError> for ToolError {
    fn from(err: SessionError) -> Self {
        ToolError::Session(Box::new(err))
    }
}
