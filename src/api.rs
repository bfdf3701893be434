//! HTTP API for campaign crews
//!
//! Each request carries one client message for a `(tenant, conversation)`
//! pair; the session manager keeps the conversation alive in between.

mod handlers;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::llm::UsageMeter;
use crate::session::SessionManager;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub usage: Arc<UsageMeter>,
}

impl AppState {
    pub fn new(manager: Arc<SessionManager>, usage: Arc<UsageMeter>) -> Self {
        Self { manager, usage }
    }
}
