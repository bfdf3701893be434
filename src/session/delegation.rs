//! Hand a conversation over to a session of another kind
//!
//! The successor takes over the same key: the origin is popped, a session
//! of the target kind is created with the origin's context carried forward,
//! and it is initiated with the brief. A finished successor is removed
//! again; a paused one stays registered so the client's next message
//! reaches it.

use super::{KindParams, SessionError, SessionKey, SessionManager, SessionOutcome, SessionState};
use crate::context::ContextStore;
use std::sync::{Arc, Weak};
use tracing::{info, warn};

#[derive(Clone)]
pub struct DelegationBridge {
    manager: Weak<SessionManager>,
}

impl DelegationBridge {
    pub fn new(manager: Weak<SessionManager>) -> Self {
        Self { manager }
    }

    fn manager(&self) -> Result<Arc<SessionManager>, SessionError> {
        self.manager.upgrade().ok_or(SessionError::ManagerUnavailable)
    }

    /// Replace the session at `from` with a new session of `to_kind`.
    ///
    /// `carried` is the origin's context; without it the successor starts
    /// from a fresh store.
    pub async fn delegate(
        &self,
        from: SessionKey,
        to_kind: &str,
        brief: &str,
        carried: Option<ContextStore>,
    ) -> Result<SessionOutcome, SessionError> {
        let manager = self.manager()?;
        manager.get_by_name(to_kind)?;

        let context = match carried {
            Some(store) => store.carry_forward(to_kind, brief),
            None => ContextStore::new(from, to_kind),
        };

        // Creation parameters live on as attributes; the successor's factory reads them again
        let params: KindParams = context.attributes().clone();

        manager.pop(from);
        info!(session = %from, to_kind = %to_kind, "Delegating conversation");
        let handle = manager.create_with_context(from, to_kind, &params, context)?;

        let result = {
            let mut session = handle.lock().await;
            manager.engine().initiate(&mut session, brief).await
        };

        match &result {
            Ok(outcome) if outcome.state == SessionState::Paused => {
                info!(session = %from, kind = %to_kind, "Delegate is waiting for the client");
            }
            Ok(_) => {
                manager.pop_if_same(from, &handle);
            }
            Err(err) => {
                warn!(session = %from, kind = %to_kind, error = %err, "Delegate failed");
                manager.pop_if_same(from, &handle);
            }
        }
        result
    }
}
