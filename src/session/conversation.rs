//! Per-request entry point: start a conversation or continue a paused one

use super::{
    KindParams, Session, SessionError, SessionHandle, SessionKey, SessionManager, SessionState,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info};

/// Kind used when a new conversation names none
pub const DEFAULT_KIND: &str = "initial";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationReply {
    pub session_name: String,
    pub last_message: String,
    pub state: SessionState,
}

impl SessionManager {
    /// Route the client's message to its conversation.
    ///
    /// Without a live session one is created (of `kind`, or [`DEFAULT_KIND`])
    /// and initiated; otherwise the paused session continues. Finished and
    /// failed sessions are evicted, so the next message starts over.
    ///
    /// The turn runs on its own task. Dropping the returned future (a client
    /// that went away) does not cancel it; the session still reaches a
    /// resting state and stays usable for the next request.
    pub async fn start_or_continue_conversation(
        self: &Arc<Self>,
        tenant_id: i64,
        conversation_id: i64,
        task: &str,
        kind: Option<&str>,
        params: &KindParams,
    ) -> Result<ConversationReply, SessionError> {
        let key = SessionKey::new(tenant_id, conversation_id);
        let handle = match self.get(key) {
            Some(handle) => {
                if let Some(kind) = kind {
                    debug!(session = %key, kind = %kind, "Ignoring kind for existing session");
                }
                handle
            }
            None => match self.create(key, kind.unwrap_or(DEFAULT_KIND), params) {
                Ok(handle) => handle,
                // A concurrent request created it first
                Err(SessionError::DuplicateSession { session }) => {
                    return Err(SessionError::SessionBusy { session })
                }
                Err(err) => return Err(err),
            },
        };

        let Ok(session) = handle.clone().try_lock_owned() else {
            return Err(SessionError::SessionBusy {
                session: key.session_name(),
            });
        };

        let manager = Arc::clone(self);
        let task = task.to_string();
        let turn =
            tokio::spawn(async move { manager.run_turn(key, &handle, session, &task).await });

        match turn.await {
            Ok(result) => result,
            Err(join_err) => {
                error!(session = %key, error = %join_err, "Conversation turn aborted");
                Err(SessionError::TurnAborted {
                    session: key.session_name(),
                    message: join_err.to_string(),
                })
            }
        }
    }

    /// Drive one client message to a resting state and evict finished sessions
    async fn run_turn(
        &self,
        key: SessionKey,
        handle: &SessionHandle,
        mut session: OwnedMutexGuard<Session>,
        task: &str,
    ) -> Result<ConversationReply, SessionError> {
        let result = if session.state() == SessionState::Init {
            self.engine().initiate(&mut session, task).await
        } else {
            self.engine().continue_chat(&mut session, task).await
        };
        drop(session);

        match result {
            Ok(outcome) => {
                if outcome.state == SessionState::Done {
                    self.pop_if_same(key, handle);
                }
                info!(session = %key, state = %outcome.state, "Conversation turn complete");
                Ok(ConversationReply {
                    session_name: key.session_name(),
                    last_message: outcome.message,
                    state: outcome.state,
                })
            }
            Err(err) => {
                self.pop_if_same(key, handle);
                Err(err)
            }
        }
    }
}
