//! Registry of session kinds and live sessions
//!
//! Kinds map a name to a [`SessionFactory`]. Live sessions are keyed by
//! [`SessionKey`] in a concurrent map, so requests for different
//! conversations never contend on a global lock.

use super::delegation::DelegationBridge;
use super::{
    ConversationEngine, KindParams, Session, SessionError, SessionFactory, SessionHandle,
    SessionKey,
};
use crate::context::ContextStore;
use crate::tools::{
    AskForApprovalTool, DelegateTaskTool, ReplyToClientTool, ToolCatalog, ToolHandler,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

pub struct SessionManager {
    kinds: RwLock<HashMap<String, Arc<dyn SessionFactory>>>,
    sessions: DashMap<SessionKey, SessionHandle>,
    catalog: ToolCatalog,
    engine: ConversationEngine,
}

impl SessionManager {
    /// Build a manager whose catalog holds `tools` plus the built-in
    /// `reply_to_client`, `ask_for_approval`, and `delegate_task`
    pub fn new(engine: ConversationEngine, tools: ToolCatalog) -> Arc<Self> {
        Arc::new_cyclic(|manager| {
            let mut catalog = tools;
            catalog.insert(ToolHandler::plain(ReplyToClientTool));
            catalog.insert(ToolHandler::with_context(AskForApprovalTool));
            catalog.insert(ToolHandler::with_context(DelegateTaskTool::new(
                DelegationBridge::new(manager.clone()),
            )));
            Self {
                kinds: RwLock::new(HashMap::new()),
                sessions: DashMap::new(),
                catalog,
                engine,
            }
        })
    }

    pub fn engine(&self) -> &ConversationEngine {
        &self.engine
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn bridge(self: &Arc<Self>) -> DelegationBridge {
        DelegationBridge::new(Arc::downgrade(self))
    }

    // ------------------------------------------------------------------
    // Kinds
    // ------------------------------------------------------------------

    /// Register a factory under `name`.
    ///
    /// Both the name and the factory itself must be new: registering the
    /// same factory under a second name is rejected.
    pub fn register_kind(
        &self,
        name: impl Into<String>,
        factory: Arc<dyn SessionFactory>,
    ) -> Result<(), SessionError> {
        let name = name.into();
        let mut kinds = self.kinds.write().unwrap_or_else(PoisonError::into_inner);

        if kinds.contains_key(&name) {
            return Err(SessionError::DuplicateKind {
                name,
                existing: None,
            });
        }
        if let Some(existing) = kinds
            .iter()
            .find(|(_, registered)| Arc::ptr_eq(registered, &factory))
            .map(|(existing, _)| existing.clone())
        {
            return Err(SessionError::DuplicateKind {
                name,
                existing: Some(existing),
            });
        }

        info!(kind = %name, "Registered session kind");
        kinds.insert(name, factory);
        Ok(())
    }

    pub fn get_by_name(&self, name: &str) -> Result<Arc<dyn SessionFactory>, SessionError> {
        self.kinds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| SessionError::UnknownKind {
                name: name.to_string(),
            })
    }

    pub fn kind_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .kinds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Build a session of `kind` at `key` with a fresh context
    pub fn create(
        &self,
        key: SessionKey,
        kind: &str,
        params: &KindParams,
    ) -> Result<SessionHandle, SessionError> {
        let mut context = ContextStore::new(key, kind);
        context.merge_attributes(params);
        self.create_with_context(key, kind, params, context)
    }

    /// Build a session of `kind` at `key` around an existing context
    pub fn create_with_context(
        &self,
        key: SessionKey,
        kind: &str,
        params: &KindParams,
        context: ContextStore,
    ) -> Result<SessionHandle, SessionError> {
        let factory = self.get_by_name(kind)?;
        if self.sessions.contains_key(&key) {
            return Err(SessionError::DuplicateSession {
                session: key.session_name(),
            });
        }

        let blueprint = factory.blueprint(params);
        let dispatcher = self.catalog.dispatcher_for(&blueprint.allowed_tools)?;
        let session = Session::new(
            key,
            kind,
            blueprint,
            dispatcher,
            context,
            self.engine.config().max_round,
        )?;
        let handle = Arc::new(tokio::sync::Mutex::new(session));

        // Another request may have won the race since the check above
        match self.sessions.entry(key) {
            Entry::Occupied(_) => Err(SessionError::DuplicateSession {
                session: key.session_name(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(handle.clone());
                info!(session = %key, kind = %kind, "Created session");
                Ok(handle)
            }
        }
    }

    pub fn get(&self, key: SessionKey) -> Option<SessionHandle> {
        self.sessions.get(&key).map(|entry| entry.value().clone())
    }

    /// Remove and return the session at `key`; a no-op when absent
    pub fn pop(&self, key: SessionKey) -> Option<SessionHandle> {
        let removed = self.sessions.remove(&key).map(|(_, handle)| handle);
        if removed.is_some() {
            debug!(session = %key, "Removed session");
        }
        removed
    }

    /// Remove the session at `key` only if it is still `handle`.
    ///
    /// A delegation may have replaced the session while it ran.
    pub fn pop_if_same(&self, key: SessionKey, handle: &SessionHandle) -> bool {
        let removed = self
            .sessions
            .remove_if(&key, |_, current| Arc::ptr_eq(current, handle))
            .is_some();
        if removed {
            debug!(session = %key, "Removed session");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
