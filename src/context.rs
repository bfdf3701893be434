//! Per-conversation shared state handed to context-aware tools
//!
//! A `ContextStore` is owned by exactly one session. Tools reach it through
//! a [`SharedContext`] handle that the dispatcher injects at call time; the
//! model never sees it.

use crate::session::SessionKey;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Handle through which tools read and mutate the context
pub type SharedContext = Arc<Mutex<ContextStore>>;

/// Client answers accepted as approval, compared case-insensitively
pub const AFFIRMATIVE_ANSWERS: &[&str] = &["yes", "y", "approve", "approved", "ok"];

/// A question put to the client and its answer, once given
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalRecord {
    pub question: String,
    pub answer: Option<String>,
}

impl ApprovalRecord {
    pub fn is_approved(&self) -> bool {
        self.answer.as_deref().is_some_and(|answer| {
            let answer = answer.trim();
            AFFIRMATIVE_ANSWERS
                .iter()
                .any(|yes| answer.eq_ignore_ascii_case(yes))
        })
    }
}

/// Where this session's work came from, when it was delegated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelegationInfo {
    pub from_kind: String,
    pub to_kind: String,
    pub brief: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextStore {
    pub tenant_id: i64,
    pub conversation_id: i64,
    /// Kind of the session currently owning this store
    pub kind: String,
    approvals: Vec<ApprovalRecord>,
    delegations: Vec<DelegationInfo>,
    /// Free-form values tools accumulate (account ids, campaign drafts, ...)
    attributes: Map<String, Value>,
}

impl ContextStore {
    pub fn new(key: SessionKey, kind: impl Into<String>) -> Self {
        Self {
            tenant_id: key.tenant_id,
            conversation_id: key.conversation_id,
            kind: kind.into(),
            approvals: Vec::new(),
            delegations: Vec::new(),
            attributes: Map::new(),
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.tenant_id, self.conversation_id)
    }

    pub fn into_shared(self) -> SharedContext {
        Arc::new(Mutex::new(self))
    }

    // ------------------------------------------------------------------
    // Approvals
    // ------------------------------------------------------------------

    /// Record a pending `(question, None)` pair
    pub fn request_approval(&mut self, question: impl Into<String>) {
        self.approvals.push(ApprovalRecord {
            question: question.into(),
            answer: None,
        });
    }

    pub fn has_pending_approval(&self) -> bool {
        self.approvals.iter().any(|a| a.answer.is_none())
    }

    /// Answer the oldest pending question. Returns the question answered.
    pub fn answer_pending(&mut self, answer: impl Into<String>) -> Option<&str> {
        let record = self.approvals.iter_mut().find(|a| a.answer.is_none())?;
        record.answer = Some(answer.into());
        Some(record.question.as_str())
    }

    /// Exact-match lookup of an approved question
    pub fn is_approved(&self, question: &str) -> bool {
        self.approvals
            .iter()
            .any(|a| a.question == question && a.is_approved())
    }

    pub fn approvals(&self) -> &[ApprovalRecord] {
        &self.approvals
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Every attribute, including the parameters the conversation was created with
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn merge_attributes(&mut self, values: &Map<String, Value>) {
        for (name, value) in values {
            self.attributes.insert(name.clone(), value.clone());
        }
    }

    // ------------------------------------------------------------------
    // Delegation
    // ------------------------------------------------------------------

    pub fn delegations(&self) -> &[DelegationInfo] {
        &self.delegations
    }

    /// Context for a successor session of `to_kind` at the same key.
    ///
    /// Approvals, attributes, and earlier delegation hops carry over.
    #[must_use]
    pub fn carry_forward(&self, to_kind: &str, brief: &str) -> Self {
        let mut next = self.clone();
        next.delegations.push(DelegationInfo {
            from_kind: self.kind.clone(),
            to_kind: to_kind.to_string(),
            brief: brief.to_string(),
        });
        next.kind = to_kind.to_string();
        next
    }
}
