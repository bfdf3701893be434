//! Multi-agent sessions
//!
//! A [`Session`] is one running conversation between the participants of a
//! blueprint. [`SessionManager`] keeps sessions alive between requests,
//! [`ConversationEngine`] drives their turn loop, and [`DelegationBridge`]
//! swaps one session for another of a different kind at the same key.
//!
//! Each session sits behind its own async mutex. Only one request may drive
//! a given key at a time; a second concurrent request for the same key is
//! rejected with `SessionBusy` rather than queued.

mod blueprint;
mod conversation;
mod delegation;
mod engine;
mod error;
mod manager;
mod transcript;

#[cfg(test)]
mod proptests;

pub use blueprint::{
    KindParams, ParticipantSpec, SessionBlueprint, SessionFactory, SpeakerSelection,
};
pub use conversation::DEFAULT_KIND;
pub use delegation::DelegationBridge;
pub use engine::{ConversationEngine, EngineConfig, SessionOutcome};
pub use error::SessionError;
pub use manager::SessionManager;
pub use transcript::Message;

use crate::context::{ContextStore, SharedContext};
use crate::llm::{LlmRequest, SystemContent, ToolDefinition};
use crate::tools::{BoundTool, ToolDispatcher};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifies a conversation across requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub tenant_id: i64,
    pub conversation_id: i64,
}

impl SessionKey {
    pub fn new(tenant_id: i64, conversation_id: i64) -> Self {
        Self {
            tenant_id,
            conversation_id,
        }
    }

    /// Stable, unique name for the conversation
    pub fn session_name(self) -> String {
        format!("{}_{}", self.tenant_id, self.conversation_id)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.tenant_id, self.conversation_id)
    }
}

/// `INIT -> RUNNING -> (PAUSED | DONE | FAILED)`, `PAUSED -> RUNNING`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Init,
    Running,
    /// Waiting for the client's next message
    Paused,
    Done,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Init => "init",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Done => "done",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Retry bookkeeping for the two-level retry policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryCounters {
    /// Nudges spent on the most recent LLM call
    pub message_retries: u32,
    /// Nudges spent over the session's lifetime
    pub message_retries_total: u32,
    /// Full restarts from the initial message; never reset
    pub session_restarts: u32,
}

/// One conversational role within a session
#[derive(Clone)]
pub struct Participant {
    role: String,
    description: String,
    executor: bool,
    speaks: bool,
    proposals: Vec<ToolDefinition>,
    executables: Vec<BoundTool>,
}

impl Participant {
    pub fn from_spec(spec: &ParticipantSpec) -> Self {
        Self {
            role: spec.role.clone(),
            description: spec.description.clone(),
            executor: spec.executor,
            speaks: spec.speaks,
            proposals: Vec::new(),
            executables: Vec::new(),
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_executor(&self) -> bool {
        self.executor
    }

    pub fn speaks(&self) -> bool {
        self.speaks
    }

    pub(crate) fn offer_tools(&mut self, definitions: Vec<ToolDefinition>) {
        self.proposals = definitions;
    }

    pub(crate) fn equip_tools(&mut self, tools: Vec<BoundTool>) {
        self.executables = tools;
    }

    /// Tools this participant may propose
    pub fn tool_definitions(&self) -> &[ToolDefinition] {
        &self.proposals
    }

    /// Tools this participant may run (executor only)
    pub fn executable_tool(&self, name: &str) -> Option<&BoundTool> {
        self.executables.iter().find(|t| t.name() == name)
    }
}

pub type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

pub struct Session {
    key: SessionKey,
    kind: String,
    state: SessionState,
    context: SharedContext,
    transcript: Vec<Message>,
    participants: Vec<Participant>,
    dispatcher: ToolDispatcher,
    counters: RetryCounters,
    guidelines: String,
    speaker_selection: SpeakerSelection,
    max_round: usize,
    /// Index of the next participant to speak
    cursor: usize,
    /// Give the floor back to `cursor` without consulting the manager
    hold_floor: bool,
    /// Transcript index where the current run began
    run_start: usize,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("messages", &self.transcript.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        key: SessionKey,
        kind: impl Into<String>,
        blueprint: SessionBlueprint,
        dispatcher: ToolDispatcher,
        context: ContextStore,
        default_max_round: usize,
    ) -> Result<Self, SessionError> {
        let kind = kind.into();
        blueprint.validate(&kind, !dispatcher.is_empty())?;

        let mut participants: Vec<Participant> =
            blueprint.participants.iter().map(Participant::from_spec).collect();

        let context = context.into_shared();
        dispatcher.set_context(context.clone());

        if let Some(exec) = participants.iter().position(Participant::is_executor) {
            for idx in 0..participants.len() {
                if idx == exec {
                    if participants[idx].speaks {
                        dispatcher.bind_solo(&mut participants[idx]);
                    }
                } else if participants[idx].speaks {
                    let (proposer, executor) = pair_mut(&mut participants, idx, exec);
                    dispatcher.bind(proposer, executor);
                }
            }
            if !participants[exec].speaks && participants[exec].executables.is_empty() {
                participants[exec].equip_tools(dispatcher.bound_tools());
            }
        }

        let cursor = participants.iter().position(|p| p.speaks).unwrap_or(0);

        Ok(Self {
            key,
            kind,
            state: SessionState::Init,
            context,
            transcript: Vec::new(),
            participants,
            dispatcher,
            counters: RetryCounters::default(),
            guidelines: blueprint.guidelines,
            speaker_selection: blueprint.speaker_selection,
            max_round: blueprint.max_round.unwrap_or(default_max_round),
            cursor,
            hold_floor: false,
            run_start: 0,
        })
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn name(&self) -> String {
        self.key.session_name()
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn context(&self) -> SharedContext {
        self.context.clone()
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn counters(&self) -> RetryCounters {
        self.counters
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn max_round(&self) -> usize {
        self.max_round
    }

    // ------------------------------------------------------------------
    // Turn-loop bookkeeping, driven by the engine
    // ------------------------------------------------------------------

    /// Reset to a fresh run from the initial message
    fn begin_initiate(&mut self, message: &str) {
        self.transcript.clear();
        self.transcript.push(Message::client(message));
        self.run_start = 0;
        self.cursor = self.first_speaker();
        self.hold_floor = false;
        self.state = SessionState::Running;
    }

    /// Inject the client's message and resume with the participant that paused
    fn begin_continue(&mut self, message: &str) {
        self.run_start = self.transcript.len();
        self.transcript.push(Message::client(message));
        self.hold_floor = true;
        self.state = SessionState::Running;
    }

    /// Messages appended in the current run, including the one that started it
    fn rounds(&self) -> usize {
        self.transcript.len() - self.run_start
    }

    fn push(&mut self, message: Message) {
        self.transcript.push(message);
    }

    fn finish(&mut self, state: SessionState, message: String) -> SessionOutcome {
        self.state = state;
        SessionOutcome { state, message }
    }

    fn fail(&mut self) {
        self.state = SessionState::Failed;
    }

    fn first_speaker(&self) -> usize {
        self.participants.iter().position(|p| p.speaks).unwrap_or(0)
    }

    fn speaker_count(&self) -> usize {
        self.participants.iter().filter(|p| p.speaks).count()
    }

    /// Next speaking participant after `from`, wrapping around
    fn next_speaker(&self, from: usize) -> usize {
        let n = self.participants.len();
        (1..=n)
            .map(|step| (from + step) % n)
            .find(|&idx| self.participants[idx].speaks)
            .unwrap_or(from)
    }

    fn executor(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.executor)
    }

    /// Speaking participant whose role is named in `text`
    fn match_role(&self, text: &str) -> Option<usize> {
        let wanted = text.trim().trim_matches(|c: char| !c.is_alphanumeric() && c != '_');
        self.participants
            .iter()
            .position(|p| p.speaks && p.role.eq_ignore_ascii_case(wanted))
            .or_else(|| {
                let lowered = text.to_lowercase();
                self.participants
                    .iter()
                    .position(|p| p.speaks && lowered.contains(&p.role.to_lowercase()))
            })
    }

    fn roster(&self) -> String {
        self.participants
            .iter()
            .filter(|p| p.speaks())
            .map(|p| format!("- {}: {}", p.role(), p.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Request for the participant at `idx` to take its turn
    fn request_for(&self, idx: usize, max_tokens: u32) -> LlmRequest {
        let participant = &self.participants[idx];
        let mut system = vec![SystemContent::cached(format!(
            "You are {}, a member of a marketing operations team.\n\n{}",
            participant.role, participant.description
        ))];
        if !self.guidelines.is_empty() {
            system.push(SystemContent::cached(self.guidelines.clone()));
        }
        if self.speaker_count() > 1 {
            system.push(SystemContent::new(format!("Team members:\n{}", self.roster())));
        }

        LlmRequest {
            system,
            messages: transcript::build_llm_messages(&self.transcript, &participant.role),
            tools: participant.proposals.clone(),
            max_tokens: Some(max_tokens),
        }
    }

    /// Request asking the model which role should speak next
    fn selection_request(&self, max_tokens: u32) -> LlmRequest {
        LlmRequest {
            system: vec![SystemContent::new(format!(
                "You coordinate a team conversation. Read it and reply with only the role name of the member who should speak next.\n\nTeam members:\n{}",
                self.roster()
            ))],
            messages: transcript::build_llm_messages(&self.transcript, ""),
            tools: Vec::new(),
            max_tokens: Some(max_tokens),
        }
    }
}

/// Mutable borrows of two distinct participants
fn pair_mut(items: &mut [Participant], a: usize, b: usize) -> (&mut Participant, &mut Participant) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = items.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = items.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}
