//! Turn loop with two-level retry
//!
//! A transient LLM failure is first answered with a nudge: the same request
//! plus a "please continue" prompt, after an exponential backoff. When the
//! nudges for one call run out, the whole session restarts from its initial
//! message. When restarts run out too, the session fails with
//! `TransientServiceError`.

use super::transcript::{self, Message, ToolCall};
use super::{Session, SessionError, SessionState, SpeakerSelection};
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService};
use crate::tools::{BoundTool, DispatchError, Disposition, ToolError, ToolOutput};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Messages per run before the session fails; blueprints may override
    pub max_round: usize,
    /// Nudges per LLM call
    pub message_retry_ceiling: u32,
    /// Full restarts per session
    pub session_restart_ceiling: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub max_tokens: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_round: 30,
            message_retry_ceiling: 3,
            session_restart_ceiling: 2,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            max_tokens: 4096,
        }
    }
}

/// Where a run stopped and the message to hand back
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionOutcome {
    pub state: SessionState,
    pub message: String,
}

/// Why a run stopped without an outcome
enum TurnFailure {
    /// Nudges for one call ran out
    Exhausted(LlmError),
    Fatal(SessionError),
}

impl From<SessionError> for TurnFailure {
    fn from(err: SessionError) -> Self {
        TurnFailure::Fatal(err)
    }
}

#[derive(Clone)]
pub struct ConversationEngine {
    llm: Arc<dyn LlmService>,
    config: EngineConfig,
}

impl ConversationEngine {
    pub fn new(llm: Arc<dyn LlmService>, config: EngineConfig) -> Self {
        Self { llm, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a fresh session with the client's first message
    pub async fn initiate(
        &self,
        session: &mut Session,
        message: &str,
    ) -> Result<SessionOutcome, SessionError> {
        if session.state != SessionState::Init {
            return Err(invalid_state(session, "initiate"));
        }
        info!(session = %session.key, kind = %session.kind, "Initiating session");
        // A restart replays from the initial message, so tool side effects go too
        let snapshot = session.context.lock().await.clone();

        loop {
            session.begin_initiate(message);
            match self.run_turns(session).await {
                Ok(outcome) => return Ok(outcome),
                Err(TurnFailure::Fatal(err)) => return Err(fail(session, err)),
                Err(TurnFailure::Exhausted(source)) => {
                    if session.counters.session_restarts >= self.config.session_restart_ceiling {
                        let err = transient_failure(session, source);
                        return Err(fail(session, err));
                    }
                    session.counters.session_restarts += 1;
                    *session.context.lock().await = snapshot.clone();
                    let delay =
                        self.retry_delay(session.counters.session_restarts, source.retry_after);
                    warn!(
                        session = %session.key,
                        restart = session.counters.session_restarts,
                        delay = ?delay,
                        error = %source,
                        "Restarting session from its initial message"
                    );
                    pause_for(delay).await;
                }
            }
        }
    }

    /// Resume a paused session with the client's next message.
    ///
    /// The message first answers the oldest pending approval, if any.
    pub async fn continue_chat(
        &self,
        session: &mut Session,
        message: &str,
    ) -> Result<SessionOutcome, SessionError> {
        if session.state != SessionState::Paused {
            return Err(invalid_state(session, "continue"));
        }
        {
            let mut ctx = session.context.lock().await;
            if let Some(question) = ctx.answer_pending(message) {
                info!(session = %session.key, question = %question, "Client answered approval request");
            }
        }

        session.begin_continue(message);
        match self.run_turns(session).await {
            Ok(outcome) => Ok(outcome),
            Err(TurnFailure::Fatal(err)) => Err(fail(session, err)),
            Err(TurnFailure::Exhausted(source)) => {
                let err = transient_failure(session, source);
                Err(fail(session, err))
            }
        }
    }

    async fn run_turns(&self, session: &mut Session) -> Result<SessionOutcome, TurnFailure> {
        loop {
            if session.rounds() >= session.max_round {
                return Err(SessionError::RoundLimitExceeded {
                    session: session.name(),
                    max_round: session.max_round,
                }
                .into());
            }

            let speaker = self.select_speaker(session).await?;
            let request = session.request_for(speaker, self.config.max_tokens);
            let response = self.complete_with_nudges(session, &request).await?;

            let role = session.participants[speaker].role.clone();
            let calls: Vec<ToolCall> = response
                .tool_uses()
                .into_iter()
                .map(|(id, name, input)| ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: input.clone(),
                })
                .collect();
            let reply = Message::reply(role.clone(), response.text(), calls.clone());
            debug!(
                session = %session.key,
                speaker = %role,
                tool_calls = calls.len(),
                "Participant replied"
            );

            if reply.is_terminal() {
                let text = reply.curated_text();
                session.push(reply);
                info!(session = %session.key, speaker = %role, "Session finished");
                return Ok(session.finish(SessionState::Done, text));
            }
            session.push(reply);

            if calls.is_empty() {
                session.cursor = session.next_speaker(speaker);
                continue;
            }
            if let Some(outcome) = self.execute_calls(session, speaker, &calls).await? {
                return Ok(outcome);
            }
            // Results go back to whoever asked for them
            session.cursor = speaker;
            session.hold_floor = true;
        }
    }

    async fn select_speaker(&self, session: &mut Session) -> Result<usize, TurnFailure> {
        let hold = std::mem::take(&mut session.hold_floor);
        if hold
            || session.speaker_selection == SpeakerSelection::RoundRobin
            || session.speaker_count() < 2
        {
            return Ok(session.cursor);
        }

        let request = session.selection_request(self.config.max_tokens);
        let response = self.complete_with_nudges(session, &request).await?;
        let answer = response.text();
        Ok(session.match_role(&answer).unwrap_or_else(|| {
            warn!(session = %session.key, answer = %answer, "Manager named no known role, using round robin");
            session.cursor
        }))
    }

    /// Run calls in order; a pausing or terminating result ends the run
    async fn execute_calls(
        &self,
        session: &mut Session,
        speaker: usize,
        calls: &[ToolCall],
    ) -> Result<Option<SessionOutcome>, TurnFailure> {
        let requester = session.participants[speaker].role.clone();
        let executor = session
            .executor()
            .map_or_else(|| requester.clone(), |p| p.role.clone());

        for (idx, call) in calls.iter().enumerate() {
            let tool = session
                .executor()
                .and_then(|p| p.executable_tool(&call.name))
                .cloned();
            let output = match tool {
                Some(tool) => invoke(session, &tool, call).await?,
                None => {
                    warn!(session = %session.key, tool = %call.name, "Model requested unavailable tool");
                    ToolOutput::error(format!(
                        "Tool `{}` is not available in this conversation",
                        call.name
                    ))
                }
            };
            session.push(Message::tool_result(&executor, call, &requester, &output));

            let state = match output.disposition {
                Disposition::Continue => continue,
                Disposition::Pause => SessionState::Paused,
                Disposition::Terminate => SessionState::Done,
            };
            for skipped in &calls[idx + 1..] {
                session.push(Message::tool_result(
                    &executor,
                    skipped,
                    &requester,
                    &ToolOutput::error("Skipped: the conversation stopped before this call ran"),
                ));
            }
            session.cursor = speaker;
            info!(session = %session.key, tool = %call.name, state = %state, "Tool ended the run");
            return Ok(Some(session.finish(state, output.output)));
        }
        Ok(None)
    }

    /// One LLM call, nudged on transient failures up to the message ceiling
    async fn complete_with_nudges(
        &self,
        session: &mut Session,
        request: &LlmRequest,
    ) -> Result<LlmResponse, TurnFailure> {
        session.counters.message_retries = 0;
        let mut nudged: Option<LlmRequest> = None;

        loop {
            let attempt = nudged.as_ref().unwrap_or(request);
            match self.llm.complete(attempt).await {
                Ok(response) => return Ok(response),
                Err(err) if err.kind.is_retryable() => {
                    if session.counters.message_retries >= self.config.message_retry_ceiling {
                        warn!(
                            session = %session.key,
                            nudges = session.counters.message_retries,
                            error = %err,
                            "Nudges exhausted"
                        );
                        return Err(TurnFailure::Exhausted(err));
                    }
                    session.counters.message_retries += 1;
                    session.counters.message_retries_total += 1;

                    let delay = self.retry_delay(session.counters.message_retries, err.retry_after);
                    warn!(
                        session = %session.key,
                        attempt = session.counters.message_retries,
                        delay = ?delay,
                        error = %err,
                        "Transient LLM failure, nudging"
                    );
                    pause_for(delay).await;

                    if nudged.is_none() {
                        nudged = Some(LlmRequest {
                            messages: transcript::with_nudge(&request.messages),
                            ..request.clone()
                        });
                    }
                }
                Err(err) => return Err(SessionError::Llm(err).into()),
            }
        }
    }

    /// Exponential backoff from the base delay, honouring server hints
    fn retry_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self.config.retry_base_delay.saturating_mul(1 << exponent);
        retry_after
            .unwrap_or(backoff)
            .min(self.config.retry_max_delay)
    }
}

async fn invoke(
    session: &Session,
    tool: &BoundTool,
    call: &ToolCall,
) -> Result<ToolOutput, TurnFailure> {
    info!(session = %session.key, tool = %call.name, "Executing tool");
    match tool.invoke(call.input.clone()).await {
        Ok(output) => Ok(output),
        // The model sent the wrong arguments; let it correct itself
        Err(ToolError::Dispatch(err @ DispatchError::ArityMismatch { .. })) => {
            warn!(session = %session.key, error = %err, "Rejected tool call");
            Ok(ToolOutput::error(err.to_string()))
        }
        Err(ToolError::Dispatch(err)) => Err(SessionError::from(err).into()),
        Err(ToolError::Fault(message)) => Err(SessionError::ToolFault {
            tool: call.name.clone(),
            message,
        }
        .into()),
        Err(ToolError::Session(err)) => Err(TurnFailure::Fatal(*err)),
    }
}

async fn pause_for(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

fn invalid_state(session: &Session, operation: &'static str) -> SessionError {
    SessionError::InvalidState {
        session: session.name(),
        state: session.state,
        operation,
    }
}

fn transient_failure(session: &Session, source: LlmError) -> SessionError {
    SessionError::TransientServiceError {
        session: session.name(),
        nudges: session.counters.message_retries_total,
        restarts: session.counters.session_restarts,
        source,
    }
}

fn fail(session: &mut Session, err: SessionError) -> SessionError {
    session.fail();
    error!(session = %session.key, error = %err, "Session failed");
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextStore, SharedContext};
    use crate::llm::{ContentBlock, LlmErrorKind, Usage};
    use crate::session::transcript::{MessagePayload, CONTINUE_PROMPT};
    use crate::session::{ParticipantSpec, SessionBlueprint, SessionKey};
    use crate::testing::{fast_config, MockLlmService};
    use crate::tools::{
        ApprovalGate, AskForApprovalTool, ContextAwareTool, ParamKind, ReplyPayload,
        ReplyToClientTool, Tool, ToolCatalog, ToolHandler, ToolParam,
    };
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct RecordNote;

    #[async_trait]
    impl Tool for RecordNote {
        fn name(&self) -> &'static str {
            "record_note"
        }

        fn description(&self) -> String {
            "Record a planning note".to_string()
        }

        fn parameters(&self) -> Vec<ToolParam> {
            vec![ToolParam::required("note", ParamKind::String, "The note")]
        }

        async fn run(&self, input: Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::success(format!(
                "noted: {}",
                input["note"].as_str().unwrap_or_default()
            )))
        }
    }

    /// Mutating tool guarded by the approval gate
    struct PauseCampaign;

    #[async_trait]
    impl ContextAwareTool for PauseCampaign {
        fn name(&self) -> &'static str {
            "pause_campaign"
        }

        fn description(&self) -> String {
            "Pause a campaign".to_string()
        }

        fn parameters(&self) -> Vec<ToolParam> {
            vec![ToolParam::required(
                "justification",
                ParamKind::String,
                "The approved question",
            )]
        }

        async fn run(&self, input: Value, ctx: SharedContext) -> Result<ToolOutput, ToolError> {
            let justification = input["justification"].as_str().unwrap_or_default();
            let mut ctx = ctx.lock().await;
            if let Err(denied) = ApprovalGate::check(&ctx, justification) {
                return Ok(denied);
            }
            ctx.set("paused", json!(true));
            Ok(ToolOutput::success("campaign paused"))
        }
    }

    struct TagAccount;

    #[async_trait]
    impl ContextAwareTool for TagAccount {
        fn name(&self) -> &'static str {
            "tag_account"
        }

        fn description(&self) -> String {
            "Tag the client's account".to_string()
        }

        fn parameters(&self) -> Vec<ToolParam> {
            vec![ToolParam::required("tag", ParamKind::String, "Tag to apply")]
        }

        async fn run(&self, input: Value, ctx: SharedContext) -> Result<ToolOutput, ToolError> {
            ctx.lock().await.set("tagged", input["tag"].clone());
            Ok(ToolOutput::success("tagged"))
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn description(&self) -> String {
            "Always faults".to_string()
        }

        fn parameters(&self) -> Vec<ToolParam> {
            Vec::new()
        }

        async fn run(&self, _input: Value) -> Result<ToolOutput, ToolError> {
            Err(ToolError::Fault("disk on fire".into()))
        }
    }

    fn catalog() -> ToolCatalog {
        let mut catalog = ToolCatalog::new();
        catalog.insert(ToolHandler::plain(ReplyToClientTool));
        catalog.insert(ToolHandler::with_context(AskForApprovalTool));
        catalog.insert(ToolHandler::plain(RecordNote));
        catalog.insert(ToolHandler::with_context(PauseCampaign));
        catalog.insert(ToolHandler::with_context(TagAccount));
        catalog.insert(ToolHandler::plain(Broken));
        catalog
    }

    fn build(blueprint: SessionBlueprint) -> Session {
        let key = SessionKey::new(1, 100);
        let dispatcher = catalog().dispatcher_for(&blueprint.allowed_tools).unwrap();
        Session::new(
            key,
            "test",
            blueprint,
            dispatcher,
            ContextStore::new(key, "test"),
            30,
        )
        .unwrap()
    }

    fn solo() -> Session {
        build(
            SessionBlueprint::new("Answer briefly.")
                .participant(ParticipantSpec::solo("assistant", "Helps the client"))
                .tool("reply_to_client")
                .tool("ask_for_approval")
                .tool("pause_campaign")
                .tool("broken"),
        )
    }

    fn team(selection: SpeakerSelection) -> Session {
        build(
            SessionBlueprint::new("")
                .participant(ParticipantSpec::proposer("planner", "Plans the campaign"))
                .participant(ParticipantSpec::proposer("reviewer", "Reviews the plan"))
                .participant(ParticipantSpec::executor("executor", "Runs tools"))
                .tool("record_note")
                .tool("reply_to_client")
                .speaker_selection(selection),
        )
    }

    fn engine(mock: &Arc<MockLlmService>, config: EngineConfig) -> ConversationEngine {
        ConversationEngine::new(mock.clone(), config)
    }

    fn finish_reply(mock: &MockLlmService, message: &str) {
        mock.queue_tool_use(
            "done",
            "reply_to_client",
            json!({"message": message, "completed": true}),
        );
    }

    #[tokio::test]
    async fn test_echo_session_returns_reply_payload() {
        let mock = Arc::new(MockLlmService::new("mock"));
        finish_reply(&mock, "ok");
        let mut session = solo();

        let outcome = engine(&mock, fast_config())
            .initiate(&mut session, "Reply with ok")
            .await
            .unwrap();

        assert_eq!(outcome.state, SessionState::Done);
        assert_eq!(outcome.message, r#"{"message":"ok","completed":true}"#);
        assert_eq!(session.state(), SessionState::Done);
        assert_eq!(session.transcript().len(), 3);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_counter_matches_failures_before_success() {
        for failures in 0..=3 {
            let mock = Arc::new(MockLlmService::new("mock"));
            for _ in 0..failures {
                mock.queue_error(LlmError::server_error("overloaded"));
            }
            finish_reply(&mock, "ok");
            let mut session = solo();

            let outcome = engine(&mock, fast_config())
                .initiate(&mut session, "go")
                .await
                .unwrap();

            assert_eq!(outcome.state, SessionState::Done);
            assert_eq!(session.counters().message_retries, failures);
            assert_eq!(session.counters().session_restarts, 0);
            assert_eq!(mock.call_count(), failures as usize + 1);
        }
    }

    #[tokio::test]
    async fn test_nudge_goes_to_model_not_transcript() {
        let mock = Arc::new(MockLlmService::new("mock"));
        mock.queue_error(LlmError::network("reset"));
        finish_reply(&mock, "ok");
        let mut session = solo();

        engine(&mock, fast_config())
            .initiate(&mut session, "go")
            .await
            .unwrap();

        let requests = mock.recorded_requests();
        let nudge = ContentBlock::text(CONTINUE_PROMPT);
        assert!(!requests[0].messages[0].content.contains(&nudge));
        assert!(requests[1].messages[0].content.contains(&nudge));
        assert!(session
            .transcript()
            .iter()
            .all(|m| !m.text().contains(CONTINUE_PROMPT)));
    }

    #[tokio::test]
    async fn test_exhausted_nudges_restart_from_initial_message() {
        let mock = Arc::new(MockLlmService::new("mock"));
        mock.queue_text("Let me think");
        mock.queue_error(LlmError::rate_limit("slow down"));
        mock.queue_error(LlmError::rate_limit("slow down"));
        finish_reply(&mock, "ok");
        let config = EngineConfig {
            message_retry_ceiling: 1,
            ..fast_config()
        };
        let mut session = solo();

        let outcome = engine(&mock, config)
            .initiate(&mut session, "go")
            .await
            .unwrap();

        assert_eq!(outcome.state, SessionState::Done);
        assert_eq!(session.counters().session_restarts, 1);
        // The abandoned run's reply is gone
        assert_eq!(session.transcript().len(), 3);
        assert_eq!(session.transcript()[0].text(), "go");
        assert!(session.transcript().iter().all(|m| m.text() != "Let me think"));
    }

    #[tokio::test]
    async fn test_restart_discards_context_changes_of_abandoned_run() {
        let mock = Arc::new(MockLlmService::new("mock"));
        mock.queue_tool_use("t1", "tag_account", json!({"tag": "vip"}));
        mock.queue_error(LlmError::rate_limit("slow down"));
        mock.queue_error(LlmError::rate_limit("slow down"));
        finish_reply(&mock, "ok");
        let config = EngineConfig {
            message_retry_ceiling: 1,
            ..fast_config()
        };
        let mut session = build(
            SessionBlueprint::new("")
                .participant(ParticipantSpec::solo("assistant", "Helps the client"))
                .tool("reply_to_client")
                .tool("tag_account"),
        );
        session
            .context()
            .lock()
            .await
            .set("account_id", json!("act_1"));

        let outcome = engine(&mock, config)
            .initiate(&mut session, "Tag my account")
            .await
            .unwrap();

        assert_eq!(outcome.state, SessionState::Done);
        assert_eq!(session.counters().session_restarts, 1);
        let ctx = session.context();
        let ctx = ctx.lock().await;
        assert_eq!(ctx.get("tagged"), None);
        assert_eq!(ctx.get("account_id"), Some(&json!("act_1")));
    }

    #[tokio::test]
    async fn test_both_ceilings_exhausted_is_transient_failure() {
        let mock = Arc::new(MockLlmService::new("mock"));
        let config = EngineConfig {
            message_retry_ceiling: 1,
            session_restart_ceiling: 1,
            ..fast_config()
        };
        let mut session = solo();

        let err = engine(&mock, config)
            .initiate(&mut session, "go")
            .await
            .unwrap_err();

        match err {
            SessionError::TransientServiceError {
                nudges,
                restarts,
                source,
                ..
            } => {
                assert_eq!(nudges, 2);
                assert_eq!(restarts, 1);
                assert_eq!(source.kind, LlmErrorKind::Network);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(mock.call_count(), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let mock = Arc::new(MockLlmService::new("mock"));
        mock.queue_error(LlmError::auth("bad key"));
        let mut session = solo();

        let err = engine(&mock, fast_config())
            .initiate(&mut session, "go")
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Llm(ref e) if e.kind == LlmErrorKind::Auth));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_round_limit_fails_without_truncating() {
        let mock = Arc::new(MockLlmService::new("mock"));
        for _ in 0..5 {
            mock.queue_text("still working");
        }
        let mut session = build(
            SessionBlueprint::new("")
                .participant(ParticipantSpec::solo("assistant", "Helps"))
                .tool("reply_to_client")
                .max_round(3),
        );

        let err = engine(&mock, fast_config())
            .initiate(&mut session, "go")
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::RoundLimitExceeded { max_round: 3, .. }));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(session.transcript().len(), 3);
    }

    #[tokio::test]
    async fn test_sentinel_reply_finishes_with_curated_text() {
        let mock = Arc::new(MockLlmService::new("mock"));
        mock.queue_text("Report sent. TERMINATE");
        let mut session = solo();

        let outcome = engine(&mock, fast_config())
            .initiate(&mut session, "Send the report")
            .await
            .unwrap();

        assert_eq!(outcome.state, SessionState::Done);
        assert_eq!(outcome.message, "Report sent.");
    }

    #[tokio::test]
    async fn test_team_tool_results_authored_by_executor() {
        let mock = Arc::new(MockLlmService::new("mock"));
        mock.queue_tool_use("n1", "record_note", json!({"note": "target CPA 12"}));
        mock.queue_text("Plan ready for review");
        mock.queue_text("Approved. TERMINATE");
        let mut session = team(SpeakerSelection::RoundRobin);

        let outcome = engine(&mock, fast_config())
            .initiate(&mut session, "Plan a spring campaign")
            .await
            .unwrap();
        assert_eq!(outcome.message, "Approved.");

        let result = &session.transcript()[2];
        assert_eq!(result.author, "executor");
        assert!(matches!(
            result.payload,
            MessagePayload::ToolResult { ref requested_by, ref output, is_error: false, .. }
                if requested_by == "planner" && output == "noted: target CPA 12"
        ));

        let requests = mock.recorded_requests();
        // Floor returns to the planner after its tool result, then passes on
        assert!(requests[1].system[0].text.contains("planner"));
        assert!(requests[2].system[0].text.contains("reviewer"));
        // Only proposers are offered tools, and the executor never speaks
        assert_eq!(requests[0].tools.len(), 2);
        assert!(requests.iter().all(|r| !r.system[0].text.contains("You are executor")));
    }

    #[tokio::test]
    async fn test_manager_selection_picks_named_role() {
        let mock = Arc::new(MockLlmService::new("mock"));
        mock.queue_text("reviewer");
        mock.queue_text("Looks fine. TERMINATE");
        let mut session = team(SpeakerSelection::Manager);

        let outcome = engine(&mock, fast_config())
            .initiate(&mut session, "Check this plan")
            .await
            .unwrap();

        assert_eq!(outcome.message, "Looks fine.");
        let requests = mock.recorded_requests();
        assert!(requests[0].tools.is_empty());
        assert!(requests[1].system[0].text.contains("reviewer"));
        assert_eq!(session.transcript()[1].author, "reviewer");
    }

    #[tokio::test]
    async fn test_approval_pause_then_continue() {
        let mock = Arc::new(MockLlmService::new("mock"));
        let engine = engine(&mock, fast_config());
        let mut session = solo();

        mock.queue_tool_use("a1", "ask_for_approval", json!({"question": "Pause campaign 9?"}));
        let outcome = engine.initiate(&mut session, "Pause campaign 9").await.unwrap();
        assert_eq!(outcome.state, SessionState::Paused);
        let asked: ReplyPayload = serde_json::from_str(&outcome.message).unwrap();
        assert_eq!(asked.message, "Pause campaign 9?");

        // A paused session cannot be initiated again
        let err = engine.initiate(&mut session, "again").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { state: SessionState::Paused, .. }));

        mock.queue_tool_use("p1", "pause_campaign", json!({"justification": "Pause campaign 9?"}));
        finish_reply(&mock, "Campaign 9 is paused.");
        let outcome = engine.continue_chat(&mut session, "Yes").await.unwrap();
        assert_eq!(outcome.state, SessionState::Done);

        let ctx = session.context();
        let store = ctx.lock().await;
        assert!(store.is_approved("Pause campaign 9?"));
        assert_eq!(store.get("paused"), Some(&json!(true)));
        drop(store);

        let err = engine.continue_chat(&mut session, "thanks").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { state: SessionState::Done, .. }));
    }

    #[tokio::test]
    async fn test_unapproved_mutation_is_refused_in_conversation() {
        let mock = Arc::new(MockLlmService::new("mock"));
        mock.queue_tool_use("p1", "pause_campaign", json!({"justification": "Pause campaign 9?"}));
        finish_reply(&mock, "I need approval first.");
        let mut session = solo();

        engine(&mock, fast_config())
            .initiate(&mut session, "Pause campaign 9")
            .await
            .unwrap();

        assert!(matches!(
            session.transcript()[2].payload,
            MessagePayload::ToolResult { is_error: true, .. }
        ));
        assert_eq!(session.context().lock().await.get("paused"), None);
    }

    #[tokio::test]
    async fn test_pause_skips_remaining_calls() {
        let mock = Arc::new(MockLlmService::new("mock"));
        mock.queue_response(LlmResponse {
            content: vec![
                ContentBlock::tool_use(
                    "a1",
                    "ask_for_approval",
                    json!({"question": "Raise budget?"}),
                ),
                ContentBlock::tool_use(
                    "r1",
                    "reply_to_client",
                    json!({"message": "done", "completed": true}),
                ),
            ],
            usage: Usage::default(),
        });
        let mut session = solo();

        let outcome = engine(&mock, fast_config())
            .initiate(&mut session, "Raise the budget")
            .await
            .unwrap();

        assert_eq!(outcome.state, SessionState::Paused);
        assert_eq!(session.transcript().len(), 4);
        assert!(session.transcript()[3].text().starts_with("Skipped"));
    }

    #[tokio::test]
    async fn test_bad_arguments_are_fed_back_to_the_model() {
        let mock = Arc::new(MockLlmService::new("mock"));
        mock.queue_tool_use("r1", "reply_to_client", json!({"msg": "hi"}));
        mock.queue_tool_use("r2", "launch_rockets", json!({}));
        finish_reply(&mock, "hi");
        let mut session = solo();

        let outcome = engine(&mock, fast_config())
            .initiate(&mut session, "Say hi")
            .await
            .unwrap();

        assert_eq!(outcome.state, SessionState::Done);
        let errors: Vec<&str> = session
            .transcript()
            .iter()
            .filter(|m| matches!(m.payload, MessagePayload::ToolResult { is_error: true, .. }))
            .map(Message::text)
            .collect();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("reply_to_client"));
        assert!(errors[1].contains("launch_rockets"));
    }

    #[tokio::test]
    async fn test_tool_fault_fails_session() {
        let mock = Arc::new(MockLlmService::new("mock"));
        mock.queue_tool_use("b1", "broken", json!({}));
        let mut session = solo();

        let err = engine(&mock, fast_config())
            .initiate(&mut session, "go")
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::ToolFault { ref tool, .. } if tool == "broken"));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn test_retry_delay_backs_off_exponentially_and_caps() {
        let mock = Arc::new(MockLlmService::new("mock"));
        let engine = engine(
            &mock,
            EngineConfig {
                retry_base_delay: Duration::from_millis(100),
                retry_max_delay: Duration::from_millis(350),
                ..EngineConfig::default()
            },
        );
        assert_eq!(engine.retry_delay(1, None), Duration::from_millis(100));
        assert_eq!(engine.retry_delay(2, None), Duration::from_millis(200));
        assert_eq!(engine.retry_delay(3, None), Duration::from_millis(350));
        assert_eq!(
            engine.retry_delay(1, Some(Duration::from_millis(250))),
            Duration::from_millis(250)
        );
    }
}
