//! Property-based tests for sessions
//!
//! These tests verify registry and transcript invariants hold across
//! generated inputs.

use super::transcript::{build_llm_messages, ToolCall, TERMINATION_SENTINEL};
use super::*;
use crate::llm::{LlmError, MessageRole};
use crate::testing::{fast_config, MockLlmService};
use crate::tools::{ToolCatalog, ToolOutput};
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;

// ============================================================================
// Test Helpers
// ============================================================================

const ROLES: &[&str] = &["planner", "reviewer", "executor"];

fn manager(mock: Arc<MockLlmService>, config: EngineConfig) -> Arc<SessionManager> {
    let manager = SessionManager::new(ConversationEngine::new(mock, config), ToolCatalog::new());
    let factory: Arc<dyn SessionFactory> = Arc::new(|_: &KindParams| {
        SessionBlueprint::new("")
            .participant(ParticipantSpec::solo("assistant", "Helps"))
            .tool("reply_to_client")
    });
    manager
        .register_kind(DEFAULT_KIND, factory)
        .expect("register default kind");
    manager
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build runtime")
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_key() -> impl Strategy<Value = SessionKey> {
    (0i64..4, 0i64..4).prop_map(|(tenant, conversation)| SessionKey::new(tenant, conversation))
}

fn arb_role() -> impl Strategy<Value = &'static str> {
    prop::sample::select(ROLES)
}

fn arb_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        "[a-zA-Z ]{1,20}".prop_map(Message::client),
        (arb_role(), "[a-zA-Z ]{0,20}", 0usize..3).prop_map(|(author, text, calls)| {
            let calls = (0..calls)
                .map(|i| ToolCall {
                    id: format!("{author}-{i}"),
                    name: "reply_to_client".into(),
                    input: json!({"message": text}),
                })
                .collect();
            Message::reply(author, text, calls)
        }),
        (arb_role(), arb_role(), any::<bool>(), "[a-z ]{0,20}").prop_map(
            |(author, requester, ok, output)| {
                let call = ToolCall {
                    id: format!("{requester}-0"),
                    name: "reply_to_client".into(),
                    input: json!({}),
                };
                let output = if ok {
                    ToolOutput::success(output)
                } else {
                    ToolOutput::error(output)
                };
                Message::tool_result(author, &call, requester, &output)
            }
        ),
    ]
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Popping is idempotent and only ever removes what was created
    #[test]
    fn prop_pop_is_idempotent(
        created in proptest::collection::vec(arb_key(), 0..8),
        popped in proptest::collection::vec(arb_key(), 0..8),
    ) {
        let manager = manager(Arc::new(MockLlmService::new("mock")), fast_config());
        let mut live = HashSet::new();
        for key in created {
            let result = manager.create(key, DEFAULT_KIND, &KindParams::new());
            prop_assert_eq!(result.is_ok(), live.insert(key));
        }

        for key in popped {
            let was_live = live.remove(&key);
            prop_assert_eq!(manager.pop(key).is_some(), was_live);
            prop_assert!(manager.pop(key).is_none());
        }
        prop_assert_eq!(manager.len(), live.len());
    }

    /// Every view starts and ends with the user and alternates roles
    #[test]
    fn prop_views_alternate_roles(
        transcript in proptest::collection::vec(arb_message(), 1..12),
        speaker in arb_role(),
    ) {
        let view = build_llm_messages(&transcript, speaker);
        prop_assert!(!view.is_empty());
        prop_assert_eq!(view[0].role, MessageRole::User);
        prop_assert_eq!(view[view.len() - 1].role, MessageRole::User);
        for pair in view.windows(2) {
            prop_assert_ne!(pair[0].role, pair[1].role);
        }
        prop_assert!(view.iter().all(|m| !m.content.is_empty()));
    }

    /// Client-facing text never carries the termination sentinel
    #[test]
    fn prop_terminal_replies_are_curated(
        before in "[a-z ]{0,20}",
        after in "[a-z ]{0,20}",
    ) {
        let reply = Message::reply("assistant", format!("{before}{TERMINATION_SENTINEL}{after}"), vec![]);
        prop_assert!(reply.is_terminal());
        prop_assert!(!reply.curated_text().contains(TERMINATION_SENTINEL));
    }

    /// After N-1 transient failures and a success, the retry counter is N-1
    #[test]
    fn prop_retry_counter_tracks_failures(failures in 0u32..=3) {
        let mock = Arc::new(MockLlmService::new("mock"));
        for _ in 0..failures {
            mock.queue_error(LlmError::network("reset"));
        }
        mock.queue_tool_use("r1", "reply_to_client", json!({"message": "ok", "completed": true}));
        let manager = manager(mock.clone(), fast_config());

        let key = SessionKey::new(1, 1);
        let handle = manager.create(key, DEFAULT_KIND, &KindParams::new()).expect("create");
        let counters = runtime().block_on(async {
            let mut session = handle.lock().await;
            manager.engine().initiate(&mut session, "go").await.expect("initiate");
            session.counters()
        });

        prop_assert_eq!(counters.message_retries, failures);
        prop_assert_eq!(counters.session_restarts, 0);
        prop_assert_eq!(mock.call_count(), failures as usize + 1);
    }
}
