//! Transcript messages and per-speaker LLM views of them

use crate::llm::{ContentBlock, LlmMessage, MessageRole};
use crate::tools::ToolOutput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A participant reply containing this text ends the conversation
pub const TERMINATION_SENTINEL: &str = "TERMINATE";

/// Appended when a view would otherwise end on the speaker's own turn,
/// and sent as the nudge after a transient failure
pub(crate) const CONTINUE_PROMPT: &str = "Please continue.";

pub(crate) const CLIENT_AUTHOR: &str = "client";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Participant,
    Executor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    Text {
        text: String,
    },
    Reply {
        text: String,
        tool_calls: Vec<ToolCall>,
    },
    ToolResult {
        call_id: String,
        tool: String,
        /// Role that proposed the call
        requested_by: String,
        output: String,
        is_error: bool,
    },
}

/// One entry of a session transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub author: String,
    pub role: Role,
    pub payload: MessagePayload,
    /// Ends the conversation
    pub terminal: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn client(text: impl Into<String>) -> Self {
        Self {
            author: CLIENT_AUTHOR.to_string(),
            role: Role::Client,
            payload: MessagePayload::Text { text: text.into() },
            terminal: false,
            created_at: Utc::now(),
        }
    }

    pub fn reply(
        author: impl Into<String>,
        text: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        let text = text.into();
        Self {
            author: author.into(),
            role: Role::Participant,
            terminal: text.contains(TERMINATION_SENTINEL),
            payload: MessagePayload::Reply { text, tool_calls },
            created_at: Utc::now(),
        }
    }

    pub fn tool_result(
        executor: impl Into<String>,
        call: &ToolCall,
        requested_by: impl Into<String>,
        output: &ToolOutput,
    ) -> Self {
        Self {
            author: executor.into(),
            role: Role::Executor,
            payload: MessagePayload::ToolResult {
                call_id: call.id.clone(),
                tool: call.name.clone(),
                requested_by: requested_by.into(),
                output: output.output.clone(),
                is_error: !output.success,
            },
            terminal: false,
            created_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn text(&self) -> &str {
        match &self.payload {
            MessagePayload::Text { text } | MessagePayload::Reply { text, .. } => text,
            MessagePayload::ToolResult { output, .. } => output,
        }
    }

    /// Text suitable for the client, without the termination sentinel
    pub fn curated_text(&self) -> String {
        match &self.payload {
            MessagePayload::Reply { text, .. } => {
                text.replace(TERMINATION_SENTINEL, "").trim().to_string()
            }
            _ => self.text().to_string(),
        }
    }
}

/// The transcript as seen by `speaker`.
///
/// The speaker's own replies become assistant turns and results of its own
/// calls become tool results. Everyone else's messages are attributed user
/// text. Adjacent entries with the same role are merged so roles alternate,
/// and a view that would end on an assistant turn gets a continue prompt.
pub fn build_llm_messages(transcript: &[Message], speaker: &str) -> Vec<LlmMessage> {
    let mut messages: Vec<LlmMessage> = Vec::new();

    for message in transcript {
        let (role, blocks) = view_of(message, speaker);
        match messages.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => messages.push(LlmMessage {
                role,
                content: blocks,
            }),
        }
    }

    if messages.first().is_some_and(|m| m.role == MessageRole::Assistant) {
        messages.insert(0, LlmMessage::user_text(CONTINUE_PROMPT));
    }
    if messages.last().map_or(true, |m| m.role == MessageRole::Assistant) {
        messages.push(LlmMessage::user_text(CONTINUE_PROMPT));
    }
    messages
}

/// Copy of `messages` with the continue prompt appended to the final user turn
pub(crate) fn with_nudge(messages: &[LlmMessage]) -> Vec<LlmMessage> {
    let mut nudged = messages.to_vec();
    match nudged.last_mut() {
        Some(last) if last.role == MessageRole::User => {
            last.content.push(ContentBlock::text(CONTINUE_PROMPT));
        }
        _ => nudged.push(LlmMessage::user_text(CONTINUE_PROMPT)),
    }
    nudged
}

fn view_of(message: &Message, speaker: &str) -> (MessageRole, Vec<ContentBlock>) {
    let own = !speaker.is_empty() && message.author == speaker;
    match &message.payload {
        MessagePayload::Text { text } => (
            MessageRole::User,
            vec![ContentBlock::text(format!("{}: {text}", message.author))],
        ),
        MessagePayload::Reply { text, tool_calls } if own => {
            let mut blocks = Vec::with_capacity(tool_calls.len() + 1);
            if !text.is_empty() {
                blocks.push(ContentBlock::text(text.clone()));
            }
            blocks.extend(
                tool_calls
                    .iter()
                    .map(|c| ContentBlock::tool_use(c.id.clone(), c.name.clone(), c.input.clone())),
            );
            if blocks.is_empty() {
                blocks.push(ContentBlock::text("(no reply)"));
            }
            (MessageRole::Assistant, blocks)
        }
        MessagePayload::Reply { text, tool_calls } => {
            let mut blocks = Vec::with_capacity(tool_calls.len() + 1);
            if !text.is_empty() {
                blocks.push(ContentBlock::text(format!("{}: {text}", message.author)));
            }
            blocks.extend(tool_calls.iter().map(|c| {
                ContentBlock::text(format!("{} requested {}({})", message.author, c.name, c.input))
            }));
            if blocks.is_empty() {
                blocks.push(ContentBlock::text(format!("{}: (no reply)", message.author)));
            }
            (MessageRole::User, blocks)
        }
        MessagePayload::ToolResult {
            call_id,
            tool,
            requested_by,
            output,
            is_error,
        } => {
            if !speaker.is_empty() && requested_by == speaker {
                (
                    MessageRole::User,
                    vec![ContentBlock::tool_result(call_id.clone(), output.clone(), *is_error)],
                )
            } else {
                let status = if *is_error { "failed" } else { "returned" };
                (
                    MessageRole::User,
                    vec![ContentBlock::text(format!(
                        "{} ran {tool} for {requested_by}, which {status}: {output}",
                        message.author
                    ))],
                )
            }
        }
    }
}
