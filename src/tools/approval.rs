//! Two-phase approval for mutating tools
//!
//! `ask_for_approval` records a pending question and pauses the session.
//! The client's next message answers it. Mutating tools then call
//! [`ApprovalGate::check`] with their justification, which must equal the
//! approved question exactly.

use super::{
    ContextAwareTool, Disposition, ParamKind, ReplyPayload, ToolError, ToolOutput, ToolParam,
};
use crate::context::{ContextStore, SharedContext};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

pub struct ApprovalGate;

impl ApprovalGate {
    /// `Err` carries the payload to return to the conversation instead of mutating
    pub fn check(ctx: &ContextStore, justification: &str) -> Result<(), ToolOutput> {
        if ctx.is_approved(justification) {
            Ok(())
        } else {
            Err(ToolOutput::error(format!(
                "Not approved. Call ask_for_approval with exactly this text and wait for the client: {justification}"
            )))
        }
    }
}

pub struct AskForApprovalTool;

#[derive(Debug, Deserialize)]
struct AskForApprovalInput {
    question: String,
}

#[async_trait]
impl ContextAwareTool for AskForApprovalTool {
    fn name(&self) -> &'static str {
        "ask_for_approval"
    }

    fn description(&self) -> String {
        "Ask the client to approve a change before making it. Use the exact same text later as the justification of the change.".to_string()
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![ToolParam::required(
            "question",
            ParamKind::String,
            "The change to approve, phrased as a question",
        )]
    }

    async fn run(&self, input: Value, ctx: SharedContext) -> Result<ToolOutput, ToolError> {
        let parsed: AskForApprovalInput = match serde_json::from_value(input) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutput::error(format!("Invalid input: {e}"))),
        };
        if parsed.question.trim().is_empty() {
            return Ok(ToolOutput::error("question must not be empty"));
        }

        ctx.lock().await.request_approval(parsed.question.clone());
        tracing::info!(question = %parsed.question, "Approval requested");

        let body = serde_json::to_string(&ReplyPayload {
            message: parsed.question,
            completed: false,
        })
        .map_err(|e| ToolError::Fault(format!("Failed to encode question: {e}")))?;
        Ok(ToolOutput::success(body).with_disposition(Disposition::Pause))
    }
}
