//! `reply_to_client` - hand a message back across the session boundary

use super::{Disposition, ParamKind, Tool, ToolError, ToolOutput, ToolParam};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload forwarded to the client verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub message: String,
    #[serde(default)]
    pub completed: bool,
}

pub struct ReplyToClientTool;

#[async_trait]
impl Tool for ReplyToClientTool {
    fn name(&self) -> &'static str {
        "reply_to_client"
    }

    fn description(&self) -> String {
        "Send a message to the client. Set completed=true when the task is finished; otherwise the conversation waits for the client's answer.".to_string()
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![
            ToolParam::required("message", ParamKind::String, "Message shown to the client"),
            ToolParam::optional(
                "completed",
                ParamKind::Boolean,
                "True if the task is complete, false if the client should answer",
            ),
        ]
    }

    async fn run(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let payload: ReplyPayload = match serde_json::from_value(input) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutput::error(format!("Invalid input: {e}"))),
        };

        let disposition = if payload.completed {
            Disposition::Terminate
        } else {
            Disposition::Pause
        };
        let body = serde_json::to_string(&payload)
            .map_err(|e| ToolError::Fault(format!("Failed to encode reply: {e}")))?;

        Ok(ToolOutput::success(body).with_disposition(disposition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_completed_reply_terminates() {
        let out = ReplyToClientTool
            .run(json!({"message": "ok", "completed": true}))
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.disposition, Disposition::Terminate);
        assert_eq!(out.output, r#"{"message":"ok","completed":true}"#);
    }

    #[tokio::test]
    async fn test_open_question_pauses() {
        let out = ReplyToClientTool
            .run(json!({"message": "Which account?"}))
            .await
            .unwrap();
        assert_eq!(out.disposition, Disposition::Pause);
        let payload: ReplyPayload = serde_json::from_str(&out.output).unwrap();
        assert!(!payload.completed);
    }

    #[tokio::test]
    async fn test_bad_input_is_reported_in_conversation() {
        let out = ReplyToClientTool
            .run(json!({"message": 5}))
            .await
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.disposition, Disposition::Continue);
    }
}
