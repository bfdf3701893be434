//! `delegate_task` - hand the conversation to a specialist session kind

use super::{ContextAwareTool, Disposition, ParamKind, ToolError, ToolOutput, ToolParam};
use crate::context::SharedContext;
use crate::session::{DelegationBridge, SessionError, SessionState};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

pub struct DelegateTaskTool {
    bridge: DelegationBridge,
}

impl DelegateTaskTool {
    pub fn new(bridge: DelegationBridge) -> Self {
        Self { bridge }
    }
}

#[derive(Debug, Deserialize)]
struct DelegateInput {
    kind: String,
    brief: String,
}

#[async_trait]
impl ContextAwareTool for DelegateTaskTool {
    fn name(&self) -> &'static str {
        "delegate_task"
    }

    fn description(&self) -> String {
        "Hand the conversation to a specialist team. The brief must contain everything the team needs; it does not see this conversation.".to_string()
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![
            ToolParam::required(
                "kind",
                ParamKind::String,
                "Session kind to delegate to, e.g. campaign_builder",
            ),
            ToolParam::required("brief", ParamKind::String, "Task description for the team"),
        ]
    }

    async fn run(&self, input: Value, ctx: SharedContext) -> Result<ToolOutput, ToolError> {
        let parsed: DelegateInput = match serde_json::from_value(input) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutput::error(format!("Invalid input: {e}"))),
        };

        // Snapshot the context; the lock must not be held while the delegate runs
        let carried = ctx.lock().await.clone();
        let key = carried.key();

        match self
            .bridge
            .delegate(key, &parsed.kind, &parsed.brief, Some(carried))
            .await
        {
            Ok(outcome) => {
                let disposition = match outcome.state {
                    SessionState::Paused => Disposition::Pause,
                    _ => Disposition::Terminate,
                };
                Ok(ToolOutput::success(outcome.message).with_disposition(disposition))
            }
            Err(SessionError::UnknownKind { name }) => Ok(ToolOutput::error(format!(
                "Unknown session kind `{name}`"
            ))),
            Err(err) => Err(err.into()),
        }
    }
}
