//! Tools exposed to session participants
//!
//! A tool is either a plain [`Tool`] or a [`ContextAwareTool`] that also
//! receives the session's [`SharedContext`]. The capability is part of the
//! type, so the dispatcher branches on the trait rather than inspecting
//! argument lists, and the context never appears in an advertised schema.

mod approval;
mod delegate;
mod dispatcher;
mod error;
mod reply;

pub use approval::{ApprovalGate, AskForApprovalTool};
pub use delegate::DelegateTaskTool;
pub use dispatcher::{BoundTool, ToolDescriptor, ToolDispatcher};
pub use error::{DispatchError, ToolError};
pub use reply::{ReplyPayload, ReplyToClientTool};

use crate::context::SharedContext;
use crate::llm::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// What the conversation should do after a tool result is appended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    #[default]
    Continue,
    /// Wait for the client's next message
    Pause,
    /// The result is the session's terminal message
    Terminate,
}

/// Result from tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
    #[serde(default)]
    pub disposition: Disposition,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            disposition: Disposition::Continue,
        }
    }

    /// Business-level failure, shown to participants so they can react
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
            disposition: Disposition::Continue,
        }
    }

    #[must_use]
    pub fn with_disposition(mut self, disposition: Disposition) -> Self {
        self.disposition = disposition;
        self
    }
}

/// JSON type of a declared parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Boolean,
    Integer,
    Number,
    Object,
    Array,
}

impl ParamKind {
    fn json_type(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Boolean => "boolean",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Object => "object",
            ParamKind::Array => "array",
        }
    }
}

/// One declared tool parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolParam {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

impl ToolParam {
    pub fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            description,
            kind,
            required: true,
        }
    }

    pub fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            description,
            kind,
            required: false,
        }
    }
}

/// JSON schema for a parameter list
pub fn input_schema(params: &[ToolParam]) -> Value {
    let mut properties = Map::new();
    for param in params {
        properties.insert(
            param.name.to_string(),
            json!({
                "type": param.kind.json_type(),
                "description": param.description,
            }),
        );
    }
    let required: Vec<&str> = params
        .iter()
        .filter(|p| p.required)
        .map(|p| p.name)
        .collect();

    json!({
        "type": "object",
        "required": required,
        "properties": properties,
    })
}

/// Tool that needs nothing but its arguments
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name
    fn name(&self) -> &str;

    /// Tool description for LLM
    fn description(&self) -> String;

    /// Declared parameters; the advertised schema is derived from these
    fn parameters(&self) -> Vec<ToolParam>;

    async fn run(&self, input: Value) -> Result<ToolOutput, ToolError>;
}

/// Tool that also receives the session's shared context
#[async_trait]
pub trait ContextAwareTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> String;

    /// Declared parameters, excluding the injected context
    fn parameters(&self) -> Vec<ToolParam>;

    async fn run(&self, input: Value, ctx: SharedContext) -> Result<ToolOutput, ToolError>;
}

/// A registered callable, tagged by capability
#[derive(Clone)]
pub enum ToolHandler {
    Plain(Arc<dyn Tool>),
    WithContext(Arc<dyn ContextAwareTool>),
}

impl ToolHandler {
    pub fn plain(tool: impl Tool + 'static) -> Self {
        ToolHandler::Plain(Arc::new(tool))
    }

    pub fn with_context(tool: impl ContextAwareTool + 'static) -> Self {
        ToolHandler::WithContext(Arc::new(tool))
    }

    pub fn name(&self) -> &str {
        match self {
            ToolHandler::Plain(tool) => tool.name(),
            ToolHandler::WithContext(tool) => tool.name(),
        }
    }

    pub fn description(&self) -> String {
        match self {
            ToolHandler::Plain(tool) => tool.description(),
            ToolHandler::WithContext(tool) => tool.description(),
        }
    }

    pub fn parameters(&self) -> Vec<ToolParam> {
        match self {
            ToolHandler::Plain(tool) => tool.parameters(),
            ToolHandler::WithContext(tool) => tool.parameters(),
        }
    }

    pub fn consumes_context(&self) -> bool {
        matches!(self, ToolHandler::WithContext(_))
    }
}

/// Named tools available to session blueprints
#[derive(Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<ToolHandler>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any earlier tool of the same name
    pub fn insert(&mut self, handler: ToolHandler) {
        self.tools.retain(|t| t.name() != handler.name());
        self.tools.push(handler);
    }

    pub fn get(&self, name: &str) -> Option<&ToolHandler> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(ToolHandler::name).collect()
    }

    /// Build a fresh dispatcher holding the named tools
    pub fn dispatcher_for(&self, names: &[String]) -> Result<ToolDispatcher, DispatchError> {
        let mut dispatcher = ToolDispatcher::new();
        for name in names {
            let handler = self
                .get(name)
                .ok_or_else(|| DispatchError::UnknownTool { name: name.clone() })?;
            dispatcher.register(name.clone(), handler.description(), handler.clone())?;
        }
        Ok(dispatcher)
    }
}

impl ToolDescriptor {
    /// Definition advertised to proposing participants
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: input_schema(&self.handler.parameters()),
        }
    }
}
