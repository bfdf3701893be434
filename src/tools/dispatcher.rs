//! Tool registration, binding, and invocation with context injection

use super::{DispatchError, ToolError, ToolHandler, ToolOutput};
use crate::context::SharedContext;
use crate::llm::ToolDefinition;
use crate::session::Participant;
use serde_json::{Map, Value};
use std::sync::{Arc, PoisonError, RwLock};

type ContextSlot = Arc<RwLock<Option<SharedContext>>>;

/// A registered tool
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub handler: ToolHandler,
}

/// Registry of tools for one session, holding the session's current context.
///
/// Proposing participants receive only [`ToolDefinition`]s. The executor
/// receives [`BoundTool`]s, which look the context up at invocation time,
/// so `set_context` takes effect for tools that were bound earlier.
pub struct ToolDispatcher {
    tools: Vec<Arc<ToolDescriptor>>,
    context: ContextSlot,
}

impl Default for ToolDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            context: Arc::new(RwLock::new(None)),
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: ToolHandler,
    ) -> Result<(), DispatchError> {
        let name = name.into();
        if self.tools.iter().any(|t| t.name == name) {
            return Err(DispatchError::DuplicateTool { name });
        }
        self.tools.push(Arc::new(ToolDescriptor {
            name,
            description: description.into(),
            handler,
        }));
        Ok(())
    }

    /// Register under the tool's own name and description
    pub fn register_handler(&mut self, handler: ToolHandler) -> Result<(), DispatchError> {
        let name = handler.name().to_string();
        let description = handler.description();
        self.register(name, description, handler)
    }

    pub fn set_context(&self, ctx: SharedContext) {
        *self.context.write().unwrap_or_else(PoisonError::into_inner) = Some(ctx);
    }

    pub fn get_context(&self) -> Option<SharedContext> {
        self.context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// Schema-visible view for proposing participants
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Invocable view for the executor
    pub fn bound_tools(&self) -> Vec<BoundTool> {
        self.tools
            .iter()
            .map(|descriptor| BoundTool {
                descriptor: descriptor.clone(),
                context: descriptor
                    .handler
                    .consumes_context()
                    .then(|| self.context.clone()),
            })
            .collect()
    }

    /// Let `participant` propose every tool and `executor` run them
    pub fn bind(&self, participant: &mut Participant, executor: &mut Participant) {
        participant.offer_tools(self.definitions());
        executor.equip_tools(self.bound_tools());
    }

    /// Bind for a participant that both proposes and executes
    pub fn bind_solo(&self, participant: &mut Participant) {
        participant.offer_tools(self.definitions());
        participant.equip_tools(self.bound_tools());
    }
}

/// Executor-side handle to a tool
#[derive(Clone)]
pub struct BoundTool {
    descriptor: Arc<ToolDescriptor>,
    /// Present only for context-aware tools
    context: Option<ContextSlot>,
}

impl BoundTool {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn definition(&self) -> ToolDefinition {
        self.descriptor.definition()
    }

    /// Reject argument sets that don't fit the declared parameters
    pub fn check_arity(&self, input: &Value) -> Result<(), DispatchError> {
        let params = self.descriptor.handler.parameters();
        let required = params.iter().filter(|p| p.required).count();

        let empty = Map::new();
        let (args, malformed) = match input {
            Value::Object(map) => (map, false),
            Value::Null => (&empty, false),
            _ => (&empty, true),
        };

        let unknown = args
            .keys()
            .any(|key| !params.iter().any(|p| p.name == key.as_str()));
        let missing = params
            .iter()
            .any(|p| p.required && !args.contains_key(p.name));

        if malformed || unknown || missing {
            let expected = if required == params.len() {
                required.to_string()
            } else {
                format!("{required}..={}", params.len())
            };
            return Err(DispatchError::ArityMismatch {
                tool: self.descriptor.name.clone(),
                expected,
                got: if malformed { 1 } else { args.len() },
            });
        }
        Ok(())
    }

    pub async fn invoke(&self, input: Value) -> Result<ToolOutput, ToolError> {
        self.check_arity(&input)?;
        let input = if input.is_null() {
            Value::Object(Map::new())
        } else {
            input
        };

        match &self.descriptor.handler {
            ToolHandler::Plain(tool) => tool.run(input).await,
            ToolHandler::WithContext(tool) => {
                let ctx = self
                    .context
                    .as_ref()
                    .and_then(|slot| slot.read().unwrap_or_else(PoisonError::into_inner).clone())
                    .ok_or_else(|| DispatchError::MissingContext {
                        tool: self.descriptor.name.clone(),
                    })?;
                tool.run(input, ctx).await
            }
        }
    }
}
