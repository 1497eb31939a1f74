use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use thiserror::Error;
use uuid::Uuid;

use ignis_core::{
    Action, ActionOptions, ActionType, AuthContext, DomainError, ErrorCode, PolicyEngine,
    ResourceType,
};

use crate::llm::{ToolCall, ToolCallParseError, ToolDefinition};

/// One model-callable operation: an action type applied to a resource type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,
    pub action_type: ActionType,
    pub resource_type: ResourceType,
    pub description: String,
}

impl ToolSpec {
    pub fn new(action_type: ActionType, resource_type: ResourceType) -> Self {
        Self {
            name: format!("{}_{}", action_type.as_str(), resource_type.snake_name()),
            action_type,
            resource_type,
            description: describe(action_type, resource_type),
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: input_schema(self.action_type, self.resource_type),
        }
    }
}

fn describe(action_type: ActionType, resource_type: ResourceType) -> String {
    let noun = resource_type.as_str().replace('-', " ");
    match action_type {
        ActionType::Create => format!("Create a {noun}. Fails if it already exists."),
        ActionType::Read => format!("Read the current configuration of a {noun}."),
        ActionType::Update => format!(
            "Update fields of an existing {noun}. Destructive changes return a preview and \
             must be re-issued with force=true."
        ),
        ActionType::Delete => format!(
            "Delete a {noun}. Always returns a preview first; re-issue with force=true to delete."
        ),
        ActionType::List => format!("List {noun} resources under an optional path prefix."),
    }
}

fn path_hint(resource_type: ResourceType) -> &'static str {
    match resource_type {
        ResourceType::Tag => "Tag path such as `[default]Line1/Speed`",
        ResourceType::Project => "Project name",
        ResourceType::View => "View path inside the project, such as `Overview/Main`",
        ResourceType::Script => "Script module path, `shared/utils` or `shared.utils`",
        ResourceType::NamedQuery => "Named query path, such as `Plant/GetLines`",
        ResourceType::GatewayConfig => "`gateway` for all settings or one section name",
    }
}

fn input_schema(action_type: ActionType, resource_type: ResourceType) -> Value {
    let mut required = Vec::new();
    if action_type != ActionType::List {
        required.push("resourcePath");
    }
    if matches!(action_type, ActionType::Create | ActionType::Update) {
        required.push("payload");
    }
    json!({
        "type": "object",
        "properties": {
            "resourcePath": { "type": "string", "description": path_hint(resource_type) },
            "payload": { "type": "object", "description": "Resource fields to set" },
            "dryRun": { "type": "boolean", "description": "Preview without changing anything" },
            "force": { "type": "boolean", "description": "Confirm a destructive change" },
            "comment": { "type": "string", "description": "Reason recorded with the change" },
        },
        "required": required,
        "additionalProperties": false,
    })
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolCallError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error(transparent)]
    Parse(#[from] ToolCallParseError),
    #[error("invalid action: {0}")]
    InvalidAction(#[from] DomainError),
}

impl ToolCallError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownTool(_) => ErrorCode::UnknownTool,
            Self::Parse(_) => ErrorCode::ParseError,
            Self::InvalidAction(_) => ErrorCode::ValidationError,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolSpec>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl ToolRegistry {
    pub fn empty() -> Self {
        Self { tools: BTreeMap::new() }
    }

    /// One tool per supported (action, resource) pair.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for resource_type in ResourceType::ALL {
            for action_type in resource_type.supported_actions() {
                registry.register(ToolSpec::new(*action_type, resource_type));
            }
        }
        registry
    }

    pub fn register(&mut self, spec: ToolSpec) {
        self.tools.insert(spec.name.clone(), spec);
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    /// Tools the identity may call. Tools it lacks permission for are not
    /// offered to the model at all.
    pub fn definitions_for(&self, policy: &PolicyEngine, auth: &AuthContext) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .filter(|spec| policy.is_permitted(auth, spec.resource_type, spec.action_type))
            .map(ToolSpec::definition)
            .collect()
    }

    pub fn resolve(&self, call: &ToolCall) -> Result<&ToolSpec, ToolCallError> {
        self.get(&call.name).ok_or_else(|| ToolCallError::UnknownTool(call.name.clone()))
    }

    /// Turns a model tool call into a validated [`Action`].
    pub fn build_action(&self, call: &ToolCall, correlation_id: Uuid) -> Result<Action, ToolCallError> {
        let spec = self.resolve(call)?;
        let arguments = call.parse_arguments()?;
        let invalid = |message: String| ToolCallParseError {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            message,
        };

        let resource_path = match arguments.get("resourcePath") {
            Some(Value::String(path)) => path.clone(),
            None if spec.action_type == ActionType::List => String::new(),
            None => return Err(invalid("`resourcePath` is required".to_string()).into()),
            Some(_) => return Err(invalid("`resourcePath` must be a string".to_string()).into()),
        };
        let payload = match arguments.get("payload") {
            Some(Value::Object(payload)) => payload.clone(),
            None | Some(Value::Null) => Map::new(),
            Some(_) => return Err(invalid("`payload` must be an object".to_string()).into()),
        };
        let flag = |key: &str| match arguments.get(key) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(value)) => Ok(*value),
            Some(_) => Err(invalid(format!("`{key}` must be a boolean"))),
        };
        let comment = match arguments.get("comment") {
            Some(Value::String(comment)) => Some(comment.clone()),
            None | Some(Value::Null) => None,
            Some(_) => return Err(invalid("`comment` must be a string".to_string()).into()),
        };
        let options = ActionOptions { dry_run: flag("dryRun")?, force: flag("force")?, comment };

        Ok(Action::new(
            correlation_id,
            spec.action_type,
            spec.resource_type,
            resource_path,
            payload,
            options,
        )?)
    }
}
