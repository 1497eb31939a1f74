use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Read,
    Update,
    Delete,
    List,
}

impl ActionType {
    pub const ALL: [ActionType; 5] =
        [Self::Create, Self::Read, Self::Update, Self::Delete, Self::List];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::List => "list",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "create" => Some(Self::Create),
            "read" => Some(Self::Read),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "list" => Some(Self::List),
            _ => None,
        }
    }

    /// Whether the action changes state on the target platform.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    Tag,
    Project,
    View,
    Script,
    NamedQuery,
    GatewayConfig,
}

impl ResourceType {
    pub const ALL: [ResourceType; 6] = [
        Self::Tag,
        Self::Project,
        Self::View,
        Self::Script,
        Self::NamedQuery,
        Self::GatewayConfig,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tag => "tag",
            Self::Project => "project",
            Self::View => "view",
            Self::Script => "script",
            Self::NamedQuery => "named-query",
            Self::GatewayConfig => "gateway-config",
        }
    }

    /// Identifier-safe form used in tool names (`named_query`).
    pub fn snake_name(&self) -> &'static str {
        match self {
            Self::NamedQuery => "named_query",
            Self::GatewayConfig => "gateway_config",
            other => other.as_str(),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "tag" => Some(Self::Tag),
            "project" => Some(Self::Project),
            "view" => Some(Self::View),
            "script" => Some(Self::Script),
            "named-query" => Some(Self::NamedQuery),
            "gateway-config" => Some(Self::GatewayConfig),
            _ => None,
        }
    }

    /// Action types a resource of this kind supports at all.
    pub fn supported_actions(&self) -> &'static [ActionType] {
        match self {
            Self::GatewayConfig => &[ActionType::Read, ActionType::Update],
            _ => &ActionType::ALL,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOptions {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ActionOptions {
    pub fn dry_run() -> Self {
        Self { dry_run: true, ..Self::default() }
    }

    pub fn forced() -> Self {
        Self { force: true, ..Self::default() }
    }
}

/// A single proposed operation against a managed resource.
///
/// Fields are private so that every `Action` in the system has passed the
/// constructor checks: a concrete correlation id, a path without traversal
/// sequences, and an action type the resource type supports.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    correlation_id: Uuid,
    action_type: ActionType,
    resource_type: ResourceType,
    resource_path: String,
    payload: Map<String, Value>,
    options: ActionOptions,
}

impl Action {
    pub fn new(
        correlation_id: Uuid,
        action_type: ActionType,
        resource_type: ResourceType,
        resource_path: impl Into<String>,
        payload: Map<String, Value>,
        options: ActionOptions,
    ) -> Result<Self, DomainError> {
        let resource_path = resource_path.into().trim().to_string();

        if correlation_id.is_nil() {
            return Err(DomainError::InvalidCorrelationId(correlation_id.to_string()));
        }
        validate_resource_path(&resource_path)?;
        if resource_path.is_empty() && action_type != ActionType::List {
            return Err(DomainError::MissingResourcePath { action_type });
        }
        if !resource_type.supported_actions().contains(&action_type) {
            return Err(DomainError::UnsupportedAction { action_type, resource_type });
        }

        Ok(Self { correlation_id, action_type, resource_type, resource_path, payload, options })
    }

    /// Builds an action from a textual correlation id, rejecting anything that
    /// is not a UUID.
    pub fn with_correlation_str(
        correlation_id: &str,
        action_type: ActionType,
        resource_type: ResourceType,
        resource_path: impl Into<String>,
        payload: Map<String, Value>,
        options: ActionOptions,
    ) -> Result<Self, DomainError> {
        let parsed = Uuid::parse_str(correlation_id.trim())
            .map_err(|_| DomainError::InvalidCorrelationId(correlation_id.to_string()))?;
        Self::new(parsed, action_type, resource_type, resource_path, payload, options)
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn action_type(&self) -> ActionType {
        self.action_type
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn options(&self) -> &ActionOptions {
        &self.options
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Same action with different options, keeping the correlation id.
    pub fn with_options(mut self, options: ActionOptions) -> Self {
        self.options = options;
        self
    }
}

fn validate_resource_path(path: &str) -> Result<(), DomainError> {
    if path.contains("..") || path.contains("//") || path.contains('\\') || path.contains('\0')
    {
        return Err(DomainError::PathTraversal(path.to_string()));
    }
    Ok(())
}
