pub mod confirmation;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::{AuditEvent, AuditEventType, AuditSink};
use crate::correlation::CorrelationContext;
use crate::domain::action::{Action, ActionType, ResourceType};
use crate::domain::auth::AuthContext;

pub use confirmation::{requires_confirmation, ConfirmationRule, CONFIRMATION_RULES};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentMode {
    #[default]
    Development,
    Test,
    Production,
}

impl EnvironmentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Production => "production",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "test" | "testing" => Some(Self::Test),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }
}

impl fmt::Display for EnvironmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("user `{user_id}` lacks permission `{required_permission}` to {action_type} {resource_type}")]
pub struct AuthorizationError {
    pub user_id: String,
    pub action_type: ActionType,
    pub resource_type: ResourceType,
    pub required_permission: String,
}

/// Capability token guarding `action_type` on `resource_type`, e.g. `tag:update`.
pub fn required_permission(resource_type: ResourceType, action_type: ActionType) -> String {
    format!("{}:{}", resource_type.as_str(), action_type.as_str())
}

/// Authorization decisions for actions. The environment mode is carried for
/// callers that tune default caution; it never grants or denies by itself.
#[derive(Clone)]
pub struct PolicyEngine {
    mode: EnvironmentMode,
    audit: Arc<dyn AuditSink>,
}

impl PolicyEngine {
    pub fn new(mode: EnvironmentMode, audit: Arc<dyn AuditSink>) -> Self {
        Self { mode, audit }
    }

    pub fn mode(&self) -> EnvironmentMode {
        self.mode
    }

    /// Pure permission check without audit side effects.
    pub fn is_permitted(
        &self,
        auth: &AuthContext,
        resource_type: ResourceType,
        action_type: ActionType,
    ) -> bool {
        auth.is_admin() || auth.has_permission(&required_permission(resource_type, action_type))
    }

    pub fn authorize(
        &self,
        ctx: &CorrelationContext,
        auth: &AuthContext,
        action: &Action,
    ) -> Result<(), AuthorizationError> {
        let permission = required_permission(action.resource_type(), action.action_type());

        if auth.is_admin() {
            self.record(ctx, auth, action, AuditEventType::AuthorizationGranted, &permission, "admin");
            return Ok(());
        }

        if auth.has_permission(&permission) {
            self.record(
                ctx,
                auth,
                action,
                AuditEventType::AuthorizationGranted,
                &permission,
                "permission_held",
            );
            return Ok(());
        }

        self.record(
            ctx,
            auth,
            action,
            AuditEventType::AuthorizationDenied,
            &permission,
            "permission_missing",
        );
        tracing::warn!(
            event_name = "policy.authorization_denied",
            correlation_id = %ctx.correlation_id(),
            user_id = %auth.user_id(),
            required_permission = %permission,
            "authorization denied"
        );

        Err(AuthorizationError {
            user_id: auth.user_id().to_string(),
            action_type: action.action_type(),
            resource_type: action.resource_type(),
            required_permission: permission,
        })
    }

    fn record(
        &self,
        ctx: &CorrelationContext,
        auth: &AuthContext,
        action: &Action,
        event_type: AuditEventType,
        permission: &str,
        reason: &str,
    ) {
        tracing::debug!(
            event_name = "policy.authorization_decided",
            correlation_id = %ctx.correlation_id(),
            user_id = %auth.user_id(),
            decision = event_type.as_str(),
            reason,
            "authorization decided"
        );
        self.audit.emit(
            AuditEvent::for_action(action, event_type, auth.user_id())
                .with_detail("requiredPermission", permission)
                .with_detail("reason", reason)
                .with_detail("environment", self.mode.as_str()),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Map;
    use uuid::Uuid;

    use super::{required_permission, EnvironmentMode, PolicyEngine};
    use crate::audit::{AuditEventType, InMemoryAuditSink};
    use crate::correlation::CorrelationContext;
    use crate::domain::action::{Action, ActionOptions, ActionType, ResourceType};
    use crate::domain::auth::AuthContext;

    fn action(action_type: ActionType, resource_type: ResourceType) -> Action {
        Action::new(
            Uuid::new_v4(),
            action_type,
            resource_type,
            "[default]Line1/Speed",
            Map::new(),
            ActionOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn permission_token_joins_resource_and_action() {
        assert_eq!(required_permission(ResourceType::Tag, ActionType::Update), "tag:update");
        assert_eq!(
            required_permission(ResourceType::NamedQuery, ActionType::Delete),
            "named-query:delete"
        );
    }

    #[test]
    fn admin_is_authorized_for_everything_and_audited() {
        let sink = InMemoryAuditSink::default();
        let engine = PolicyEngine::new(EnvironmentMode::Production, Arc::new(sink.clone()));
        let ctx = CorrelationContext::new("ops", "test");
        let action = action(ActionType::Delete, ResourceType::Tag);

        assert!(engine.authorize(&ctx, &AuthContext::admin("ops"), &action).is_ok());

        let events = sink.events_for(action.correlation_id());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuditEventType::AuthorizationGranted);
        assert_eq!(events[0].details["reason"], "admin");
    }

    #[test]
    fn missing_capability_is_denied_with_required_permission() {
        let sink = InMemoryAuditSink::default();
        let engine = PolicyEngine::new(EnvironmentMode::Development, Arc::new(sink.clone()));
        let ctx = CorrelationContext::new("bob", "test");
        let auth = AuthContext::new("bob", None, ["tag:read"], false);
        let action = action(ActionType::Update, ResourceType::Tag);

        let error = engine.authorize(&ctx, &auth, &action).unwrap_err();
        assert_eq!(error.required_permission, "tag:update");
        assert!(error.to_string().contains("tag:update"));
        assert_eq!(sink.count_of(AuditEventType::AuthorizationDenied), 1);
    }

    #[test]
    fn mode_never_changes_the_decision() {
        let auth = AuthContext::new("carol", None, ["view:read"], false);
        for mode in [EnvironmentMode::Development, EnvironmentMode::Test, EnvironmentMode::Production]
        {
            let engine = PolicyEngine::new(mode, Arc::new(InMemoryAuditSink::default()));
            assert!(engine.is_permitted(&auth, ResourceType::View, ActionType::Read));
            assert!(!engine.is_permitted(&auth, ResourceType::View, ActionType::Update));
        }
    }

    #[test]
    fn environment_mode_parses_aliases() {
        assert_eq!(EnvironmentMode::parse("PROD"), Some(EnvironmentMode::Production));
        assert_eq!(EnvironmentMode::parse("test"), Some(EnvironmentMode::Test));
        assert_eq!(EnvironmentMode::parse("staging"), None);
    }
}
