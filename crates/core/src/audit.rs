use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::correlation::CorrelationContext;
use crate::domain::action::{Action, ActionType, ResourceType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Action,
    Auth,
    Policy,
    System,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Action => "action",
            Self::Auth => "auth",
            Self::Policy => "policy",
            Self::System => "system",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    ActionRequested,
    AuthorizationGranted,
    AuthorizationDenied,
    ValidationFailed,
    SecurityViolation,
    ConfirmationRequired,
    DryRunCompleted,
    ResourceCreated,
    ResourceRead,
    ResourceUpdated,
    ResourceDeleted,
    ResourceListed,
    ActionFailed,
    ConversationStarted,
    ConversationEnded,
    ConversationAccessDenied,
    ConversationPruned,
    ConversationExpired,
    RateLimitExceeded,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActionRequested => "ACTION_REQUESTED",
            Self::AuthorizationGranted => "AUTHORIZATION_GRANTED",
            Self::AuthorizationDenied => "AUTHORIZATION_DENIED",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::SecurityViolation => "SECURITY_VIOLATION",
            Self::ConfirmationRequired => "CONFIRMATION_REQUIRED",
            Self::DryRunCompleted => "DRY_RUN_COMPLETED",
            Self::ResourceCreated => "RESOURCE_CREATED",
            Self::ResourceRead => "RESOURCE_READ",
            Self::ResourceUpdated => "RESOURCE_UPDATED",
            Self::ResourceDeleted => "RESOURCE_DELETED",
            Self::ResourceListed => "RESOURCE_LISTED",
            Self::ActionFailed => "ACTION_FAILED",
            Self::ConversationStarted => "CONVERSATION_STARTED",
            Self::ConversationEnded => "CONVERSATION_ENDED",
            Self::ConversationAccessDenied => "CONVERSATION_ACCESS_DENIED",
            Self::ConversationPruned => "CONVERSATION_PRUNED",
            Self::ConversationExpired => "CONVERSATION_EXPIRED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
        }
    }

    pub fn category(&self) -> AuditCategory {
        match self {
            Self::AuthorizationGranted
            | Self::AuthorizationDenied
            | Self::ConversationAccessDenied => AuditCategory::Auth,
            Self::SecurityViolation
            | Self::ConfirmationRequired
            | Self::ValidationFailed
            | Self::RateLimitExceeded => AuditCategory::Policy,
            Self::ConversationStarted
            | Self::ConversationEnded
            | Self::ConversationPruned
            | Self::ConversationExpired => AuditCategory::System,
            _ => AuditCategory::Action,
        }
    }

    /// Event recorded when a handler completes the given action type.
    pub fn for_completed(action_type: ActionType) -> Self {
        match action_type {
            ActionType::Create => Self::ResourceCreated,
            ActionType::Read => Self::ResourceRead,
            ActionType::Update => Self::ResourceUpdated,
            ActionType::Delete => Self::ResourceDeleted,
            ActionType::List => Self::ResourceListed,
        }
    }
}

/// One append-only audit fact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub correlation_id: Uuid,
    pub category: AuditCategory,
    pub event_type: AuditEventType,
    pub user_id: String,
    pub resource_type: Option<ResourceType>,
    pub resource_path: Option<String>,
    pub action_type: Option<ActionType>,
    pub details: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        correlation_id: Uuid,
        event_type: AuditEventType,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            correlation_id,
            category: event_type.category(),
            event_type,
            user_id: user_id.into(),
            resource_type: None,
            resource_path: None,
            action_type: None,
            details: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn for_context(ctx: &CorrelationContext, event_type: AuditEventType) -> Self {
        Self::new(ctx.correlation_id(), event_type, ctx.user_id())
    }

    /// Event describing `action`, keyed by the action's own correlation id.
    pub fn for_action(action: &Action, event_type: AuditEventType, user_id: &str) -> Self {
        let mut event = Self::new(action.correlation_id(), event_type, user_id);
        event.resource_type = Some(action.resource_type());
        event.resource_path = Some(action.resource_path().to_string());
        event.action_type = Some(action.action_type());
        event
    }

    pub fn with_category(mut self, category: AuditCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Events for one correlation id, in append order.
    pub fn events_for(&self, correlation_id: Uuid) -> Vec<AuditEvent> {
        self.events().into_iter().filter(|event| event.correlation_id == correlation_id).collect()
    }

    pub fn count_of(&self, event_type: AuditEventType) -> usize {
        self.events().iter().filter(|event| event.event_type == event_type).count()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Mirrors audit facts into the log stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let details = Value::Object(event.details.clone());
        match event.event_type {
            AuditEventType::SecurityViolation => tracing::error!(
                event_name = "audit.recorded",
                audit_event = event.event_type.as_str(),
                category = event.category.as_str(),
                correlation_id = %event.correlation_id,
                user_id = %event.user_id,
                resource_path = event.resource_path.as_deref().unwrap_or(""),
                details = %details,
                "security violation recorded"
            ),
            AuditEventType::AuthorizationDenied
            | AuditEventType::ConversationAccessDenied
            | AuditEventType::RateLimitExceeded
            | AuditEventType::ActionFailed => tracing::warn!(
                event_name = "audit.recorded",
                audit_event = event.event_type.as_str(),
                category = event.category.as_str(),
                correlation_id = %event.correlation_id,
                user_id = %event.user_id,
                resource_path = event.resource_path.as_deref().unwrap_or(""),
                details = %details,
                "audit event recorded"
            ),
            _ => tracing::info!(
                event_name = "audit.recorded",
                audit_event = event.event_type.as_str(),
                category = event.category.as_str(),
                correlation_id = %event.correlation_id,
                user_id = %event.user_id,
                resource_path = event.resource_path.as_deref().unwrap_or(""),
                details = %details,
                "audit event recorded"
            ),
        }
    }
}

/// Forwards every event to each inner sink in registration order.
#[derive(Clone, Default)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for FanoutAuditSink {
    fn emit(&self, event: AuditEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use crate::audit::{
        AuditCategory, AuditEvent, AuditEventType, AuditSink, FanoutAuditSink, InMemoryAuditSink,
        TracingAuditSink,
    };

    #[test]
    fn in_memory_sink_filters_by_correlation_id_in_order() {
        let sink = InMemoryAuditSink::default();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        sink.emit(AuditEvent::new(first, AuditEventType::ActionRequested, "alice"));
        sink.emit(AuditEvent::new(second, AuditEventType::ActionRequested, "bob"));
        sink.emit(
            AuditEvent::new(first, AuditEventType::ResourceDeleted, "alice")
                .with_detail("deleted", true),
        );

        let events = sink.events_for(first);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, AuditEventType::ActionRequested);
        assert_eq!(events[1].event_type, AuditEventType::ResourceDeleted);
        assert_eq!(events[1].details["deleted"], true);
        assert_eq!(sink.count_of(AuditEventType::ActionRequested), 2);
    }

    #[test]
    fn event_types_carry_default_categories() {
        assert_eq!(AuditEventType::AuthorizationDenied.category(), AuditCategory::Auth);
        assert_eq!(AuditEventType::SecurityViolation.category(), AuditCategory::Policy);
        assert_eq!(AuditEventType::ResourceCreated.category(), AuditCategory::Action);
        assert_eq!(AuditEventType::ConversationExpired.category(), AuditCategory::System);
    }

    #[test]
    fn fanout_delivers_to_every_sink() {
        let left = InMemoryAuditSink::default();
        let right = InMemoryAuditSink::default();
        let fanout = FanoutAuditSink::new(vec![Arc::new(left.clone()), Arc::new(right.clone())])
            .with_sink(Arc::new(TracingAuditSink));

        fanout.emit(AuditEvent::new(Uuid::new_v4(), AuditEventType::ConversationStarted, "a"));

        assert_eq!(left.events().len(), 1);
        assert_eq!(right.events().len(), 1);
    }

    #[test]
    fn serializes_screaming_event_types() {
        let event = AuditEvent::new(Uuid::new_v4(), AuditEventType::DryRunCompleted, "alice");
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded["eventType"], "DRY_RUN_COMPLETED");
        assert_eq!(encoded["category"], "action");
    }
}
