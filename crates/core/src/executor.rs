//! Action execution pipeline.
//!
//! Every action goes through the same short-circuiting sequence: authorize,
//! resolve the handler, validate structure, scan for forbidden content,
//! check existence, hold destructive actions for confirmation, answer dry
//! runs with a preview, and only then dispatch to the handler. Each outcome
//! is audited under the action's correlation id.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::Instrument;

use crate::audit::{AuditEvent, AuditEventType, AuditSink};
use crate::correlation::CorrelationContext;
use crate::domain::action::{Action, ActionType, ResourceType};
use crate::domain::auth::AuthContext;
use crate::domain::result::{ActionError, ActionResult, ActionStatus, ErrorCode};
use crate::policy::{requires_confirmation, PolicyEngine};
use crate::validation::{self, SecurityScanner};

pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Unsupported(String),
    #[error("{0}")]
    Backend(String),
}

impl HandlerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::Invalid(_) => ErrorCode::ValidationError,
            Self::Unsupported(_) | Self::Backend(_) => ErrorCode::HandlerError,
        }
    }
}

/// Back-end adapter for one resource type. Handlers own path parsing,
/// existence checks and the mutation itself.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    fn resource_type(&self) -> ResourceType;

    async fn exists(&self, action: &Action, ctx: &CorrelationContext) -> Result<bool, HandlerError>;

    async fn create(
        &self,
        action: &Action,
        auth: &AuthContext,
        ctx: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError>;

    async fn read(
        &self,
        action: &Action,
        auth: &AuthContext,
        ctx: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError>;

    async fn update(
        &self,
        action: &Action,
        auth: &AuthContext,
        ctx: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError>;

    async fn delete(
        &self,
        action: &Action,
        auth: &AuthContext,
        ctx: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError>;

    async fn list(
        &self,
        _action: &Action,
        _auth: &AuthContext,
        _ctx: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError> {
        Err(HandlerError::Unsupported(format!(
            "listing is not supported for {} resources",
            self.resource_type()
        )))
    }

    /// Describes what the action would do without doing it.
    async fn preview(
        &self,
        action: &Action,
        _auth: &AuthContext,
        _ctx: &CorrelationContext,
    ) -> Result<Value, HandlerError> {
        Ok(default_preview(action))
    }
}

pub fn default_preview(action: &Action) -> Value {
    json!({
        "actionType": action.action_type(),
        "resourceType": action.resource_type(),
        "resourcePath": action.resource_path(),
        "payload": action.payload(),
        "mutating": action.action_type().is_mutating(),
    })
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a handler for {0} resources is already registered")]
    Duplicate(ResourceType),
    #[error("no handler registered for: {}", .0.iter().map(ResourceType::as_str).collect::<Vec<_>>().join(", "))]
    Incomplete(Vec<ResourceType>),
}

/// Handlers keyed by the closed set of resource types.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<ResourceType, Arc<dyn ResourceHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn ResourceHandler>) -> Result<(), RegistryError> {
        let resource_type = handler.resource_type();
        if self.handlers.contains_key(&resource_type) {
            return Err(RegistryError::Duplicate(resource_type));
        }
        self.handlers.insert(resource_type, handler);
        Ok(())
    }

    pub fn with_handler(mut self, handler: Arc<dyn ResourceHandler>) -> Result<Self, RegistryError> {
        self.register(handler)?;
        Ok(self)
    }

    pub fn get(&self, resource_type: ResourceType) -> Option<Arc<dyn ResourceHandler>> {
        self.handlers.get(&resource_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<ResourceType> {
        self.handlers.keys().copied().collect()
    }

    /// Fails when any resource type is left without a handler.
    pub fn ensure_complete(&self) -> Result<(), RegistryError> {
        let missing: Vec<_> = ResourceType::ALL
            .into_iter()
            .filter(|resource_type| !self.handlers.contains_key(resource_type))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::Incomplete(missing))
        }
    }
}

#[derive(Debug)]
enum HandlerFailure {
    Handler(HandlerError),
    Timeout(Duration),
    Panicked(String),
}

impl HandlerFailure {
    fn into_error(self) -> ActionError {
        match self {
            Self::Handler(error) => ActionError::new(error.code(), error.to_string()),
            Self::Timeout(limit) => ActionError::new(
                ErrorCode::Timeout,
                format!("handler did not finish within {}s", limit.as_secs()),
            ),
            Self::Panicked(detail) => {
                ActionError::new(ErrorCode::HandlerError, format!("handler crashed: {detail}"))
            }
        }
    }
}

#[derive(Clone)]
pub struct ActionExecutor {
    policy: PolicyEngine,
    handlers: HandlerRegistry,
    scanner: SecurityScanner,
    audit: Arc<dyn AuditSink>,
    handler_timeout: Duration,
}

impl ActionExecutor {
    pub fn new(policy: PolicyEngine, handlers: HandlerRegistry, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            policy,
            handlers,
            scanner: SecurityScanner,
            audit,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    pub fn with_handler_timeout(mut self, handler_timeout: Duration) -> Self {
        self.handler_timeout = handler_timeout;
        self
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Runs `action` through the full pipeline. Business failures come back as
    /// FAILURE results, never as errors.
    pub async fn execute(
        &self,
        action: &Action,
        auth: &AuthContext,
        parent: &CorrelationContext,
    ) -> ActionResult {
        let ctx = parent.scoped(action.correlation_id(), "action.execute");
        let span = ctx.span();
        let result = self.run_pipeline(action, auth, &ctx).instrument(span).await;
        result.with_correlation_id(action.correlation_id()).with_duration_ms(ctx.elapsed_ms())
    }

    async fn run_pipeline(
        &self,
        action: &Action,
        auth: &AuthContext,
        ctx: &CorrelationContext,
    ) -> ActionResult {
        self.audit.emit(
            AuditEvent::for_action(action, AuditEventType::ActionRequested, auth.user_id())
                .with_detail("dryRun", action.options().dry_run)
                .with_detail("force", action.options().force),
        );
        tracing::info!(
            event_name = "action.requested",
            correlation_id = %action.correlation_id(),
            user_id = %auth.user_id(),
            action_type = %action.action_type(),
            resource_type = %action.resource_type(),
            resource_path = action.resource_path(),
            "action requested"
        );

        if let Err(denied) = self.policy.authorize(ctx, auth, action) {
            return ActionResult::failure(
                format!("Permission denied: missing `{}`", denied.required_permission),
                vec![ActionError::new(ErrorCode::AuthorizationError, denied.to_string())],
            );
        }

        let Some(handler) = self.handlers.get(action.resource_type()) else {
            let message = format!("No handler registered for {} resources", action.resource_type());
            self.audit_failure(action, auth, ErrorCode::UnknownResourceType, &message);
            return ActionResult::failure(
                message.clone(),
                vec![ActionError::new(ErrorCode::UnknownResourceType, message)],
            );
        };

        let report = validation::validate(action);
        let mut warnings: Vec<String> =
            report.warnings.iter().map(validation::ValidationIssue::render).collect();
        if !report.info.is_empty() {
            tracing::debug!(
                event_name = "action.validation_info",
                correlation_id = %action.correlation_id(),
                notes = ?report.info.iter().map(|issue| issue.render()).collect::<Vec<_>>(),
                "validation notes"
            );
        }
        if !report.is_valid() {
            self.audit.emit(
                AuditEvent::for_action(action, AuditEventType::ValidationFailed, auth.user_id())
                    .with_detail(
                        "errors",
                        report.errors.iter().map(|issue| issue.render()).collect::<Vec<_>>(),
                    ),
            );
            tracing::info!(
                event_name = "action.validation_failed",
                correlation_id = %action.correlation_id(),
                errors = report.errors.len(),
                "action failed structural validation"
            );
            let errors = report
                .errors
                .iter()
                .map(|issue| {
                    ActionError::for_field(ErrorCode::ValidationError, &issue.field, &issue.message)
                })
                .collect();
            return ActionResult::failure(
                format!(
                    "Validation failed for {} `{}`",
                    action.resource_type(),
                    action.resource_path()
                ),
                errors,
            )
            .with_warnings(warnings);
        }

        let scan = self.scanner.scan_payload(action.payload());
        warnings.extend(scan.warnings().map(|finding| format!("security: {}", finding.summary())));
        if scan.is_blocked() {
            let violations: Vec<_> = scan.violations().collect();
            for finding in &violations {
                tracing::error!(
                    event_name = "security.violation",
                    correlation_id = %action.correlation_id(),
                    user_id = %auth.user_id(),
                    field = %finding.field,
                    category = finding.category.as_str(),
                    pattern = %finding.description,
                    matched = %finding.matched,
                    line = finding.line,
                    "forbidden pattern in action payload"
                );
                self.audit.emit(
                    AuditEvent::for_action(action, AuditEventType::SecurityViolation, auth.user_id())
                        .with_detail("field", finding.field.clone())
                        .with_detail("category", finding.category.as_str())
                        .with_detail("pattern", finding.description.clone())
                        .with_detail("matched", finding.matched.clone())
                        .with_detail("line", finding.line),
                );
            }
            let errors = violations
                .iter()
                .map(|finding| {
                    ActionError::for_field(
                        ErrorCode::SecurityViolation,
                        &finding.field,
                        finding.summary(),
                    )
                })
                .collect();
            return ActionResult::failure(
                format!(
                    "Blocked by security policy: {} forbidden pattern(s) found",
                    violations.len()
                ),
                errors,
            )
            .with_warnings(warnings);
        }

        if let Some(failure) = self.precheck(&handler, action, auth, ctx).await {
            return failure.with_warnings(warnings);
        }

        let forced_dry_run = auth.dry_run_only() && action.action_type().is_mutating();
        if forced_dry_run {
            warnings.push("identity is limited to dry runs; no change was made".to_string());
        }

        if action.options().dry_run || forced_dry_run {
            let preview = self.preview(&handler, action, auth, ctx, &mut warnings).await;
            self.audit.emit(AuditEvent::for_action(
                action,
                AuditEventType::DryRunCompleted,
                auth.user_id(),
            ));
            tracing::info!(
                event_name = "action.dry_run",
                correlation_id = %action.correlation_id(),
                "dry run answered with preview"
            );
            return ActionResult::dry_run(
                format!(
                    "Dry run: would {} {} `{}`",
                    action.action_type(),
                    action.resource_type(),
                    action.resource_path()
                ),
                preview,
            )
            .with_warnings(warnings);
        }

        if !action.options().force {
            if let Some(rule) = requires_confirmation(action) {
                let mut preview = self.preview(&handler, action, auth, ctx, &mut warnings).await;
                if let Value::Object(map) = &mut preview {
                    map.insert("confirmationRule".to_string(), json!(rule.id));
                    map.insert("confirmationReason".to_string(), json!(rule.reason));
                }
                self.audit.emit(
                    AuditEvent::for_action(
                        action,
                        AuditEventType::ConfirmationRequired,
                        auth.user_id(),
                    )
                    .with_detail("rule", rule.id)
                    .with_detail("reason", rule.reason),
                );
                tracing::warn!(
                    event_name = "action.confirmation_required",
                    correlation_id = %action.correlation_id(),
                    rule = rule.id,
                    "destructive action held for confirmation"
                );
                return ActionResult::pending_confirmation(
                    format!(
                        "{} of {} `{}` requires confirmation ({}). Re-issue with force=true to proceed.",
                        action.action_type(),
                        action.resource_type(),
                        action.resource_path(),
                        rule.reason
                    ),
                    preview,
                )
                .with_warnings(warnings);
            }
        }

        self.dispatch(handler, action, auth, ctx).await.with_leading_warnings(warnings)
    }

    async fn precheck(
        &self,
        handler: &Arc<dyn ResourceHandler>,
        action: &Action,
        auth: &AuthContext,
        ctx: &CorrelationContext,
    ) -> Option<ActionResult> {
        if action.action_type() == ActionType::List {
            return None;
        }
        let exists = {
            let handler = Arc::clone(handler);
            let action = action.clone();
            let ctx = ctx.clone();
            self.guarded(async move { handler.exists(&action, &ctx).await }).await
        };

        let (code, message) = match exists {
            Ok(true) if action.action_type() == ActionType::Create => (
                ErrorCode::Conflict,
                format!("{} `{}` already exists", action.resource_type(), action.resource_path()),
            ),
            Ok(false) if action.action_type() != ActionType::Create => (
                ErrorCode::NotFound,
                format!("{} `{}` does not exist", action.resource_type(), action.resource_path()),
            ),
            Ok(_) => return None,
            Err(failure) => {
                let error = failure.into_error();
                (error.code, error.message)
            }
        };
        self.audit_failure(action, auth, code, &message);
        Some(ActionResult::failure(message.clone(), vec![ActionError::new(code, message)]))
    }

    async fn preview(
        &self,
        handler: &Arc<dyn ResourceHandler>,
        action: &Action,
        auth: &AuthContext,
        ctx: &CorrelationContext,
        warnings: &mut Vec<String>,
    ) -> Value {
        let outcome = {
            let handler = Arc::clone(handler);
            let action = action.clone();
            let auth = auth.clone();
            let ctx = ctx.clone();
            self.guarded(async move { handler.preview(&action, &auth, &ctx).await }).await
        };
        match outcome {
            Ok(preview) => preview,
            Err(failure) => {
                warnings.push(format!(
                    "detailed preview unavailable: {}",
                    failure.into_error().message
                ));
                default_preview(action)
            }
        }
    }

    async fn dispatch(
        &self,
        handler: Arc<dyn ResourceHandler>,
        action: &Action,
        auth: &AuthContext,
        ctx: &CorrelationContext,
    ) -> ActionResult {
        let outcome = {
            let action = action.clone();
            let auth = auth.clone();
            let ctx = ctx.clone();
            self.guarded(async move {
                match action.action_type() {
                    ActionType::Create => handler.create(&action, &auth, &ctx).await,
                    ActionType::Read => handler.read(&action, &auth, &ctx).await,
                    ActionType::Update => handler.update(&action, &auth, &ctx).await,
                    ActionType::Delete => handler.delete(&action, &auth, &ctx).await,
                    ActionType::List => handler.list(&action, &auth, &ctx).await,
                }
            })
            .await
        };

        match outcome {
            Ok(result) if result.status == ActionStatus::Failure => {
                self.audit_failure(
                    action,
                    auth,
                    result.errors.first().map_or(ErrorCode::HandlerError, |error| error.code),
                    &result.message,
                );
                result
            }
            Ok(result) => {
                let event_type = AuditEventType::for_completed(action.action_type());
                self.audit.emit(
                    AuditEvent::for_action(action, event_type, auth.user_id())
                        .with_detail("status", result.status.as_str()),
                );
                tracing::info!(
                    event_name = "action.completed",
                    correlation_id = %action.correlation_id(),
                    audit_event = event_type.as_str(),
                    status = result.status.as_str(),
                    "action completed"
                );
                result
            }
            Err(failure) => {
                let error = failure.into_error();
                let message = format!(
                    "{} of {} `{}` failed: {}",
                    action.action_type(),
                    action.resource_type(),
                    action.resource_path(),
                    error.message
                );
                self.audit_failure(action, auth, error.code, &message);
                ActionResult::failure(message, vec![error])
            }
        }
    }

    /// Runs a handler call on its own task and waits up to the handler
    /// timeout for it. A timed-out call is reported as a failure but keeps
    /// running to completion on its task, and a panic inside the handler is
    /// reported instead of unwinding into the pipeline.
    async fn guarded<T, F>(&self, call: F) -> Result<T, HandlerFailure>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, HandlerError>> + Send + 'static,
    {
        let limit = self.handler_timeout;
        let mut task = tokio::spawn(call);
        match tokio::time::timeout(limit, &mut task).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(error))) => Err(HandlerFailure::Handler(error)),
            Ok(Err(join_error)) => Err(HandlerFailure::Panicked(join_error.to_string())),
            Err(_elapsed) => Err(HandlerFailure::Timeout(limit)),
        }
    }

    fn audit_failure(&self, action: &Action, auth: &AuthContext, code: ErrorCode, message: &str) {
        tracing::info!(
            event_name = "action.failed",
            correlation_id = %action.correlation_id(),
            code = code.as_str(),
            detail = message,
            "action failed"
        );
        self.audit.emit(
            AuditEvent::for_action(action, AuditEventType::ActionFailed, auth.user_id())
                .with_detail("code", code.as_str())
                .with_detail("message", message),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use uuid::Uuid;

    use super::{
        ActionExecutor, HandlerError, HandlerRegistry, RegistryError, ResourceHandler,
    };
    use crate::audit::{AuditEventType, InMemoryAuditSink};
    use crate::correlation::CorrelationContext;
    use crate::domain::action::{Action, ActionOptions, ActionType, ResourceType};
    use crate::domain::auth::AuthContext;
    use crate::domain::result::{ActionResult, ActionStatus, ErrorCode};
    use crate::policy::{EnvironmentMode, PolicyEngine};

    #[derive(Default)]
    struct SlowHandler {
        calls: AtomicUsize,
        finished: AtomicUsize,
    }

    #[async_trait]
    impl ResourceHandler for SlowHandler {
        fn resource_type(&self) -> ResourceType {
            ResourceType::View
        }

        async fn exists(&self, _: &Action, _: &CorrelationContext) -> Result<bool, HandlerError> {
            Ok(true)
        }

        async fn create(
            &self,
            _: &Action,
            _: &AuthContext,
            _: &CorrelationContext,
        ) -> Result<ActionResult, HandlerError> {
            Err(HandlerError::Backend("unused".to_string()))
        }

        async fn read(
            &self,
            _: &Action,
            _: &AuthContext,
            _: &CorrelationContext,
        ) -> Result<ActionResult, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(120)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(ActionResult::success("late", Value::Null))
        }

        async fn update(
            &self,
            _: &Action,
            _: &AuthContext,
            _: &CorrelationContext,
        ) -> Result<ActionResult, HandlerError> {
            panic!("backend exploded")
        }

        async fn delete(
            &self,
            _: &Action,
            _: &AuthContext,
            _: &CorrelationContext,
        ) -> Result<ActionResult, HandlerError> {
            Err(HandlerError::Backend("disk full".to_string()))
        }
    }

    fn executor(sink: &InMemoryAuditSink) -> ActionExecutor {
        executor_with(sink, Arc::new(SlowHandler::default()))
    }

    fn executor_with(sink: &InMemoryAuditSink, handler: Arc<SlowHandler>) -> ActionExecutor {
        let registry = HandlerRegistry::new().with_handler(handler).unwrap();
        ActionExecutor::new(
            PolicyEngine::new(EnvironmentMode::Test, Arc::new(sink.clone())),
            registry,
            Arc::new(sink.clone()),
        )
        .with_handler_timeout(Duration::from_secs(5))
    }

    fn view_action(action_type: ActionType, payload: Value, options: ActionOptions) -> Action {
        Action::new(
            Uuid::new_v4(),
            action_type,
            ResourceType::View,
            "Overview/Main",
            payload.as_object().cloned().unwrap_or_else(Map::new),
            options,
        )
        .unwrap()
    }

    #[test]
    fn registry_rejects_duplicates_and_reports_missing_types() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(SlowHandler::default())).unwrap();
        let duplicate = registry.register(Arc::new(SlowHandler::default()));
        assert_eq!(duplicate, Err(RegistryError::Duplicate(ResourceType::View)));

        match registry.ensure_complete() {
            Err(RegistryError::Incomplete(missing)) => {
                assert_eq!(missing.len(), 5);
                assert!(!missing.contains(&ResourceType::View));
            }
            other => panic!("expected incomplete registry, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let sink = InMemoryAuditSink::default();
        let executor = executor(&sink);
        let action = view_action(ActionType::Read, json!({}), ActionOptions::default());

        let result = executor
            .execute(&action, &AuthContext::admin("ops"), &CorrelationContext::new("ops", "t"))
            .await;

        assert_eq!(result.status, ActionStatus::Failure);
        assert!(result.has_error_code(ErrorCode::Timeout));
        assert_eq!(result.correlation_id, Some(action.correlation_id()));
        assert_eq!(sink.count_of(AuditEventType::ActionFailed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_handler_call_still_runs_to_completion() {
        let sink = InMemoryAuditSink::default();
        let handler = Arc::new(SlowHandler::default());
        let executor = executor_with(&sink, Arc::clone(&handler));
        let action = view_action(ActionType::Read, json!({}), ActionOptions::default());

        let result = executor
            .execute(&action, &AuthContext::admin("ops"), &CorrelationContext::new("ops", "t"))
            .await;
        assert!(result.has_error_code(ErrorCode::Timeout));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.finished.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(handler.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_panic_becomes_failure() {
        let sink = InMemoryAuditSink::default();
        let executor = executor(&sink);
        let action = view_action(
            ActionType::Update,
            json!({ "root": { "type": "flex" } }),
            ActionOptions::default(),
        );

        let result = executor
            .execute(&action, &AuthContext::admin("ops"), &CorrelationContext::new("ops", "t"))
            .await;

        assert_eq!(result.status, ActionStatus::Failure);
        assert!(result.has_error_code(ErrorCode::HandlerError));
    }

    #[tokio::test]
    async fn handler_error_message_is_preserved() {
        let sink = InMemoryAuditSink::default();
        let executor = executor(&sink);
        let action = view_action(ActionType::Delete, json!({}), ActionOptions::forced());

        let result = executor
            .execute(&action, &AuthContext::admin("ops"), &CorrelationContext::new("ops", "t"))
            .await;

        assert_eq!(result.status, ActionStatus::Failure);
        assert!(result.message.contains("disk full"));
    }

    #[tokio::test]
    async fn missing_handler_is_unknown_resource_type() {
        let sink = InMemoryAuditSink::default();
        let executor = executor(&sink);
        let action = Action::new(
            Uuid::new_v4(),
            ActionType::Read,
            ResourceType::Script,
            "shared/util",
            Map::new(),
            ActionOptions::default(),
        )
        .unwrap();

        let result = executor
            .execute(&action, &AuthContext::admin("ops"), &CorrelationContext::new("ops", "t"))
            .await;

        assert!(result.has_error_code(ErrorCode::UnknownResourceType));
    }

    #[tokio::test]
    async fn dry_run_only_identity_gets_previews_for_mutations() {
        let sink = InMemoryAuditSink::default();
        let executor = executor(&sink);
        let auth = AuthContext::new("viewer", None, ["view:update"], true);
        let action = view_action(
            ActionType::Update,
            json!({ "root": { "type": "flex" } }),
            ActionOptions::default(),
        );

        let result = executor.execute(&action, &auth, &CorrelationContext::new("viewer", "t")).await;

        assert_eq!(result.status, ActionStatus::DryRun);
        assert_eq!(result.data["resourcePath"], "Overview/Main");
        assert!(result.warnings.iter().any(|warning| warning.contains("dry runs")));
    }

    #[tokio::test]
    async fn outcomes_share_the_action_correlation_id() {
        let sink = InMemoryAuditSink::default();
        let executor = executor(&sink);
        let action = view_action(ActionType::Delete, json!({}), ActionOptions::default());

        let result = executor
            .execute(&action, &AuthContext::admin("ops"), &CorrelationContext::new("ops", "t"))
            .await;
        assert_eq!(result.status, ActionStatus::PendingConfirmation);
        assert_eq!(result.data["confirmationRule"], "delete-any");

        let types: Vec<_> =
            sink.events_for(action.correlation_id()).iter().map(|event| event.event_type).collect();
        assert_eq!(
            types,
            vec![
                AuditEventType::ActionRequested,
                AuditEventType::AuthorizationGranted,
                AuditEventType::ConfirmationRequired,
            ]
        );
    }
}
