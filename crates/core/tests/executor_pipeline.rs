use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use ignis_core::{
    Action, ActionExecutor, ActionOptions, ActionResult, ActionStatus, ActionType, AuditEventType,
    AuthContext, CorrelationContext, EnvironmentMode, ErrorCode, HandlerError, HandlerRegistry,
    InMemoryAuditSink, PolicyEngine, ResourceHandler, ResourceType,
};

/// Tag handler that counts every call reaching it.
#[derive(Default)]
struct RecordingHandler {
    resource_type: Option<ResourceType>,
    store: RwLock<BTreeMap<String, Value>>,
    invocations: AtomicUsize,
    mutations: AtomicUsize,
}

impl RecordingHandler {
    fn for_type(resource_type: ResourceType) -> Self {
        Self { resource_type: Some(resource_type), ..Self::default() }
    }

    async fn seed(&self, path: &str, value: Value) {
        self.store.write().await.insert(path.to_string(), value);
    }

    fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceHandler for RecordingHandler {
    fn resource_type(&self) -> ResourceType {
        self.resource_type.unwrap_or(ResourceType::Tag)
    }

    async fn exists(&self, action: &Action, _: &CorrelationContext) -> Result<bool, HandlerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.read().await.contains_key(action.resource_path()))
    }

    async fn create(
        &self,
        action: &Action,
        _: &AuthContext,
        _: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let value = Value::Object(action.payload().clone());
        self.store.write().await.insert(action.resource_path().to_string(), value.clone());
        Ok(ActionResult::success("created", json!({ "created": true, "config": value })))
    }

    async fn read(
        &self,
        action: &Action,
        _: &AuthContext,
        _: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let value = self.store.read().await.get(action.resource_path()).cloned();
        Ok(ActionResult::success("read", value.unwrap_or(Value::Null)))
    }

    async fn update(
        &self,
        action: &Action,
        _: &AuthContext,
        _: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut store = self.store.write().await;
        let entry = store
            .get_mut(action.resource_path())
            .ok_or_else(|| HandlerError::NotFound(action.resource_path().to_string()))?;
        if let (Value::Object(current), payload) = (entry, action.payload()) {
            for (key, value) in payload {
                current.insert(key.clone(), value.clone());
            }
        }
        Ok(ActionResult::success("updated", json!({ "updated": true })))
    }

    async fn delete(
        &self,
        action: &Action,
        _: &AuthContext,
        _: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let removed = self.store.write().await.remove(action.resource_path()).is_some();
        Ok(ActionResult::success("deleted", json!({ "deleted": removed })))
    }
}

struct Harness {
    executor: ActionExecutor,
    tags: Arc<RecordingHandler>,
    scripts: Arc<RecordingHandler>,
    audit: InMemoryAuditSink,
}

fn harness() -> Harness {
    let audit = InMemoryAuditSink::default();
    let tags = Arc::new(RecordingHandler::for_type(ResourceType::Tag));
    let scripts = Arc::new(RecordingHandler::for_type(ResourceType::Script));
    let mut registry = HandlerRegistry::new();
    registry.register(tags.clone()).unwrap();
    registry.register(scripts.clone()).unwrap();

    let executor = ActionExecutor::new(
        PolicyEngine::new(EnvironmentMode::Development, Arc::new(audit.clone())),
        registry,
        Arc::new(audit.clone()),
    );
    Harness { executor, tags, scripts, audit }
}

fn action(
    action_type: ActionType,
    resource_type: ResourceType,
    path: &str,
    payload: Value,
    options: ActionOptions,
) -> Action {
    Action::new(
        Uuid::new_v4(),
        action_type,
        resource_type,
        path,
        payload.as_object().cloned().unwrap_or_else(Map::new),
        options,
    )
    .unwrap()
}

fn ctx() -> CorrelationContext {
    CorrelationContext::new("alice", "test")
}

#[tokio::test]
async fn tag_delete_waits_for_confirmation_then_executes_with_force() {
    let h = harness();
    h.tags.seed("[default]Folder/X", json!({ "tagType": "AtomicTag" })).await;
    let admin = AuthContext::admin("alice");

    let first = action(
        ActionType::Delete,
        ResourceType::Tag,
        "[default]Folder/X",
        json!({}),
        ActionOptions::default(),
    );
    let pending = h.executor.execute(&first, &admin, &ctx()).await;
    assert_eq!(pending.status, ActionStatus::PendingConfirmation);
    assert_eq!(h.tags.mutations(), 0);

    let confirmed = first.clone().with_options(ActionOptions::forced());
    let done = h.executor.execute(&confirmed, &admin, &ctx()).await;
    assert_eq!(done.status, ActionStatus::Success);
    assert_eq!(done.data["deleted"], true);
    assert_eq!(h.tags.mutations(), 1);
    assert_eq!(h.audit.count_of(AuditEventType::ResourceDeleted), 1);
}

#[tokio::test]
async fn script_with_os_system_is_blocked_before_the_handler() {
    let h = harness();
    let malicious = action(
        ActionType::Create,
        ResourceType::Script,
        "shared/cleanup",
        json!({ "code": "import os\nos.system('rm -rf /')" }),
        ActionOptions::forced(),
    );

    let result = h.executor.execute(&malicious, &AuthContext::admin("alice"), &ctx()).await;

    assert_eq!(result.status, ActionStatus::Failure);
    assert!(result.has_error_code(ErrorCode::SecurityViolation));
    assert_eq!(h.scripts.invocations(), 0);

    let violations: Vec<_> = h
        .audit
        .events_for(malicious.correlation_id())
        .into_iter()
        .filter(|event| event.event_type == AuditEventType::SecurityViolation)
        .collect();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].details["line"], 2);
}

#[tokio::test]
async fn security_violation_is_not_bypassed_by_dry_run() {
    let h = harness();
    let malicious = action(
        ActionType::Create,
        ResourceType::Script,
        "shared/probe",
        json!({ "code": "eval(payload)" }),
        ActionOptions::dry_run(),
    );

    let result = h.executor.execute(&malicious, &AuthContext::admin("alice"), &ctx()).await;

    assert!(result.has_error_code(ErrorCode::SecurityViolation));
    assert_eq!(h.scripts.invocations(), 0);
}

#[tokio::test]
async fn dry_run_previews_without_mutation_even_with_warnings() {
    let h = harness();
    let create = action(
        ActionType::Create,
        ResourceType::Tag,
        "[default]Line1/Speed",
        json!({ "tagType": "AtomicTag", "valueSource": "opc", "opcItemPath": "ns=1;s=Speed" }),
        ActionOptions::dry_run(),
    );

    let result = h.executor.execute(&create, &AuthContext::admin("alice"), &ctx()).await;

    assert_eq!(result.status, ActionStatus::DryRun);
    assert!(!result.warnings.is_empty());
    assert_eq!(h.tags.mutations(), 0);
    assert_eq!(h.audit.count_of(AuditEventType::DryRunCompleted), 1);
}

#[tokio::test]
async fn dry_run_is_not_offered_when_validation_fails() {
    let h = harness();
    let create = action(
        ActionType::Create,
        ResourceType::Tag,
        "[default]Line1/Speed",
        json!({ "tagType": "AtomicTag", "dataType": "Float8", "engLow": 10, "engHigh": 5 }),
        ActionOptions::dry_run(),
    );

    let result = h.executor.execute(&create, &AuthContext::admin("alice"), &ctx()).await;

    assert_eq!(result.status, ActionStatus::Failure);
    assert!(result.has_error_code(ErrorCode::ValidationError));
    assert_eq!(result.errors[0].field.as_deref(), Some("engLow"));
    assert_eq!(h.tags.invocations(), 0);
}

#[tokio::test]
async fn dry_run_takes_precedence_over_confirmation() {
    let h = harness();
    h.tags.seed("[default]Folder/X", json!({})).await;
    let delete = action(
        ActionType::Delete,
        ResourceType::Tag,
        "[default]Folder/X",
        json!({}),
        ActionOptions::dry_run(),
    );

    let result = h.executor.execute(&delete, &AuthContext::admin("alice"), &ctx()).await;

    assert_eq!(result.status, ActionStatus::DryRun);
    assert_eq!(h.tags.mutations(), 0);
}

#[tokio::test]
async fn missing_permission_fails_with_authorization_error() {
    let h = harness();
    let reader = AuthContext::new("bob", None, ["tag:read"], false);
    let update = action(
        ActionType::Update,
        ResourceType::Tag,
        "[default]Line1/Speed",
        json!({ "value": 5 }),
        ActionOptions::default(),
    );

    let result = h.executor.execute(&update, &reader, &ctx()).await;

    assert_eq!(result.status, ActionStatus::Failure);
    assert!(result.has_error_code(ErrorCode::AuthorizationError));
    assert!(result.message.contains("tag:update"));
    assert_eq!(h.tags.invocations(), 0);
    assert_eq!(h.audit.count_of(AuditEventType::AuthorizationDenied), 1);
}

#[tokio::test]
async fn existence_prechecks_report_not_found_and_conflict() {
    let h = harness();
    h.tags.seed("[default]Line1/Speed", json!({ "tagType": "AtomicTag" })).await;
    let admin = AuthContext::admin("alice");

    let duplicate = action(
        ActionType::Create,
        ResourceType::Tag,
        "[default]Line1/Speed",
        json!({ "tagType": "AtomicTag", "dataType": "Int4" }),
        ActionOptions::default(),
    );
    let conflict = h.executor.execute(&duplicate, &admin, &ctx()).await;
    assert!(conflict.has_error_code(ErrorCode::Conflict));

    let missing = action(
        ActionType::Read,
        ResourceType::Tag,
        "[default]Line9/Nothing",
        json!({}),
        ActionOptions::default(),
    );
    let not_found = h.executor.execute(&missing, &admin, &ctx()).await;
    assert!(not_found.has_error_code(ErrorCode::NotFound));
    assert_eq!(h.tags.mutations(), 0);
}

#[tokio::test]
async fn failures_carry_the_action_correlation_id() {
    let h = harness();
    let read = action(
        ActionType::Read,
        ResourceType::Tag,
        "[default]Nope",
        json!({}),
        ActionOptions::default(),
    );

    let result = h.executor.execute(&read, &AuthContext::admin("alice"), &ctx()).await;

    assert_eq!(result.correlation_id, Some(read.correlation_id()));
    assert!(h
        .audit
        .events_for(read.correlation_id())
        .iter()
        .any(|event| event.event_type == AuditEventType::ActionFailed));
}
