use std::sync::Arc;

use serde_json::{json, Map, Value};
use uuid::Uuid;

use ignis_core::{
    Action, ActionExecutor, ActionOptions, ActionStatus, ActionType, AuthContext,
    CorrelationContext, EnvironmentMode, InMemoryAuditSink, PolicyEngine, ResourceType,
};
use ignis_resources::{InMemoryBackend, InMemoryTagHandler};

type BackendContractResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
}

fn executor(backend: &InMemoryBackend) -> BackendContractResult<ActionExecutor> {
    let audit = InMemoryAuditSink::default();
    let registry = backend.registry().map_err(|error| error.to_string())?;
    Ok(ActionExecutor::new(
        PolicyEngine::new(EnvironmentMode::Development, Arc::new(audit.clone())),
        registry,
        Arc::new(audit),
    ))
}

fn action(
    action_type: ActionType,
    resource_type: ResourceType,
    path: &str,
    payload: Value,
    options: ActionOptions,
) -> BackendContractResult<Action> {
    Action::new(
        Uuid::new_v4(),
        action_type,
        resource_type,
        path,
        payload.as_object().cloned().unwrap_or_else(Map::new),
        options,
    )
    .map_err(|error| error.to_string())
}

fn ctx() -> CorrelationContext {
    CorrelationContext::new("ops", "contract")
}

#[tokio::test]
async fn folder_delete_is_confirmed_then_removes_the_subtree() -> BackendContractResult {
    let tags = InMemoryTagHandler::with_tags([
        ("[default]Folder/X", json!({ "tagType": "AtomicTag", "dataType": "Int4" })),
        ("[default]Folder/Y", json!({ "tagType": "AtomicTag", "dataType": "Int4" })),
    ])
    .map_err(|error| error.to_string())?;
    let backend = InMemoryBackend::new().with_tags(tags);
    let executor = executor(&backend)?;
    let admin = AuthContext::admin("ops");

    let delete = action(
        ActionType::Delete,
        ResourceType::Tag,
        "[default]Folder",
        json!({}),
        ActionOptions::default(),
    )?;
    let pending = executor.execute(&delete, &admin, &ctx()).await;
    require_eq!(pending.status, ActionStatus::PendingConfirmation);
    require_eq!(pending.data["affectedCount"], json!(3));
    require_eq!(backend.total_revisions(), 0);

    let forced = delete.with_options(ActionOptions::forced());
    let done = executor.execute(&forced, &admin, &ctx()).await;
    require_eq!(done.status, ActionStatus::Success);
    require_eq!(done.data["removedCount"], json!(3));
    require_eq!(backend.tags.tag_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn dry_run_preview_shows_current_and_proposed_values() -> BackendContractResult {
    let backend = InMemoryBackend::new();
    let executor = executor(&backend)?;
    let admin = AuthContext::admin("ops");

    let create = action(
        ActionType::Create,
        ResourceType::View,
        "Overview/Main",
        json!({ "root": { "type": "ia.container.flex", "children": [] } }),
        ActionOptions::default(),
    )?;
    require_eq!(executor.execute(&create, &admin, &ctx()).await.status, ActionStatus::Success);

    let update = action(
        ActionType::Update,
        ResourceType::View,
        "Overview/Main",
        json!({ "root": { "type": "ia.container.coord", "children": [] } }),
        ActionOptions::dry_run(),
    )?;
    let preview = executor.execute(&update, &admin, &ctx()).await;
    require_eq!(preview.status, ActionStatus::DryRun);
    require_eq!(preview.data["current"]["root"]["type"], json!("ia.container.flex"));
    require_eq!(preview.data["proposed"]["root"]["type"], json!("ia.container.coord"));

    let stored = backend.views.get("Overview/Main").await.ok_or("view should exist")?;
    require_eq!(stored["root"]["type"], json!("ia.container.flex"));
    require_eq!(backend.views.revision(), 1);
    Ok(())
}

#[tokio::test]
async fn gateway_updates_always_need_confirmation() -> BackendContractResult {
    let backend = InMemoryBackend::new();
    let executor = executor(&backend)?;
    let admin = AuthContext::admin("ops");

    let update = action(
        ActionType::Update,
        ResourceType::GatewayConfig,
        "general",
        json!({ "systemName": "Plant-GW" }),
        ActionOptions::default(),
    )?;
    let pending = executor.execute(&update, &admin, &ctx()).await;
    require_eq!(pending.status, ActionStatus::PendingConfirmation);
    require_eq!(pending.data["confirmationRule"], json!("gateway-config-update"));
    require_eq!(pending.data["changedFields"], json!(["general.systemName"]));

    let confirmed = update.with_options(ActionOptions::forced());
    let done = executor.execute(&confirmed, &admin, &ctx()).await;
    require!(done.is_success(), "forced gateway update should succeed: {}", done.message);
    let general = backend.gateway_config.section("general").await.ok_or("section missing")?;
    require_eq!(general["systemName"], json!("Plant-GW"));
    Ok(())
}

#[tokio::test]
async fn list_and_read_do_not_mutate() -> BackendContractResult {
    let backend = InMemoryBackend::new();
    let executor = executor(&backend)?;
    let reader = AuthContext::new("viewer", None, ["named-query:read", "named-query:list"], true);

    let list = action(
        ActionType::List,
        ResourceType::NamedQuery,
        "",
        json!({}),
        ActionOptions::default(),
    )?;
    let listed = executor.execute(&list, &reader, &ctx()).await;
    require_eq!(listed.status, ActionStatus::Success);
    require_eq!(listed.data["count"], json!(0));
    require_eq!(backend.total_revisions(), 0);
    Ok(())
}
