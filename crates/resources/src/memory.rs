use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;

use ignis_core::executor::default_preview;
use ignis_core::{
    Action, ActionResult, ActionType, AuthContext, CorrelationContext, HandlerError,
    HandlerRegistry, RegistryError, ResourceHandler, ResourceType,
};

use crate::paths::{document_key, PathError, TagPath};

pub const GATEWAY_ROOT: &str = "gateway";
const FOLDER: &str = "Folder";

impl From<PathError> for HandlerError {
    fn from(error: PathError) -> Self {
        HandlerError::Invalid(error.to_string())
    }
}

/// Applies `patch` on top of `target`. A `null` value removes the field.
/// Returns the names of fields whose value actually changed.
fn merge_fields(target: &mut Map<String, Value>, patch: &Map<String, Value>) -> Vec<String> {
    let mut changed = Vec::new();
    for (key, value) in patch {
        if value.is_null() {
            if target.remove(key).is_some() {
                changed.push(key.clone());
            }
        } else if target.get(key) != Some(value) {
            target.insert(key.clone(), value.clone());
            changed.push(key.clone());
        }
    }
    changed
}

fn with_preview_fields(action: &Action, fields: Value) -> Value {
    let mut preview = default_preview(action);
    if let (Value::Object(preview), Value::Object(fields)) = (&mut preview, fields) {
        preview.extend(fields);
    }
    preview
}

fn folder_config() -> Map<String, Value> {
    let mut config = Map::new();
    config.insert("tagType".to_string(), Value::String(FOLDER.to_string()));
    config
}

fn is_folder(config: &Map<String, Value>) -> bool {
    config.get("tagType").and_then(Value::as_str) == Some(FOLDER)
}

/// Tag provider tree held in memory. Creating a tag creates its missing
/// parent folders; deleting a folder removes everything below it.
#[derive(Default)]
pub struct InMemoryTagHandler {
    tags: RwLock<BTreeMap<TagPath, Map<String, Value>>>,
    revision: AtomicU64,
}

impl InMemoryTagHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags<I, P>(tags: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = (P, Value)>,
        P: AsRef<str>,
    {
        let mut tree = BTreeMap::new();
        for (path, config) in tags {
            let path = TagPath::parse(path.as_ref())?;
            for ancestor in path.ancestors() {
                tree.entry(ancestor).or_insert_with(folder_config);
            }
            tree.insert(path, config.as_object().cloned().unwrap_or_default());
        }
        Ok(Self { tags: RwLock::new(tree), revision: AtomicU64::new(0) })
    }

    pub async fn get(&self, path: &str) -> Option<Map<String, Value>> {
        let path = TagPath::parse(path).ok()?;
        self.tags.read().await.get(&path).cloned()
    }

    pub async fn tag_count(&self) -> usize {
        self.tags.read().await.len()
    }

    /// Number of mutations applied so far.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    fn target(action: &Action) -> Result<TagPath, HandlerError> {
        let path = TagPath::parse(action.resource_path())?;
        if path.is_root() && action.action_type() != ActionType::List {
            return Err(HandlerError::Invalid(format!(
                "`{path}` is a provider root, not a tag"
            )));
        }
        Ok(path)
    }
}

#[async_trait]
impl ResourceHandler for InMemoryTagHandler {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Tag
    }

    async fn exists(&self, action: &Action, _ctx: &CorrelationContext) -> Result<bool, HandlerError> {
        let path = TagPath::parse(action.resource_path())?;
        if path.is_root() {
            return Ok(true);
        }
        Ok(self.tags.read().await.contains_key(&path))
    }

    async fn create(
        &self,
        action: &Action,
        _auth: &AuthContext,
        ctx: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError> {
        let path = Self::target(action)?;
        let mut tags = self.tags.write().await;
        if tags.contains_key(&path) {
            return Err(HandlerError::Conflict(format!("tag `{path}` already exists")));
        }

        let ancestors = path.ancestors();
        if let Some(blocking) = ancestors
            .iter()
            .find(|ancestor| tags.get(*ancestor).is_some_and(|config| !is_folder(config)))
        {
            return Err(HandlerError::Invalid(format!(
                "`{blocking}` is a tag, not a folder"
            )));
        }
        let mut folders_created = 0;
        for ancestor in ancestors {
            if !tags.contains_key(&ancestor) {
                tags.insert(ancestor, folder_config());
                folders_created += 1;
            }
        }
        tags.insert(path.clone(), action.payload().clone());
        self.revision.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(
            event_name = "resource.tag.created",
            correlation_id = %ctx.correlation_id(),
            path = %path,
            folders_created,
            "tag created"
        );
        Ok(ActionResult::success(
            format!("Created tag `{path}`"),
            json!({
                "created": true,
                "resourcePath": path.to_string(),
                "foldersCreated": folders_created,
                "config": action.payload(),
            }),
        ))
    }

    async fn read(
        &self,
        action: &Action,
        _auth: &AuthContext,
        _ctx: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError> {
        let path = Self::target(action)?;
        let tags = self.tags.read().await;
        let config = tags
            .get(&path)
            .ok_or_else(|| HandlerError::NotFound(format!("tag `{path}` does not exist")))?;
        let children = tags.keys().filter(|candidate| candidate.is_child_of(&path)).count();

        Ok(ActionResult::success(
            format!("Read tag `{path}`"),
            json!({
                "resourcePath": path.to_string(),
                "config": config,
                "childCount": children,
            }),
        ))
    }

    async fn update(
        &self,
        action: &Action,
        _auth: &AuthContext,
        ctx: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError> {
        let path = Self::target(action)?;
        let mut tags = self.tags.write().await;
        let config = tags
            .get_mut(&path)
            .ok_or_else(|| HandlerError::NotFound(format!("tag `{path}` does not exist")))?;
        let changed = merge_fields(config, action.payload());
        let config = config.clone();
        if !changed.is_empty() {
            self.revision.fetch_add(1, Ordering::SeqCst);
        }

        tracing::debug!(
            event_name = "resource.tag.updated",
            correlation_id = %ctx.correlation_id(),
            path = %path,
            changed = changed.len(),
            "tag updated"
        );
        Ok(ActionResult::success(
            format!("Updated tag `{path}` ({} field(s) changed)", changed.len()),
            json!({
                "updated": true,
                "resourcePath": path.to_string(),
                "changedFields": changed,
                "config": config,
            }),
        ))
    }

    async fn delete(
        &self,
        action: &Action,
        _auth: &AuthContext,
        ctx: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError> {
        let path = Self::target(action)?;
        let mut tags = self.tags.write().await;
        if !tags.contains_key(&path) {
            return Err(HandlerError::NotFound(format!("tag `{path}` does not exist")));
        }
        let before = tags.len();
        tags.retain(|candidate, _| candidate != &path && !candidate.is_descendant_of(&path));
        let removed = before - tags.len();
        self.revision.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(
            event_name = "resource.tag.deleted",
            correlation_id = %ctx.correlation_id(),
            path = %path,
            removed,
            "tag deleted"
        );
        Ok(ActionResult::success(
            format!("Deleted tag `{path}`"),
            json!({
                "deleted": true,
                "resourcePath": path.to_string(),
                "removedCount": removed,
                "descendantsRemoved": removed - 1,
            }),
        ))
    }

    async fn list(
        &self,
        action: &Action,
        _auth: &AuthContext,
        _ctx: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError> {
        let path = Self::target(action)?;
        let recursive = action.payload().get("recursive").and_then(Value::as_bool).unwrap_or(false);
        let tags = self.tags.read().await;
        if !path.is_root() && !tags.contains_key(&path) {
            return Err(HandlerError::NotFound(format!("tag folder `{path}` does not exist")));
        }

        let items: Vec<Value> = tags
            .iter()
            .filter(|(candidate, _)| {
                if recursive {
                    candidate.is_descendant_of(&path)
                } else {
                    candidate.is_child_of(&path)
                }
            })
            .map(|(candidate, config)| {
                json!({
                    "path": candidate.to_string(),
                    "name": candidate.name(),
                    "tagType": config.get("tagType"),
                })
            })
            .collect();

        Ok(ActionResult::success(
            format!("Listed {} tag(s) under `{path}`", items.len()),
            json!({ "resourcePath": path.to_string(), "count": items.len(), "items": items }),
        ))
    }

    async fn preview(
        &self,
        action: &Action,
        _auth: &AuthContext,
        _ctx: &CorrelationContext,
    ) -> Result<Value, HandlerError> {
        let path = Self::target(action)?;
        let tags = self.tags.read().await;
        let current = tags.get(&path).cloned();

        let fields = match action.action_type() {
            ActionType::Update => {
                let mut proposed = current.clone().unwrap_or_default();
                let changed = merge_fields(&mut proposed, action.payload());
                json!({ "current": current, "proposed": proposed, "changedFields": changed })
            }
            ActionType::Delete => {
                let affected = tags
                    .keys()
                    .filter(|candidate| *candidate == &path || candidate.is_descendant_of(&path))
                    .count();
                json!({ "current": current, "affectedCount": affected })
            }
            ActionType::Create => {
                let missing_folders = path
                    .ancestors()
                    .into_iter()
                    .filter(|ancestor| !tags.contains_key(ancestor))
                    .map(|ancestor| ancestor.to_string())
                    .collect::<Vec<_>>();
                json!({ "proposed": action.payload(), "foldersToCreate": missing_folders })
            }
            ActionType::Read | ActionType::List => json!({ "current": current }),
        };
        Ok(with_preview_fields(action, fields))
    }
}

/// Flat keyed store for projects, views, scripts and named queries.
pub struct InMemoryDocumentHandler {
    resource_type: ResourceType,
    documents: RwLock<BTreeMap<String, Map<String, Value>>>,
    revision: AtomicU64,
}

impl InMemoryDocumentHandler {
    pub fn new(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            documents: RwLock::new(BTreeMap::new()),
            revision: AtomicU64::new(0),
        }
    }

    pub fn with_documents<I, P>(resource_type: ResourceType, documents: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = (P, Value)>,
        P: AsRef<str>,
    {
        let documents = documents
            .into_iter()
            .map(|(path, document)| {
                Ok((
                    document_key(resource_type, path.as_ref())?,
                    document.as_object().cloned().unwrap_or_default(),
                ))
            })
            .collect::<Result<BTreeMap<_, _>, PathError>>()?;
        Ok(Self { resource_type, documents: RwLock::new(documents), revision: AtomicU64::new(0) })
    }

    pub async fn get(&self, path: &str) -> Option<Map<String, Value>> {
        let key = document_key(self.resource_type, path).ok()?;
        self.documents.read().await.get(&key).cloned()
    }

    pub async fn document_count(&self) -> usize {
        self.documents.read().await.len()
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    fn key(&self, action: &Action) -> Result<String, HandlerError> {
        Ok(document_key(self.resource_type, action.resource_path())?)
    }

    fn not_found(&self, key: &str) -> HandlerError {
        HandlerError::NotFound(format!("{} `{key}` does not exist", self.resource_type))
    }

    /// New key when a project update carries a different `name`.
    fn rename_target(&self, key: &str, payload: &Map<String, Value>) -> Option<String> {
        if self.resource_type != ResourceType::Project {
            return None;
        }
        payload
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty() && *name != key)
            .map(str::to_string)
    }
}

#[async_trait]
impl ResourceHandler for InMemoryDocumentHandler {
    fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    async fn exists(&self, action: &Action, _ctx: &CorrelationContext) -> Result<bool, HandlerError> {
        let key = self.key(action)?;
        Ok(self.documents.read().await.contains_key(&key))
    }

    async fn create(
        &self,
        action: &Action,
        _auth: &AuthContext,
        ctx: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError> {
        let key = self.key(action)?;
        let mut documents = self.documents.write().await;
        if documents.contains_key(&key) {
            return Err(HandlerError::Conflict(format!(
                "{} `{key}` already exists",
                self.resource_type
            )));
        }
        documents.insert(key.clone(), action.payload().clone());
        self.revision.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(
            event_name = "resource.document.created",
            correlation_id = %ctx.correlation_id(),
            resource_type = %self.resource_type,
            path = %key,
            "document created"
        );
        Ok(ActionResult::success(
            format!("Created {} `{key}`", self.resource_type),
            json!({ "created": true, "resourcePath": key, "config": action.payload() }),
        ))
    }

    async fn read(
        &self,
        action: &Action,
        _auth: &AuthContext,
        _ctx: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError> {
        let key = self.key(action)?;
        let documents = self.documents.read().await;
        let document = documents.get(&key).ok_or_else(|| self.not_found(&key))?;
        Ok(ActionResult::success(
            format!("Read {} `{key}`", self.resource_type),
            json!({ "resourcePath": key, "config": document }),
        ))
    }

    async fn update(
        &self,
        action: &Action,
        _auth: &AuthContext,
        ctx: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError> {
        let key = self.key(action)?;
        let mut documents = self.documents.write().await;
        let rename = self.rename_target(&key, action.payload());
        if let Some(new_key) = &rename {
            if documents.contains_key(new_key) {
                return Err(HandlerError::Conflict(format!(
                    "cannot rename `{key}`: {} `{new_key}` already exists",
                    self.resource_type
                )));
            }
        }

        let mut document = documents.remove(&key).ok_or_else(|| self.not_found(&key))?;
        let changed = merge_fields(&mut document, action.payload());
        let stored_at = rename.clone().unwrap_or_else(|| key.clone());
        documents.insert(stored_at.clone(), document.clone());
        if !changed.is_empty() {
            self.revision.fetch_add(1, Ordering::SeqCst);
        }

        tracing::debug!(
            event_name = "resource.document.updated",
            correlation_id = %ctx.correlation_id(),
            resource_type = %self.resource_type,
            path = %key,
            renamed_to = rename.as_deref(),
            changed = changed.len(),
            "document updated"
        );
        Ok(ActionResult::success(
            format!("Updated {} `{key}` ({} field(s) changed)", self.resource_type, changed.len()),
            json!({
                "updated": true,
                "resourcePath": stored_at,
                "renamedFrom": rename.as_ref().map(|_| key.clone()),
                "changedFields": changed,
                "config": document,
            }),
        ))
    }

    async fn delete(
        &self,
        action: &Action,
        _auth: &AuthContext,
        ctx: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError> {
        let key = self.key(action)?;
        let removed = self.documents.write().await.remove(&key);
        if removed.is_none() {
            return Err(self.not_found(&key));
        }
        self.revision.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(
            event_name = "resource.document.deleted",
            correlation_id = %ctx.correlation_id(),
            resource_type = %self.resource_type,
            path = %key,
            "document deleted"
        );
        Ok(ActionResult::success(
            format!("Deleted {} `{key}`", self.resource_type),
            json!({ "deleted": true, "resourcePath": key }),
        ))
    }

    async fn list(
        &self,
        action: &Action,
        _auth: &AuthContext,
        _ctx: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError> {
        let prefix = action.resource_path().trim().trim_matches('/');
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            document_key(self.resource_type, prefix)?
        };
        let items: Vec<String> = self
            .documents
            .read()
            .await
            .keys()
            .filter(|key| {
                prefix.is_empty()
                    || key.as_str() == prefix
                    || key.strip_prefix(prefix.as_str()).is_some_and(|rest| rest.starts_with('/'))
            })
            .cloned()
            .collect();

        Ok(ActionResult::success(
            format!("Listed {} {} resource(s)", items.len(), self.resource_type),
            json!({ "resourcePath": prefix, "count": items.len(), "items": items }),
        ))
    }

    async fn preview(
        &self,
        action: &Action,
        _auth: &AuthContext,
        _ctx: &CorrelationContext,
    ) -> Result<Value, HandlerError> {
        if action.action_type() == ActionType::List {
            return Ok(default_preview(action));
        }
        let key = self.key(action)?;
        let current = self.documents.read().await.get(&key).cloned();
        let fields = match action.action_type() {
            ActionType::Update => {
                let mut proposed = current.clone().unwrap_or_default();
                let changed = merge_fields(&mut proposed, action.payload());
                json!({
                    "current": current,
                    "proposed": proposed,
                    "changedFields": changed,
                    "renameTo": self.rename_target(&key, action.payload()),
                })
            }
            ActionType::Create => json!({ "proposed": action.payload() }),
            _ => json!({ "current": current }),
        };
        Ok(with_preview_fields(action, fields))
    }
}

/// Gateway-wide settings keyed by section. The resource path is either
/// `gateway` for the whole document or a single section name.
pub struct InMemoryGatewayConfigHandler {
    sections: RwLock<Map<String, Value>>,
    revision: AtomicU64,
}

impl Default for InMemoryGatewayConfigHandler {
    fn default() -> Self {
        let defaults = json!({
            "general": { "systemName": "Ignition-Gateway", "homepageNotesEnabled": false },
            "redundancy": { "mode": "Independent" },
            "security": { "auditProfile": "default", "sessionTimeoutMinutes": 30 },
        });
        Self::with_sections(defaults.as_object().cloned().unwrap_or_default())
    }
}

impl InMemoryGatewayConfigHandler {
    pub fn with_sections(sections: Map<String, Value>) -> Self {
        Self { sections: RwLock::new(sections), revision: AtomicU64::new(0) }
    }

    pub async fn section(&self, name: &str) -> Option<Value> {
        self.sections.read().await.get(name).cloned()
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    fn section_of(action: &Action) -> Option<String> {
        let path = action.resource_path().trim().trim_matches('/');
        let path = path.strip_prefix(GATEWAY_ROOT).unwrap_or(path).trim_start_matches('/');
        (!path.is_empty()).then(|| path.to_string())
    }

    fn apply(sections: &mut Map<String, Value>, section: Option<&str>, payload: &Map<String, Value>) -> Vec<String> {
        match section {
            Some(name) => {
                let entry = sections.entry(name.to_string()).or_insert_with(|| json!({}));
                if !entry.is_object() {
                    *entry = json!({});
                }
                match entry.as_object_mut() {
                    Some(target) => merge_fields(target, payload)
                        .into_iter()
                        .map(|field| format!("{name}.{field}"))
                        .collect(),
                    None => Vec::new(),
                }
            }
            None => {
                let mut changed = Vec::new();
                for (name, value) in payload {
                    match (sections.get_mut(name), value) {
                        (Some(Value::Object(target)), Value::Object(patch)) => changed.extend(
                            merge_fields(target, patch)
                                .into_iter()
                                .map(|field| format!("{name}.{field}")),
                        ),
                        _ => {
                            if sections.get(name) != Some(value) {
                                sections.insert(name.clone(), value.clone());
                                changed.push(name.clone());
                            }
                        }
                    }
                }
                changed
            }
        }
    }
}

#[async_trait]
impl ResourceHandler for InMemoryGatewayConfigHandler {
    fn resource_type(&self) -> ResourceType {
        ResourceType::GatewayConfig
    }

    async fn exists(&self, action: &Action, _ctx: &CorrelationContext) -> Result<bool, HandlerError> {
        Ok(match Self::section_of(action) {
            None => true,
            Some(section) => self.sections.read().await.contains_key(&section),
        })
    }

    async fn create(
        &self,
        _action: &Action,
        _auth: &AuthContext,
        _ctx: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError> {
        Err(HandlerError::Unsupported("gateway configuration cannot be created".to_string()))
    }

    async fn read(
        &self,
        action: &Action,
        _auth: &AuthContext,
        _ctx: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError> {
        let sections = self.sections.read().await;
        let (label, config) = match Self::section_of(action) {
            None => (GATEWAY_ROOT.to_string(), Value::Object(sections.clone())),
            Some(section) => {
                let config = sections.get(&section).cloned().ok_or_else(|| {
                    HandlerError::NotFound(format!("configuration section `{section}` does not exist"))
                })?;
                (section, config)
            }
        };
        Ok(ActionResult::success(
            format!("Read gateway configuration `{label}`"),
            json!({ "resourcePath": label, "config": config }),
        ))
    }

    async fn update(
        &self,
        action: &Action,
        _auth: &AuthContext,
        ctx: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError> {
        let section = Self::section_of(action);
        let mut sections = self.sections.write().await;
        let changed = Self::apply(&mut sections, section.as_deref(), action.payload());
        if !changed.is_empty() {
            self.revision.fetch_add(1, Ordering::SeqCst);
        }

        tracing::info!(
            event_name = "resource.gateway_config.updated",
            correlation_id = %ctx.correlation_id(),
            section = section.as_deref().unwrap_or(GATEWAY_ROOT),
            changed = ?changed,
            "gateway configuration updated"
        );
        Ok(ActionResult::success(
            format!("Updated gateway configuration ({} setting(s) changed)", changed.len()),
            json!({
                "updated": true,
                "resourcePath": section.as_deref().unwrap_or(GATEWAY_ROOT),
                "changedFields": changed,
            }),
        ))
    }

    async fn delete(
        &self,
        _action: &Action,
        _auth: &AuthContext,
        _ctx: &CorrelationContext,
    ) -> Result<ActionResult, HandlerError> {
        Err(HandlerError::Unsupported("gateway configuration cannot be deleted".to_string()))
    }

    async fn preview(
        &self,
        action: &Action,
        _auth: &AuthContext,
        _ctx: &CorrelationContext,
    ) -> Result<Value, HandlerError> {
        let section = Self::section_of(action);
        let current = self.sections.read().await.clone();
        let mut proposed = current.clone();
        let changed = Self::apply(&mut proposed, section.as_deref(), action.payload());
        let pick = |sections: &Map<String, Value>| match &section {
            Some(name) => sections.get(name).cloned().unwrap_or(Value::Null),
            None => Value::Object(sections.clone()),
        };
        Ok(with_preview_fields(
            action,
            json!({ "current": pick(&current), "proposed": pick(&proposed), "changedFields": changed }),
        ))
    }
}

/// One in-memory handler per resource type, shared with the registry.
#[derive(Clone)]
pub struct InMemoryBackend {
    pub tags: Arc<InMemoryTagHandler>,
    pub projects: Arc<InMemoryDocumentHandler>,
    pub views: Arc<InMemoryDocumentHandler>,
    pub scripts: Arc<InMemoryDocumentHandler>,
    pub named_queries: Arc<InMemoryDocumentHandler>,
    pub gateway_config: Arc<InMemoryGatewayConfigHandler>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self {
            tags: Arc::new(InMemoryTagHandler::new()),
            projects: Arc::new(InMemoryDocumentHandler::new(ResourceType::Project)),
            views: Arc::new(InMemoryDocumentHandler::new(ResourceType::View)),
            scripts: Arc::new(InMemoryDocumentHandler::new(ResourceType::Script)),
            named_queries: Arc::new(InMemoryDocumentHandler::new(ResourceType::NamedQuery)),
            gateway_config: Arc::new(InMemoryGatewayConfigHandler::default()),
        }
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags(mut self, tags: InMemoryTagHandler) -> Self {
        self.tags = Arc::new(tags);
        self
    }

    /// Registry covering every resource type.
    pub fn registry(&self) -> Result<HandlerRegistry, RegistryError> {
        let registry = HandlerRegistry::new()
            .with_handler(self.tags.clone())?
            .with_handler(self.projects.clone())?
            .with_handler(self.views.clone())?
            .with_handler(self.scripts.clone())?
            .with_handler(self.named_queries.clone())?
            .with_handler(self.gateway_config.clone())?;
        registry.ensure_complete()?;
        Ok(registry)
    }

    /// Sum of mutations across every handler.
    pub fn total_revisions(&self) -> u64 {
        self.tags.revision()
            + self.projects.revision()
            + self.views.revision()
            + self.scripts.revision()
            + self.named_queries.revision()
            + self.gateway_config.revision()
    }
}

pub fn standard_registry() -> Result<HandlerRegistry, RegistryError> {
    InMemoryBackend::new().registry()
}
