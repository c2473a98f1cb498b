//! Relationship resolution shared by every entity type.
//!
//! An entity is only ever built by [`construct`], which binds it to an
//! immutable [`Context`]. One-to-many relationships are cached per parent in
//! a [`Relation`] and filled by [`resolve_many`]: paginate, fan out one
//! construction per payload on the client's dispatcher, keep the survivors.

use crate::client::SnykClient;
use crate::entities::{Group, Organization, Project};
use crate::errors::{SnykError, SnykResult};
use crate::pagination::Paginator;
use crate::types::{is_summary, payload_id, Resource};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Shared client plus non-owning back-references to ancestors.
///
/// Ancestors own their children's cached lists, so children only keep
/// `Weak` handles. A dropped ancestor reads as "no context".
#[derive(Clone)]
pub struct Context {
    client: Arc<SnykClient>,
    group: Weak<Group>,
    organization: Weak<Organization>,
    project: Weak<Project>,
}

impl Context {
    /// A context with only the client.
    pub fn new(client: Arc<SnykClient>) -> Self {
        Self {
            client,
            group: Weak::new(),
            organization: Weak::new(),
            project: Weak::new(),
        }
    }

    /// Copy of this context attached to `group`.
    pub fn with_group(&self, group: &Arc<Group>) -> Self {
        Self {
            group: Arc::downgrade(group),
            ..self.clone()
        }
    }

    /// Copy of this context attached to `organization`.
    pub fn with_organization(&self, organization: &Arc<Organization>) -> Self {
        Self {
            organization: Arc::downgrade(organization),
            ..self.clone()
        }
    }

    /// Copy of this context attached to `project`.
    pub fn with_project(&self, project: &Arc<Project>) -> Self {
        Self {
            project: Arc::downgrade(project),
            ..self.clone()
        }
    }

    /// The shared client.
    pub fn client(&self) -> &Arc<SnykClient> {
        &self.client
    }

    /// The owning group, if attached and alive.
    pub fn group(&self) -> Option<Arc<Group>> {
        self.group.upgrade()
    }

    /// The owning organization, if attached and alive.
    pub fn organization(&self) -> Option<Arc<Organization>> {
        self.organization.upgrade()
    }

    /// The owning project, if attached and alive.
    pub fn project(&self) -> Option<Arc<Project>> {
        self.project.upgrade()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("base_url", &self.client.base_url())
            .field("group", &self.group().map(|g| g.id().to_string()))
            .field("organization", &self.organization().map(|o| o.id().to_string()))
            .field("project", &self.project().map(|p| p.id().to_string()))
            .finish()
    }
}

/// Proof that an entity is being assembled by [`construct`].
///
/// Only this crate can create one, so validation and hydration cannot be
/// skipped from outside:
///
/// ```compile_fail
/// let _ = integrations_snyk::ConstructToken { _private: () };
/// ```
#[derive(Debug)]
pub struct ConstructToken {
    _private: (),
}

/// Assembles an entity without validation, for unit tests of accessors.
#[cfg(test)]
pub(crate) fn assemble<E: Entity>(resource: Resource, ctx: Context) -> E {
    E::from_parts(resource, ctx, ConstructToken { _private: () })
}

/// A context-bound wrapper around a [`Resource`].
#[async_trait]
pub trait Entity: Send + Sync + Sized + 'static {
    /// Name used in log lines.
    const KIND: &'static str;

    /// Single-item endpoint used to hydrate a summary payload.
    fn single_endpoint(id: &str, ctx: &Context) -> SnykResult<String>;

    /// Checks the fields this type cannot live without.
    fn validate(resource: &Resource) -> SnykResult<()>;

    /// Wraps a validated resource. Only [`construct`] can call this.
    fn from_parts(resource: Resource, ctx: Context, token: ConstructToken) -> Self;

    /// The underlying resource.
    fn resource(&self) -> &Resource;

    /// The context set at construction.
    fn context(&self) -> &Context;

    /// Resource id.
    fn id(&self) -> &str {
        &self.resource().id
    }

    /// Resolves this entity's own relationships (eager loading).
    async fn load_relationships(_this: Arc<Self>) -> SnykResult<()> {
        Ok(())
    }
}

/// Knobs for [`construct`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstructOptions {
    /// Fetch the single-item endpoint when the payload has no attributes.
    pub fetch_full_details_if_summary: bool,
    /// Run eager loading after construction when the strategy is eager.
    pub allow_eager: bool,
}

impl Default for ConstructOptions {
    fn default() -> Self {
        Self {
            fetch_full_details_if_summary: false,
            allow_eager: true,
        }
    }
}

impl ConstructOptions {
    /// Hydrate summaries.
    pub fn hydrate() -> Self {
        Self {
            fetch_full_details_if_summary: true,
            ..Self::default()
        }
    }

    /// No eager loading; used for children resolved by an eager load.
    pub fn shallow(self) -> Self {
        Self {
            allow_eager: false,
            ..self
        }
    }
}

/// Builds an entity from a raw payload.
///
/// Summary payloads are hydrated first when asked to. Under the eager
/// strategy the new entity's relationships are resolved before returning.
pub async fn construct<E: Entity>(
    payload: Value,
    ctx: Context,
    options: ConstructOptions,
) -> SnykResult<Arc<E>> {
    let payload = if options.fetch_full_details_if_summary && is_summary(&payload) {
        hydrate::<E>(&payload, &ctx).await?
    } else {
        payload
    };

    let resource = Resource::from_value(&payload)?;
    E::validate(&resource)?;

    let eager = options.allow_eager && ctx.client().loading_strategy().is_eager();
    let entity = Arc::new(E::from_parts(resource, ctx, ConstructToken { _private: () }));

    if eager {
        debug!(entity = E::KIND, id = entity.id(), "Eager loading relationships");
        E::load_relationships(entity.clone()).await?;
    }

    Ok(entity)
}

async fn hydrate<E: Entity>(payload: &Value, ctx: &Context) -> SnykResult<Value> {
    let id = payload.get("id").and_then(Value::as_str).ok_or_else(|| {
        SnykError::invalid_payload(format!("Summary {} payload has no id", E::KIND))
    })?;

    let endpoint = E::single_endpoint(id, ctx)?;
    debug!(entity = E::KIND, id, endpoint = %endpoint, "Hydrating summary payload");

    let client = ctx.client();
    let mut body = client.get(&endpoint, &client.version_params()).await?.json_value()?;

    match body.get_mut("data").map(Value::take) {
        Some(data) if data.is_object() => Ok(data),
        _ => Err(SnykError::invalid_payload(format!(
            "No data returned when hydrating {} {}",
            E::KIND,
            id
        ))),
    }
}

/// Builds one entity per payload on the dispatcher and keeps the survivors.
///
/// `ctx_for` picks the context of each payload. Failed constructions are
/// logged and dropped. Children are built without eager loading; under the
/// eager strategy their own relationships are resolved afterwards, outside
/// the worker pool.
pub async fn construct_all<E, F>(
    client: &Arc<SnykClient>,
    payloads: Vec<Value>,
    mut ctx_for: F,
    options: ConstructOptions,
) -> SnykResult<Vec<Arc<E>>>
where
    E: Entity,
    F: FnMut(&Value) -> Context,
{
    let total = payloads.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let child_options = options.shallow();

    let mut batch = client.dispatcher().batch::<Arc<E>>();
    for payload in payloads {
        let ctx = ctx_for(&payload);
        debug!(entity = E::KIND, id = payload_id(&payload), "Submitting construction");
        batch.spawn(construct::<E>(payload, ctx, child_options))?;
    }

    let built = batch.collect_settled(E::KIND).await;
    info!(
        entity = E::KIND,
        constructed = built.len(),
        total,
        "Instantiated {} of {} {} entities",
        built.len(),
        total,
        E::KIND
    );

    if options.allow_eager && client.loading_strategy().is_eager() {
        let loads = built.iter().map(|e| E::load_relationships(e.clone()));
        let outcomes = futures::future::join_all(loads).await;
        for (entity, outcome) in built.iter().zip(outcomes) {
            if let Err(e) = outcome {
                warn!(
                    entity = E::KIND,
                    id = entity.id(),
                    error = %e,
                    "Eager loading failed, relationships stay lazy"
                );
            }
        }
    }

    Ok(built)
}

/// Paginates `paginator` and constructs every payload it yields.
///
/// A failure on the first page propagates; anything later degrades to a
/// smaller result.
pub async fn resolve_many<E, F>(
    client: &Arc<SnykClient>,
    paginator: Paginator<'_>,
    ctx_for: F,
    options: ConstructOptions,
) -> SnykResult<Vec<Arc<E>>>
where
    E: Entity,
    F: FnMut(&Value) -> Context,
{
    let payloads = paginator.data_key("data").collect_all().await?;
    debug!(entity = E::KIND, count = payloads.len(), "Collected payloads");
    construct_all(client, payloads, ctx_for, options).await
}

/// A cached one-to-many relationship.
///
/// Fetches are serialized by an async lock held across the round-trip, so
/// concurrent first accesses issue a single request and share the list.
/// The published list sits behind its own lock, so reads never wait on a
/// fetch and never miss a loaded list.
pub struct Relation<T> {
    fetch: Mutex<()>,
    published: RwLock<Option<Arc<Vec<Arc<T>>>>>,
}

impl<T> Default for Relation<T> {
    fn default() -> Self {
        Self {
            fetch: Mutex::new(()),
            published: RwLock::new(None),
        }
    }
}

impl<T> Relation<T> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached list, fetching it on first use.
    ///
    /// A failed fetch leaves the cache empty.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> SnykResult<Arc<Vec<Arc<T>>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SnykResult<Vec<Arc<T>>>>,
    {
        if let Some(list) = self.cached() {
            return Ok(list);
        }

        let _fetching = self.fetch.lock().await;
        // Another caller may have published while we waited.
        if let Some(list) = self.cached() {
            return Ok(list);
        }
        let list = Arc::new(fetch().await?);
        *self.published.write() = Some(list.clone());
        Ok(list)
    }

    /// Replaces the cached list.
    pub async fn replace(&self, items: Vec<Arc<T>>) -> Arc<Vec<Arc<T>>> {
        let list = Arc::new(items);
        let _fetching = self.fetch.lock().await;
        *self.published.write() = Some(list.clone());
        list
    }

    /// Cached list without fetching. `None` until a fetch has completed.
    pub fn cached(&self) -> Option<Arc<Vec<Arc<T>>>> {
        self.published.read().clone()
    }

    /// Returns true once a list is cached.
    pub fn is_loaded(&self) -> bool {
        self.published.read().is_some()
    }
}

impl<T> fmt::Debug for Relation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cached() {
            Some(list) => write!(f, "Relation(loaded: {})", list.len()),
            None => write!(f, "Relation(unloaded)"),
        }
    }
}
