//! Snyk Group, the root of the entity hierarchy.

use super::{list_params, Asset, EntityList, Issue, Organization};
use crate::client::SnykClient;
use crate::errors::{SnykError, SnykErrorKind, SnykResult};
use crate::pagination::{Paginator, QueryParams};
use crate::resolver::{
    construct, resolve_many, ConstructOptions, ConstructToken, Context, Entity, Relation,
};
use crate::types::{payload_id, Resource};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A Snyk Group.
///
/// Owns the cached lists of its organizations, group-scoped issues and the
/// assets returned by the last search.
#[derive(Debug)]
pub struct Group {
    resource: Resource,
    ctx: Context,
    organizations: Relation<Organization>,
    issues: Relation<Issue>,
    assets: Relation<Asset>,
}

#[async_trait]
impl Entity for Group {
    const KIND: &'static str = "group";

    fn single_endpoint(id: &str, _ctx: &Context) -> SnykResult<String> {
        Ok(format!("/rest/groups/{}", id))
    }

    fn validate(resource: &Resource) -> SnykResult<()> {
        resource.require_str("name").map(|_| ())
    }

    fn from_parts(resource: Resource, ctx: Context, _token: ConstructToken) -> Self {
        Self {
            resource,
            ctx,
            organizations: Relation::new(),
            issues: Relation::new(),
            assets: Relation::new(),
        }
    }

    fn resource(&self) -> &Resource {
        &self.resource
    }

    fn context(&self) -> &Context {
        &self.ctx
    }

    async fn load_relationships(this: Arc<Self>) -> SnykResult<()> {
        let options = ConstructOptions::hydrate().shallow();
        this.organizations
            .get_or_fetch(|| this.resolve_organizations(QueryParams::new(), options))
            .await?;
        Ok(())
    }
}

impl Group {
    /// Loads a group by id, or finds the only group visible to the token.
    ///
    /// Without an id, zero or several visible groups is an `AmbiguousGroup`
    /// error; one is never picked silently.
    pub async fn discover(
        client: Arc<SnykClient>,
        group_id: Option<&str>,
    ) -> SnykResult<Arc<Group>> {
        let payload = match group_id {
            Some(id) => {
                let endpoint = Self::single_endpoint(id, &Context::new(client.clone()))?;
                let mut body = client
                    .get(&endpoint, &client.version_params())
                    .await?
                    .json_value()?;
                match body.get_mut("data").map(Value::take) {
                    Some(data) if data.is_object() => data,
                    _ => {
                        return Err(SnykError::invalid_payload(format!(
                            "No data returned for group {}",
                            id
                        )))
                    }
                }
            }
            None => {
                let groups = client
                    .paginate("/rest/groups", client.list_params())
                    .data_key("data")
                    .collect_all()
                    .await?;
                let [group]: [Value; 1] = groups
                    .try_into()
                    .map_err(|g: Vec<Value>| ambiguous_group(&g))?;
                group
            }
        };

        let group =
            construct::<Group>(payload, Context::new(client), ConstructOptions::default()).await?;
        info!(group_id = group.id(), name = group.name(), "Created group");
        Ok(group)
    }

    /// Group name.
    pub fn name(&self) -> &str {
        self.resource.attr_str("name").unwrap_or_default()
    }

    /// Organizations in this group, fetched once.
    pub async fn organizations(self: &Arc<Self>) -> SnykResult<EntityList<Organization>> {
        self.organizations
            .get_or_fetch(|| {
                self.resolve_organizations(QueryParams::new(), ConstructOptions::hydrate())
            })
            .await
    }

    /// Refetches organizations with extra query parameters and replaces the cache.
    pub async fn fetch_organizations(
        self: &Arc<Self>,
        params: QueryParams,
    ) -> SnykResult<EntityList<Organization>> {
        let orgs = self
            .resolve_organizations(params, ConstructOptions::hydrate())
            .await?;
        Ok(self.organizations.replace(orgs).await)
    }

    async fn resolve_organizations(
        self: &Arc<Self>,
        params: QueryParams,
        options: ConstructOptions,
    ) -> SnykResult<Vec<Arc<Organization>>> {
        let client = self.ctx.client();
        let paginator = client.paginate(
            format!("/rest/groups/{}/orgs", self.id()),
            list_params(client, &params),
        );
        let ctx = self.ctx.with_group(self);
        resolve_many(client, paginator, |_| ctx.clone(), options).await
    }

    /// Organization from the cached list only. Never touches the network.
    pub fn cached_organization(&self, org_id: &str) -> Option<Arc<Organization>> {
        self.organizations
            .cached()?
            .iter()
            .find(|o| o.id() == org_id)
            .cloned()
    }

    /// Organization by id: cached list first, then `GET /rest/orgs/{id}`.
    pub async fn get_organization_by_id(
        self: &Arc<Self>,
        org_id: &str,
    ) -> SnykResult<Option<Arc<Organization>>> {
        if let Some(org) = self.cached_organization(org_id) {
            return Ok(Some(org));
        }

        let client = self.ctx.client();
        let mut body = client
            .get(&format!("/rest/orgs/{}", org_id), &client.version_params())
            .await?
            .json_value()?;

        match body.get_mut("data").map(Value::take) {
            Some(data) if data.is_object() => {
                let ctx = self.ctx.with_group(self);
                let org =
                    construct::<Organization>(data, ctx, ConstructOptions::default()).await?;
                Ok(Some(org))
            }
            _ => {
                warn!(group_id = self.id(), org_id, "No data found for organization");
                Ok(None)
            }
        }
    }

    /// Group-scoped issues, fetched once.
    pub async fn issues(self: &Arc<Self>) -> SnykResult<EntityList<Issue>> {
        self.issues
            .get_or_fetch(|| self.resolve_issues(QueryParams::new()))
            .await
    }

    /// Refetches group issues with filters and replaces the cache.
    pub async fn fetch_issues(
        self: &Arc<Self>,
        params: QueryParams,
    ) -> SnykResult<EntityList<Issue>> {
        let issues = self.resolve_issues(params).await?;
        Ok(self.issues.replace(issues).await)
    }

    async fn resolve_issues(self: &Arc<Self>, params: QueryParams) -> SnykResult<Vec<Arc<Issue>>> {
        let client = self.ctx.client();
        let paginator = client.paginate(
            format!("/rest/groups/{}/issues", self.id()),
            list_params(client, &params),
        );
        let ctx = self.ctx.with_group(self);
        resolve_many(client, paginator, |_| ctx.clone(), ConstructOptions::default()).await
    }

    /// A single asset of this group. `None` when the response has no data.
    pub async fn get_asset(self: &Arc<Self>, asset_id: &str) -> SnykResult<Option<Arc<Asset>>> {
        let client = self.ctx.client();
        let endpoint = format!("/closed-beta/groups/{}/assets/{}", self.id(), asset_id);
        let mut body = client
            .request(
                Method::GET,
                &endpoint,
                &client.version_params(),
                None,
                Some(&asset_headers()),
            )
            .await?
            .json_value()?;

        match body.get_mut("data").map(Value::take) {
            Some(data) if data.is_object() => {
                let ctx = self.ctx.with_group(self);
                let asset = construct::<Asset>(data, ctx, ConstructOptions::default()).await?;
                info!(group_id = self.id(), asset_id = asset.id(), "Fetched asset");
                Ok(Some(asset))
            }
            _ => {
                warn!(group_id = self.id(), asset_id, "No data found for asset");
                Ok(None)
            }
        }
    }

    /// Searches the group's assets and caches the result as [`Group::assets`].
    ///
    /// The first page is a POST carrying `query`; later pages follow
    /// `links.next` with GET.
    pub async fn search_assets(
        self: &Arc<Self>,
        query: &Value,
        params: QueryParams,
    ) -> SnykResult<EntityList<Asset>> {
        let empty = match query {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if empty {
            return Err(SnykError::new(
                SnykErrorKind::InvalidParameter,
                "Asset search requires a query",
            ));
        }

        let client = self.ctx.client();
        debug!(group_id = self.id(), query = %query, "Searching assets");
        let paginator = Paginator::post(
            client,
            format!("/closed-beta/groups/{}/assets/search", self.id()),
            list_params(client, &params),
            query.clone(),
        )
        .headers(asset_headers());

        let ctx = self.ctx.with_group(self);
        let assets =
            resolve_many(client, paginator, |_| ctx.clone(), ConstructOptions::default()).await?;
        Ok(self.assets.replace(assets).await)
    }

    /// Assets from the last [`Group::search_assets`] call.
    pub fn assets(&self) -> Option<EntityList<Asset>> {
        self.assets.cached()
    }
}

/// The closed-beta asset endpoints take plain JSON.
fn asset_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

fn ambiguous_group(groups: &[Value]) -> SnykError {
    let names: Vec<&str> = groups
        .iter()
        .map(|g| {
            g.pointer("/attributes/name")
                .and_then(Value::as_str)
                .unwrap_or_else(|| payload_id(g))
        })
        .collect();
    let message = if names.is_empty() {
        "No groups found for this token".to_string()
    } else {
        format!(
            "Multiple groups found ({}: {}); specify a group id or use a service account token",
            names.len(),
            names.join(", ")
        )
    };
    SnykError::new(SnykErrorKind::AmbiguousGroup, message)
}
