//! Snyk Asset (closed-beta asset inventory).

use super::{list_params, EntityList, Organization, Project};
use crate::errors::{SnykError, SnykErrorKind, SnykResult};
use crate::pagination::QueryParams;
use crate::resolver::{
    construct_all, resolve_many, ConstructOptions, ConstructToken, Context, Entity, Relation,
};
use crate::types::Resource;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// A repository, package or image tracked in a group's asset inventory.
#[derive(Debug)]
pub struct Asset {
    resource: Resource,
    ctx: Context,
    organizations: Relation<Organization>,
    projects: Relation<Project>,
}

#[async_trait]
impl Entity for Asset {
    const KIND: &'static str = "asset";

    fn single_endpoint(id: &str, ctx: &Context) -> SnykResult<String> {
        let group = ctx.group().ok_or_else(|| {
            SnykError::new(
                SnykErrorKind::InvalidParameter,
                format!("Asset {} needs a group context to be fetched", id),
            )
        })?;
        Ok(format!("/closed-beta/groups/{}/assets/{}", group.id(), id))
    }

    fn validate(resource: &Resource) -> SnykResult<()> {
        resource.require_str("name").map(|_| ())
    }

    fn from_parts(resource: Resource, ctx: Context, _token: ConstructToken) -> Self {
        Self {
            resource,
            ctx,
            organizations: Relation::new(),
            projects: Relation::new(),
        }
    }

    fn resource(&self) -> &Resource {
        &self.resource
    }

    fn context(&self) -> &Context {
        &self.ctx
    }

    async fn load_relationships(this: Arc<Self>) -> SnykResult<()> {
        let options = ConstructOptions::default().shallow();
        this.organizations
            .get_or_fetch(|| this.resolve_organizations(options))
            .await?;
        this.projects
            .get_or_fetch(|| this.resolve_projects(QueryParams::new(), options))
            .await?;
        Ok(())
    }
}

impl Asset {
    /// Asset name.
    pub fn name(&self) -> &str {
        self.resource.attr_str("name").unwrap_or_default()
    }

    /// Systems that reported this asset (`snyk`, `github`, ...).
    pub fn sources(&self) -> Vec<&str> {
        self.resource
            .attr("sources")
            .and_then(Value::as_array)
            .map(|s| s.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    fn has_snyk_source(&self) -> bool {
        self.sources().contains(&"snyk")
    }

    /// Web URL of the asset.
    pub fn browse_url(&self) -> Option<&str> {
        self.resource.attr_str("browse_url")
    }

    /// One field of the `app_context` attribute (`owner`, `lifecycle`, ...).
    pub fn app_context(&self, key: &str) -> Option<&str> {
        self.resource.attr("app_context")?.get(key)?.as_str()
    }

    /// `(repository, owner)` parsed from a GitHub browse URL.
    pub fn github_name_and_owner(&self) -> Option<(String, String)> {
        let Some(raw) = self.browse_url() else {
            warn!(asset_id = self.id(), "No browse URL, cannot extract GitHub name and owner");
            return None;
        };
        github_name_and_owner(raw)
    }

    /// Business criticality from `class.rank`: 1 critical, 2 high, 3 medium, 4 low.
    pub fn business_criticality(&self) -> Option<&'static str> {
        let rank = self.resource.attr("class").and_then(|c| c.get("rank"));
        let criticality = rank.and_then(rank_value).and_then(criticality_for_rank);
        if criticality.is_none() {
            warn!(asset_id = self.id(), rank = ?rank, "Asset has no usable class rank");
        }
        criticality
    }

    /// Organizations embedded in the asset, hydrated and fetched once.
    ///
    /// Empty unless the asset has a `snyk` source and belongs to a group.
    pub async fn organizations(&self) -> SnykResult<EntityList<Organization>> {
        self.organizations
            .get_or_fetch(|| self.resolve_organizations(ConstructOptions::default()))
            .await
    }

    async fn resolve_organizations(
        &self,
        options: ConstructOptions,
    ) -> SnykResult<Vec<Arc<Organization>>> {
        if !self.has_snyk_source() {
            info!(asset_id = self.id(), "Asset is not a snyk source, no organizations");
            return Ok(Vec::new());
        }
        let Some(group) = self.ctx.group() else {
            warn!(asset_id = self.id(), "Asset has no group context, cannot build organizations");
            return Ok(Vec::new());
        };

        let payloads: Vec<Value> = self
            .resource
            .attr("organizations")
            .and_then(Value::as_array)
            .map(|orgs| {
                orgs.iter()
                    .filter(|o| {
                        let has_id = o.get("id").and_then(Value::as_str).is_some();
                        if !has_id {
                            warn!(asset_id = self.id(), "Embedded organization has no id");
                        }
                        has_id
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let client = self.ctx.client();
        let ctx = Context::new(client.clone()).with_group(&group);
        let options = ConstructOptions {
            fetch_full_details_if_summary: true,
            ..options
        };
        construct_all(client, payloads, |_| ctx.clone(), options).await
    }

    /// Projects linked through `relationships.projects`, fetched once.
    ///
    /// Each project is attached to the matching organization from
    /// [`Asset::organizations`] when there is one.
    pub async fn projects(&self) -> SnykResult<EntityList<Project>> {
        self.projects
            .get_or_fetch(|| self.resolve_projects(QueryParams::new(), ConstructOptions::default()))
            .await
    }

    /// Refetches linked projects with extra query parameters and replaces the cache.
    pub async fn fetch_projects(&self, params: QueryParams) -> SnykResult<EntityList<Project>> {
        let projects = self
            .resolve_projects(params, ConstructOptions::default())
            .await?;
        Ok(self.projects.replace(projects).await)
    }

    async fn resolve_projects(
        &self,
        params: QueryParams,
        options: ConstructOptions,
    ) -> SnykResult<Vec<Arc<Project>>> {
        if !self.has_snyk_source() {
            warn!(asset_id = self.id(), "Asset is not a snyk source, cannot fetch projects");
            return Ok(Vec::new());
        }
        let Some(link) = self
            .resource
            .relationship("projects")
            .and_then(|r| r.related_link.clone())
        else {
            warn!(asset_id = self.id(), "Asset has no related link for projects");
            return Ok(Vec::new());
        };

        let orgs = self
            .organizations
            .get_or_fetch(|| self.resolve_organizations(options))
            .await?;

        let client = self.ctx.client();
        debug!(asset_id = self.id(), link = %link, "Fetching projects via relationship");
        let paginator = client.paginate(link, list_params(client, &params));
        let ctx = self.ctx.clone();

        resolve_many(
            client,
            paginator,
            |payload| {
                let org = payload
                    .pointer("/relationships/organization/data/id")
                    .and_then(Value::as_str)
                    .and_then(|id| orgs.iter().find(|o| o.id() == id));
                match org {
                    Some(org) => ctx.with_organization(org),
                    None => ctx.clone(),
                }
            },
            options,
        )
        .await
    }
}

fn github_name_and_owner(raw: &str) -> Option<(String, String)> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    if !host.contains("github.com") {
        debug!(url = raw, "Browse URL is not a GitHub URL");
        return None;
    }
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [owner, repo, ..] => Some((repo.to_string(), owner.to_string())),
        _ => None,
    }
}

fn rank_value(rank: &Value) -> Option<i64> {
    match rank {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn criticality_for_rank(rank: i64) -> Option<&'static str> {
    match rank {
        1 => Some("critical"),
        2 => Some("high"),
        3 => Some("medium"),
        4 => Some("low"),
        _ => None,
    }
}
