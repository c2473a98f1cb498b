//! Snyk Organization.

use super::{list_params, EntityList, Group, Issue, Policy, Project};
use crate::errors::SnykResult;
use crate::pagination::QueryParams;
use crate::resolver::{
    construct, resolve_many, ConstructOptions, ConstructToken, Context, Entity, Relation,
};
use crate::types::{PackageUrl, Resource};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// A Snyk Organization.
#[derive(Debug)]
pub struct Organization {
    resource: Resource,
    ctx: Context,
    projects: Relation<Project>,
    issues: Relation<Issue>,
    policies: Relation<Policy>,
}

#[async_trait]
impl Entity for Organization {
    const KIND: &'static str = "organization";

    fn single_endpoint(id: &str, _ctx: &Context) -> SnykResult<String> {
        Ok(format!("/rest/orgs/{}", id))
    }

    fn validate(resource: &Resource) -> SnykResult<()> {
        resource.require_str("name").map(|_| ())
    }

    fn from_parts(resource: Resource, ctx: Context, _token: ConstructToken) -> Self {
        Self {
            resource,
            ctx,
            projects: Relation::new(),
            issues: Relation::new(),
            policies: Relation::new(),
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
        this.projects
            .get_or_fetch(|| this.resolve_projects(QueryParams::new(), options))
            .await?;
        Ok(())
    }
}

impl Organization {
    /// Organization name.
    pub fn name(&self) -> &str {
        self.resource.attr_str("name").unwrap_or_default()
    }

    /// Organization slug.
    pub fn slug(&self) -> Option<&str> {
        self.resource.attr_str("slug")
    }

    /// The owning group, when attached.
    pub fn group(&self) -> Option<Arc<Group>> {
        self.ctx.group()
    }

    /// Id of the owning group, from the attached group or the `group` relationship.
    pub fn group_id(&self) -> Option<String> {
        self.ctx
            .group()
            .map(|g| g.id().to_string())
            .or_else(|| self.resource.related_id("group").map(String::from))
            .or_else(|| self.resource.attr_str("group_id").map(String::from))
    }

    /// Projects in this organization, fetched once.
    pub async fn projects(self: &Arc<Self>) -> SnykResult<EntityList<Project>> {
        self.projects
            .get_or_fetch(|| self.resolve_projects(QueryParams::new(), ConstructOptions::default()))
            .await
    }

    /// Refetches projects with extra query parameters and replaces the cache.
    pub async fn fetch_projects(
        self: &Arc<Self>,
        params: QueryParams,
    ) -> SnykResult<EntityList<Project>> {
        let projects = self
            .resolve_projects(params, ConstructOptions::default())
            .await?;
        Ok(self.projects.replace(projects).await)
    }

    async fn resolve_projects(
        self: &Arc<Self>,
        params: QueryParams,
        options: ConstructOptions,
    ) -> SnykResult<Vec<Arc<Project>>> {
        let client = self.ctx.client();
        let paginator = client.paginate(
            format!("/rest/orgs/{}/projects", self.id()),
            list_params(client, &params),
        );
        let ctx = self.ctx.with_organization(self);
        resolve_many(client, paginator, |_| ctx.clone(), options).await
    }

    /// Organization-scoped issues, fetched once.
    pub async fn issues(self: &Arc<Self>) -> SnykResult<EntityList<Issue>> {
        self.issues
            .get_or_fetch(|| self.resolve_issues(QueryParams::new()))
            .await
    }

    /// Refetches issues with filters and replaces the cache.
    pub async fn fetch_issues(
        self: &Arc<Self>,
        params: QueryParams,
    ) -> SnykResult<EntityList<Issue>> {
        let issues = self.resolve_issues(params).await?;
        Ok(self.issues.replace(issues).await)
    }

    async fn resolve_issues(self: &Arc<Self>, params: QueryParams) -> SnykResult<Vec<Arc<Issue>>> {
        let client = self.ctx.client();
        debug!(org_id = self.id(), params = ?params, "Fetching issues");
        let paginator = client.paginate(
            format!("/rest/orgs/{}/issues", self.id()),
            list_params(client, &params),
        );
        let ctx = self.ctx.with_organization(self);
        resolve_many(client, paginator, |_| ctx.clone(), ConstructOptions::default()).await
    }

    /// Policies of this organization, fetched once.
    pub async fn policies(self: &Arc<Self>) -> SnykResult<EntityList<Policy>> {
        self.policies
            .get_or_fetch(|| self.resolve_policies(QueryParams::new()))
            .await
    }

    /// Refetches policies with extra query parameters and replaces the cache.
    pub async fn fetch_policies(
        self: &Arc<Self>,
        params: QueryParams,
    ) -> SnykResult<EntityList<Policy>> {
        let policies = self.resolve_policies(params).await?;
        Ok(self.policies.replace(policies).await)
    }

    async fn resolve_policies(
        self: &Arc<Self>,
        params: QueryParams,
    ) -> SnykResult<Vec<Arc<Policy>>> {
        let client = self.ctx.client();
        let paginator = client.paginate(
            format!("/rest/orgs/{}/policies", self.id()),
            list_params(client, &params),
        );
        let ctx = self.ctx.with_organization(self);
        resolve_many(client, paginator, |_| ctx.clone(), ConstructOptions::default()).await
    }

    /// A single project of this organization. `None` when the response has no data.
    pub async fn get_project(
        self: &Arc<Self>,
        project_id: &str,
    ) -> SnykResult<Option<Arc<Project>>> {
        self.fetch_project(project_id, ConstructOptions::default()).await
    }

    pub(crate) async fn fetch_project(
        self: &Arc<Self>,
        project_id: &str,
        options: ConstructOptions,
    ) -> SnykResult<Option<Arc<Project>>> {
        let client = self.ctx.client();
        let mut body = client
            .get(
                &format!("/rest/orgs/{}/projects/{}", self.id(), project_id),
                &client.version_params(),
            )
            .await?
            .json_value()?;

        match body.get_mut("data").map(Value::take) {
            Some(data) if data.is_object() => {
                let ctx = self.ctx.with_organization(self);
                let project = construct::<Project>(data, ctx, options).await?;
                Ok(Some(project))
            }
            _ => {
                warn!(org_id = self.id(), project_id, "No data found for project");
                Ok(None)
            }
        }
    }

    /// Issues affecting one package version. Not cached.
    pub async fn fetch_issues_for_purl(
        self: &Arc<Self>,
        purl: &PackageUrl,
        params: QueryParams,
    ) -> SnykResult<Vec<Arc<Issue>>> {
        let client = self.ctx.client();
        let endpoint = format!("/rest/orgs/{}/packages/{}/issues", self.id(), purl);
        debug!(org_id = self.id(), purl = %purl.canonical(), "Fetching issues for package");
        let paginator = client.paginate(endpoint, list_params(client, &params));
        let ctx = self.ctx.with_organization(self);
        resolve_many(client, paginator, |_| ctx.clone(), ConstructOptions::default()).await
    }
}
