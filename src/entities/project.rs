//! Snyk Project.

use super::{list_params, EntityList, Issue, Organization};
use crate::errors::{SnykError, SnykErrorKind, SnykResult};
use crate::pagination::QueryParams;
use crate::resolver::{resolve_many, ConstructOptions, ConstructToken, Context, Entity, Relation};
use crate::types::Resource;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// A Snyk Project.
#[derive(Debug)]
pub struct Project {
    resource: Resource,
    ctx: Context,
    issues: Relation<Issue>,
}

#[async_trait]
impl Entity for Project {
    const KIND: &'static str = "project";

    fn single_endpoint(id: &str, ctx: &Context) -> SnykResult<String> {
        let org = ctx.organization().ok_or_else(|| {
            SnykError::new(
                SnykErrorKind::InvalidParameter,
                format!("Project {} needs an organization context to be fetched", id),
            )
        })?;
        Ok(format!("/rest/orgs/{}/projects/{}", org.id(), id))
    }

    fn validate(resource: &Resource) -> SnykResult<()> {
        resource.require_str("name").map(|_| ())
    }

    fn from_parts(resource: Resource, ctx: Context, _token: ConstructToken) -> Self {
        Self {
            resource,
            ctx,
            issues: Relation::new(),
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
        this.issues
            .get_or_fetch(|| this.resolve_issues(QueryParams::new(), options))
            .await?;
        Ok(())
    }
}

impl Project {
    /// Project name.
    pub fn name(&self) -> &str {
        self.resource.attr_str("name").unwrap_or_default()
    }

    /// Project type (`sast`, `npm`, `maven`, ...).
    pub fn project_type(&self) -> Option<&str> {
        self.resource.attr_str("type")
    }

    /// Where the project was imported from.
    pub fn origin(&self) -> Option<&str> {
        self.resource.attr_str("origin")
    }

    /// Project status.
    pub fn status(&self) -> Option<&str> {
        self.resource.attr_str("status")
    }

    /// Branch or other target reference.
    pub fn target_reference(&self) -> Option<&str> {
        self.resource.attr_str("target_reference")
    }

    /// Id of the project's target.
    pub fn target_id(&self) -> Option<&str> {
        self.resource.related_id("target")
    }

    /// The owning organization, when attached.
    pub fn organization(&self) -> Option<Arc<Organization>> {
        self.ctx.organization()
    }

    /// Id of the owning organization.
    pub fn organization_id(&self) -> Option<String> {
        self.ctx
            .organization()
            .map(|o| o.id().to_string())
            .or_else(|| self.resource.related_id("organization").map(String::from))
    }

    /// Issues found in this project, fetched once.
    pub async fn issues(self: &Arc<Self>) -> SnykResult<EntityList<Issue>> {
        self.issues
            .get_or_fetch(|| self.resolve_issues(QueryParams::new(), ConstructOptions::default()))
            .await
    }

    /// Refetches issues with filters and replaces the cache.
    pub async fn fetch_issues(
        self: &Arc<Self>,
        params: QueryParams,
    ) -> SnykResult<EntityList<Issue>> {
        let issues = self
            .resolve_issues(params, ConstructOptions::default())
            .await?;
        Ok(self.issues.replace(issues).await)
    }

    async fn resolve_issues(
        self: &Arc<Self>,
        params: QueryParams,
        options: ConstructOptions,
    ) -> SnykResult<Vec<Arc<Issue>>> {
        let Some(org_id) = self.organization_id() else {
            warn!(project_id = self.id(), "Project has no organization, cannot fetch issues");
            return Ok(Vec::new());
        };

        let client = self.ctx.client();
        let filters = QueryParams::new()
            .with("scan_item.id", self.id())
            .with("scan_item.type", "project")
            .merge(&params);
        let paginator = client.paginate(
            format!("/rest/orgs/{}/issues", org_id),
            list_params(client, &filters),
        );

        let ctx = self.ctx.with_project(self);
        let issues = resolve_many(client, paginator, |_| ctx.clone(), options).await?;
        info!(project_id = self.id(), count = issues.len(), "Fetched project issues");
        Ok(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_endpoint_needs_organization() {
        let client = Arc::new(crate::SnykClient::builder().token("t").build().unwrap());
        let err = Project::single_endpoint("p1", &Context::new(client)).unwrap_err();
        assert_eq!(*err.kind(), SnykErrorKind::InvalidParameter);
    }

    #[test]
    fn test_validate() {
        let ok = Resource::from_value(&json!({
            "id": "p1",
            "type": "project",
            "attributes": {"name": "acme/api:package.json", "type": "npm"},
            "relationships": {"target": {"data": {"id": "t1", "type": "target"}}}
        }))
        .unwrap();
        assert!(Project::validate(&ok).is_ok());
        assert_eq!(ok.related_id("target"), Some("t1"));

        let bad = Resource::from_value(&json!({
            "id": "p2", "type": "project", "attributes": {"type": "npm"}
        }))
        .unwrap();
        assert!(Project::validate(&bad).is_err());
    }
}
