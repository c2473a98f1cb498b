//! Snyk Issue and its many-to-one link to a Project.

use super::{Organization, Project};
use crate::errors::{SnykError, SnykErrorKind, SnykResult};
use crate::resolver::{ConstructOptions, ConstructToken, Context, Entity};
use crate::types::{RelationshipRef, Resource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A Snyk Issue.
#[derive(Debug)]
pub struct Issue {
    resource: Resource,
    ctx: Context,
    project: Mutex<Option<Arc<Project>>>,
}

#[async_trait]
impl Entity for Issue {
    const KIND: &'static str = "issue";

    fn single_endpoint(id: &str, ctx: &Context) -> SnykResult<String> {
        if let Some(org) = ctx.organization() {
            return Ok(format!("/rest/orgs/{}/issues/{}", org.id(), id));
        }
        if let Some(group) = ctx.group() {
            return Ok(format!("/rest/groups/{}/issues/{}", group.id(), id));
        }
        Err(SnykError::new(
            SnykErrorKind::InvalidParameter,
            format!("Issue {} needs an organization or group context to be fetched", id),
        ))
    }

    fn validate(resource: &Resource) -> SnykResult<()> {
        resource.require_str("title")?;
        resource.require_str("status")?;
        Ok(())
    }

    fn from_parts(resource: Resource, ctx: Context, _token: ConstructToken) -> Self {
        Self {
            resource,
            ctx,
            project: Mutex::new(None),
        }
    }

    fn resource(&self) -> &Resource {
        &self.resource
    }

    fn context(&self) -> &Context {
        &self.ctx
    }

    async fn load_relationships(this: Arc<Self>) -> SnykResult<()> {
        this.resolve_project(ConstructOptions::default().shallow())
            .await
            .map(|_| ())
    }
}

impl Issue {
    /// Issue title.
    pub fn title(&self) -> &str {
        self.resource.attr_str("title").unwrap_or_default()
    }

    /// Issue status (`open`, `resolved`).
    pub fn status(&self) -> &str {
        self.resource.attr_str("status").unwrap_or_default()
    }

    /// Issue type (`package_vulnerability`, `code`, ...).
    pub fn issue_type(&self) -> Option<&str> {
        self.resource.attr_str("type")
    }

    /// Severity after policies are applied.
    pub fn effective_severity_level(&self) -> Option<&str> {
        self.resource.attr_str("effective_severity_level")
    }

    /// Stable issue key.
    pub fn key(&self) -> Option<&str> {
        self.resource.attr_str("key")
    }

    /// Creation time, if present and well formed.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.resource
            .attr_str("created_at")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// The `scan_item` relationship stub.
    pub fn scan_item(&self) -> Option<&RelationshipRef> {
        self.resource.relationship("scan_item")
    }

    /// Id of the owning organization, from the attached organization or the
    /// `organization` relationship.
    pub fn organization_id(&self) -> Option<String> {
        self.ctx
            .organization()
            .map(|o| o.id().to_string())
            .or_else(|| self.resource.related_id("organization").map(String::from))
    }

    fn scan_item_project_id(&self) -> Option<&str> {
        self.scan_item()
            .filter(|r| r.foreign_type.as_deref() == Some("project"))
            .and_then(|r| r.foreign_id.as_deref())
    }

    /// The project this issue was found in.
    ///
    /// Uses the attached project when there is one. Otherwise the project is
    /// fetched through an organization: the attached one, or the one named
    /// by the `organization` relationship if the owning group already has it
    /// cached. Without any organization this logs a warning and returns
    /// `Ok(None)`.
    pub async fn project(&self) -> SnykResult<Option<Arc<Project>>> {
        self.resolve_project(ConstructOptions::default()).await
    }

    async fn resolve_project(&self, options: ConstructOptions) -> SnykResult<Option<Arc<Project>>> {
        if let Some(project) = self.ctx.project() {
            return Ok(Some(project));
        }

        let mut cached = self.project.lock().await;
        if let Some(project) = cached.as_ref() {
            return Ok(Some(project.clone()));
        }

        let Some(project_id) = self.scan_item_project_id() else {
            warn!(issue_id = self.id(), "Issue has no project in its scan_item relationship");
            return Ok(None);
        };

        let Some(org) = self.organization_context() else {
            warn!(
                issue_id = self.id(),
                project_id,
                "No organization context to fetch project"
            );
            return Ok(None);
        };

        debug!(issue_id = self.id(), project_id, org_id = org.id(), "Fetching project for issue");
        let project = org.fetch_project(project_id, options).await?;
        if project.is_some() {
            *cached = project.clone();
        }
        Ok(project)
    }

    fn organization_context(&self) -> Option<Arc<Organization>> {
        if let Some(org) = self.ctx.organization() {
            return Some(org);
        }
        let org_id = self.resource.related_id("organization")?;
        self.ctx.group()?.cached_organization(org_id)
    }
}
