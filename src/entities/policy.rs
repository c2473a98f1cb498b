//! Snyk organization policy. A leaf entity.

use crate::errors::{SnykError, SnykErrorKind, SnykResult};
use crate::resolver::{ConstructToken, Context, Entity};
use crate::types::Resource;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// An organization policy, such as an ignore rule.
#[derive(Debug)]
pub struct Policy {
    resource: Resource,
    ctx: Context,
}

impl Entity for Policy {
    const KIND: &'static str = "policy";

    fn single_endpoint(id: &str, ctx: &Context) -> SnykResult<String> {
        let org = ctx.organization().ok_or_else(|| {
            SnykError::new(
                SnykErrorKind::InvalidParameter,
                format!("Policy {} needs an organization context to be fetched", id),
            )
        })?;
        Ok(format!("/rest/orgs/{}/policies/{}", org.id(), id))
    }

    fn validate(_resource: &Resource) -> SnykResult<()> {
        Ok(())
    }

    fn from_parts(resource: Resource, ctx: Context, _token: ConstructToken) -> Self {
        Self { resource, ctx }
    }

    fn resource(&self) -> &Resource {
        &self.resource
    }

    fn context(&self) -> &Context {
        &self.ctx
    }
}

impl Policy {
    /// Policy name.
    pub fn name(&self) -> Option<&str> {
        self.resource.attr_str("name")
    }

    /// Action taken when the policy matches (`ignore`).
    pub fn action_type(&self) -> Option<&str> {
        self.resource.attr_str("action_type")
    }

    fn action_data(&self, key: &str) -> Option<&Value> {
        self.resource.attr("action")?.get("data")?.get(key)
    }

    /// Ignore type, for ignore policies (`not-vulnerable`, `wont-fix`, ...).
    pub fn ignore_type(&self) -> Option<&str> {
        self.action_data("ignore_type").and_then(Value::as_str)
    }

    /// Reason recorded with the action.
    pub fn reason(&self) -> Option<&str> {
        self.action_data("reason").and_then(Value::as_str)
    }

    /// When an ignore expires.
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.action_data("expires")
            .and_then(Value::as_str)
            .and_then(parse_time)
    }

    /// Creation time.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.resource.attr_str("created_at").and_then(parse_time)
    }

    /// Last update time.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.resource.attr_str("updated_at").and_then(parse_time)
    }

    /// Name of the user who created the policy.
    pub fn created_by_name(&self) -> Option<&str> {
        self.resource
            .attr("created_by")?
            .get("name")
            .and_then(Value::as_str)
    }

    /// Raw `conditions_group` attribute.
    pub fn conditions_group(&self) -> Option<&Value> {
        self.resource.attr("conditions_group")
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SnykClient;
    use crate::resolver::assemble;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_ignore_policy_accessors() {
        let client = Arc::new(SnykClient::builder().token("t").build().unwrap());
        let resource = Resource::from_value(&json!({
            "id": "pol1",
            "type": "policy",
            "attributes": {
                "name": "Ignore test fixtures",
                "action_type": "ignore",
                "action": {"data": {
                    "ignore_type": "wont-fix",
                    "reason": "fixture code",
                    "expires": "2025-01-01T00:00:00Z"
                }},
                "created_by": {"name": "Sam", "email": "sam@example.com"},
                "conditions_group": {"logical_operator": "and", "conditions": []}
            }
        }))
        .unwrap();
        assert!(Policy::validate(&resource).is_ok());

        let policy: Policy = assemble(resource, Context::new(client));
        assert_eq!(policy.name(), Some("Ignore test fixtures"));
        assert_eq!(policy.action_type(), Some("ignore"));
        assert_eq!(policy.ignore_type(), Some("wont-fix"));
        assert_eq!(policy.reason(), Some("fixture code"));
        assert_eq!(policy.expires().unwrap().timestamp(), 1_735_689_600);
        assert_eq!(policy.created_by_name(), Some("Sam"));
        assert!(policy.conditions_group().is_some());
        assert!(policy.created_at().is_none());
    }
}
