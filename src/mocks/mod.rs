//! JSON:API fixture builders for testing code that talks to Snyk.
//!
//! These only build payloads; serve them from any HTTP mock.

use serde_json::{json, Map, Value};

/// Builder for a single resource object.
#[derive(Debug, Clone)]
pub struct ResourceBuilder {
    id: String,
    kind: String,
    attributes: Option<Map<String, Value>>,
    relationships: Map<String, Value>,
}

impl ResourceBuilder {
    /// Starts a resource with an empty attribute bag.
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            attributes: Some(Map::new()),
            relationships: Map::new(),
        }
    }

    /// A summary payload: id and type only, no attributes.
    pub fn summary(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            attributes: None,
            ..Self::new(kind, id)
        }
    }

    /// Sets an attribute.
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Sets `attributes.name`.
    pub fn name(self, name: &str) -> Self {
        self.attr("name", name)
    }

    /// Adds a relationship pointing at one resource.
    pub fn relates_to(mut self, name: &str, kind: &str, id: &str) -> Self {
        let entry = self
            .relationships
            .entry(name.to_string())
            .or_insert_with(|| json!({}));
        entry["data"] = json!({"id": id, "type": kind});
        self
    }

    /// Adds a `links.related` URL to a relationship.
    pub fn related_link(mut self, name: &str, link: &str) -> Self {
        let entry = self
            .relationships
            .entry(name.to_string())
            .or_insert_with(|| json!({}));
        entry["links"] = json!({"related": link});
        self
    }

    /// Builds the resource object.
    pub fn build(self) -> Value {
        let mut obj = Map::new();
        obj.insert("id".into(), Value::String(self.id));
        obj.insert("type".into(), Value::String(self.kind));
        if let Some(attributes) = self.attributes {
            obj.insert("attributes".into(), Value::Object(attributes));
        }
        if !self.relationships.is_empty() {
            obj.insert("relationships".into(), Value::Object(self.relationships));
        }
        Value::Object(obj)
    }
}

/// A group resource.
pub fn group(id: &str, name: &str) -> Value {
    ResourceBuilder::new("group", id).name(name).build()
}

/// An organization resource.
pub fn organization(id: &str, name: &str) -> Value {
    ResourceBuilder::new("org", id)
        .name(name)
        .attr("slug", name.to_lowercase().replace(' ', "-"))
        .build()
}

/// A project resource linked to its organization.
pub fn project(id: &str, org_id: &str, name: &str) -> Value {
    ResourceBuilder::new("project", id)
        .name(name)
        .attr("type", "npm")
        .attr("status", "active")
        .relates_to("organization", "org", org_id)
        .build()
}

/// An issue resource found in `project_id` of `org_id`.
pub fn issue(id: &str, org_id: &str, project_id: &str) -> Value {
    ResourceBuilder::new("issue", id)
        .attr("title", format!("Issue {}", id))
        .attr("status", "open")
        .attr("effective_severity_level", "high")
        .relates_to("organization", "organization", org_id)
        .relates_to("scan_item", "project", project_id)
        .build()
}

/// A list page. `next` becomes `links.next`.
pub fn page(data: Vec<Value>, next: Option<&str>) -> Value {
    let mut links = Map::new();
    if let Some(next) = next {
        links.insert("next".into(), Value::String(next.to_string()));
    }
    json!({
        "jsonapi": {"version": "1.0"},
        "data": data,
        "links": links,
    })
}

/// A single-resource document.
pub fn single(data: Value) -> Value {
    json!({
        "jsonapi": {"version": "1.0"},
        "data": data,
    })
}

/// A JSON:API error document.
pub fn error_document(status: u16, detail: &str) -> Value {
    json!({
        "jsonapi": {"version": "1.0"},
        "errors": [{"status": status.to_string(), "detail": detail}],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{is_summary, Resource};

    #[test]
    fn test_builders_parse_as_resources() {
        let project = Resource::from_value(&project("p1", "o1", "api")).unwrap();
        assert_eq!(project.related_id("organization"), Some("o1"));
        assert_eq!(project.attr_str("name"), Some("api"));

        let summary = ResourceBuilder::summary("org", "o1").build();
        assert!(is_summary(&summary));
        assert!(!is_summary(&organization("o1", "Eng")));
    }

    #[test]
    fn test_relationship_link_and_data_merge() {
        let asset = ResourceBuilder::new("repository", "a1")
            .relates_to("projects", "project", "p1")
            .related_link("projects", "/closed-beta/assets/a1/projects")
            .build();
        let rel = &asset["relationships"]["projects"];
        assert_eq!(rel["data"]["id"], "p1");
        assert_eq!(rel["links"]["related"], "/closed-beta/assets/a1/projects");
    }

    #[test]
    fn test_page_links() {
        assert!(page(vec![], None)["links"].get("next").is_none());
        assert_eq!(page(vec![], Some("/next"))["links"]["next"], "/next");
    }
}
