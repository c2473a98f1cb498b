//! Core data types for the Snyk REST API.
//!
//! Parsing here is pure: no I/O, no context. Entities are built on top of
//! these values by the resolver.

use crate::errors::{SnykError, SnykErrorKind, SnykResult};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Pointer to a related resource, never the resource itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipRef {
    /// `data.id`, when the relationship names a single resource.
    pub foreign_id: Option<String>,
    /// `data.type`.
    pub foreign_type: Option<String>,
    /// `links.related`.
    pub related_link: Option<String>,
}

impl RelationshipRef {
    /// Parses one entry of a `relationships` object.
    ///
    /// Array-valued `data` is not a single pointer and leaves the id unset.
    pub fn from_value(value: &Value) -> Self {
        let data = value.get("data").and_then(Value::as_object);
        let related_link = value
            .get("links")
            .and_then(|l| l.get("related"))
            .and_then(|r| match r {
                Value::String(s) => Some(s.clone()),
                Value::Object(o) => o.get("href").and_then(Value::as_str).map(String::from),
                _ => None,
            });

        Self {
            foreign_id: data
                .and_then(|d| d.get("id"))
                .and_then(Value::as_str)
                .map(String::from),
            foreign_type: data
                .and_then(|d| d.get("type"))
                .and_then(Value::as_str)
                .map(String::from),
            related_link,
        }
    }
}

/// A raw JSON:API resource object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource id.
    pub id: String,
    /// Type discriminator (`org`, `project`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Attribute bag.
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Relationship pointers by name.
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipRef>,
}

impl Resource {
    /// Parses a resource object.
    ///
    /// Missing `attributes` or `relationships` become empty; a missing id
    /// or type, or an attribute bag that is not an object, is rejected.
    pub fn from_value(value: &Value) -> SnykResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| SnykError::invalid_payload("Resource payload is not an object"))?;

        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SnykError::invalid_payload("Resource payload has no id"))?
            .to_string();

        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SnykError::invalid_payload(format!("Resource {} has no type", id))
            })?
            .to_string();

        let attributes = match obj.get("attributes") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(SnykError::invalid_payload(format!(
                    "Resource {} has non-object attributes",
                    id
                )))
            }
        };

        let relationships = obj
            .get("relationships")
            .and_then(Value::as_object)
            .map(|rels| {
                rels.iter()
                    .map(|(name, rel)| (name.clone(), RelationshipRef::from_value(rel)))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            id,
            kind,
            attributes,
            relationships,
        })
    }

    /// Gets an attribute.
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Gets a string attribute.
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Fails unless `key` holds a string.
    pub fn require_str(&self, key: &str) -> SnykResult<&str> {
        self.attr_str(key).ok_or_else(|| {
            SnykError::invalid_payload(format!(
                "{} {} is missing required attribute '{}'",
                self.kind, self.id, key
            ))
        })
    }

    /// Gets a relationship pointer.
    pub fn relationship(&self, name: &str) -> Option<&RelationshipRef> {
        self.relationships.get(name)
    }

    /// Id of the resource a relationship points to.
    pub fn related_id(&self, name: &str) -> Option<&str> {
        self.relationship(name)
            .and_then(|r| r.foreign_id.as_deref())
    }
}

/// True when a payload carries no `attributes` and needs hydration.
pub fn is_summary(payload: &Value) -> bool {
    payload.get("attributes").is_none()
}

/// Id of a raw payload, if any, for log lines.
pub fn payload_id(payload: &Value) -> &str {
    payload.get("id").and_then(Value::as_str).unwrap_or("<unknown>")
}

/// Unreserved characters stay as they are, everything else is escaped.
const PURL_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// A package URL (`pkg:type/namespace/name@version?qualifiers#subpath`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageUrl {
    /// Package type (`npm`, `maven`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Namespace, such as a Maven group id.
    pub namespace: Option<String>,
    /// Package name.
    pub name: String,
    /// Package version.
    pub version: String,
    /// Qualifiers in order.
    #[serde(default)]
    pub qualifiers: Vec<(String, String)>,
    /// Subpath within the package.
    pub subpath: Option<String>,
}

impl PackageUrl {
    /// Creates a purl without namespace, qualifiers or subpath.
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: None,
            name: name.into(),
            version: version.into(),
            qualifiers: Vec::new(),
            subpath: None,
        }
    }

    /// Sets the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Adds a qualifier.
    pub fn with_qualifier(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.qualifiers.push((key.into(), value.into()));
        self
    }

    /// Sets the subpath.
    pub fn with_subpath(mut self, subpath: impl Into<String>) -> Self {
        self.subpath = Some(subpath.into());
        self
    }

    /// Unencoded form.
    pub fn canonical(&self) -> String {
        let mut purl = match &self.namespace {
            Some(ns) => format!("pkg:{}/{}/{}@{}", self.kind, ns, self.name, self.version),
            None => format!("pkg:{}/{}@{}", self.kind, self.name, self.version),
        };
        if !self.qualifiers.is_empty() {
            let qualifiers: Vec<String> = self
                .qualifiers
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            purl.push('?');
            purl.push_str(&qualifiers.join("&"));
        }
        if let Some(subpath) = &self.subpath {
            purl.push('#');
            purl.push_str(subpath);
        }
        purl
    }

    /// Parses a purl, percent-encoded or not.
    pub fn parse(input: &str) -> SnykResult<Self> {
        let decoded = percent_decode_str(input.trim())
            .decode_utf8()
            .map_err(|e| invalid_purl(input, &e.to_string()))?;

        let rest = decoded
            .strip_prefix("pkg:")
            .ok_or_else(|| invalid_purl(input, "missing 'pkg:' scheme"))?;

        let (rest, subpath) = match rest.split_once('#') {
            Some((head, sub)) => (head, Some(sub.to_string())),
            None => (rest, None),
        };

        let (rest, qualifiers) = match rest.split_once('?') {
            Some((head, query)) => {
                let pairs = query
                    .split('&')
                    .filter(|p| !p.is_empty())
                    .map(|p| match p.split_once('=') {
                        Some((k, v)) => (k.to_string(), v.to_string()),
                        None => (p.to_string(), String::new()),
                    })
                    .collect();
                (head, pairs)
            }
            None => (rest, Vec::new()),
        };

        let (path, version) = rest
            .rsplit_once('@')
            .ok_or_else(|| invalid_purl(input, "missing version"))?;

        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() < 2 {
            return Err(invalid_purl(input, "expected type/name"));
        }
        let kind = segments.remove(0).to_string();
        let name = segments.pop().unwrap_or_default().to_string();
        let namespace = (!segments.is_empty()).then(|| segments.join("/"));

        if version.is_empty() {
            return Err(invalid_purl(input, "empty version"));
        }

        Ok(Self {
            kind,
            namespace,
            name,
            version: version.to_string(),
            qualifiers,
            subpath,
        })
    }
}

/// Fully percent-encoded, ready to be used as a single path segment.
impl fmt::Display for PackageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", utf8_percent_encode(&self.canonical(), PURL_SET))
    }
}

fn invalid_purl(input: &str, reason: &str) -> SnykError {
    SnykError::new(
        SnykErrorKind::InvalidParameter,
        format!("Invalid package URL '{}': {}", input, reason),
    )
}
