//! Context-bound Snyk entities.
//!
//! Each entity wraps a [`Resource`](crate::types::Resource) and resolves its
//! relationships through the shared client. Lists are cached per parent:
//! `x()` fetches once, `fetch_x(params)` always refetches and replaces.

mod asset;
mod group;
mod issue;
mod organization;
mod policy;
mod project;

pub use asset::Asset;
pub use group::Group;
pub use issue::Issue;
pub use organization::Organization;
pub use policy::Policy;
pub use project::Project;

use crate::client::SnykClient;
use crate::pagination::QueryParams;
use std::sync::Arc;

/// A cached relationship list.
pub type EntityList<T> = Arc<Vec<Arc<T>>>;

/// List defaults with caller parameters applied on top.
pub(crate) fn list_params(client: &SnykClient, params: &QueryParams) -> QueryParams {
    client.list_params().merge(params)
}
