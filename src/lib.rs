//! # Snyk Integration Library
//!
//! An async client for the Snyk JSON:API REST endpoints with:
//! - Connection-level retry with exponential backoff
//! - A shared rate-limit cooldown honouring `Retry-After`
//! - Cursor pagination over `links.next`
//! - A bounded task dispatcher for concurrent entity construction
//! - Lazy or eager relationship resolution between Groups, Organizations,
//!   Projects, Issues, Assets and Policies
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_snyk::{Entity, Group, SnykClient, SnykConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SnykConfig::builder().token("snyk-token").build()?;
//!     let client = Arc::new(SnykClient::new(config)?);
//!
//!     let group = Group::discover(client.clone(), None).await?;
//!     for org in group.organizations().await?.iter() {
//!         let projects = org.projects().await?;
//!         println!("{}: {} projects", org.name(), projects.len());
//!     }
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Authentication
pub mod auth;

// HTTP client and transport
pub mod client;
pub mod resilience;

// Pagination handling
pub mod pagination;

// Concurrency
pub mod dispatch;

// Entities and relationship resolution
pub mod entities;
pub mod resolver;

// Observability
pub mod observability;

// Fixtures for testing
pub mod mocks;

// Re-exports for convenience
pub use auth::{AuthManager, AuthMethod};
pub use client::{ApiResponse, SnykClient, SnykClientBuilder};
pub use config::{LoadingStrategy, LoadingStrategyHandle, SnykConfig, SnykConfigBuilder};
pub use dispatch::{TaskBatch, TaskDispatcher, TaskHandle};
pub use entities::{Asset, EntityList, Group, Issue, Organization, Policy, Project};
pub use errors::{SnykError, SnykErrorKind, SnykResult};
pub use pagination::{Paginator, QueryParams};
pub use resolver::{construct, ConstructOptions, ConstructToken, Context, Entity};
pub use types::{PackageUrl, RelationshipRef, Resource};
