//! Asset inventory and package lookups against a mock Snyk API.

mod common;

use common::*;
use integrations_snyk::mocks::{self, ResourceBuilder};
use integrations_snyk::{
    construct, ConstructOptions, Context, Entity, Group, Organization, PackageUrl, QueryParams,
    SnykErrorKind,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROJECTS_LINK: &str = "/closed-beta/groups/g1/assets/a1/relationships/projects";

fn repository_asset(id: &str, sources: serde_json::Value) -> serde_json::Value {
    ResourceBuilder::new("repository", id)
        .name("acme/payments-api")
        .attr("sources", sources)
        .attr("organizations", json!([{"id": "o1", "type": "org"}]))
        .attr("browse_url", "https://github.com/acme/payments-api")
        .attr("class", json!({"rank": 1}))
        .related_link("projects", PROJECTS_LINK)
        .build()
}

async fn discover(server: &MockServer) -> Arc<Group> {
    mount_get(server, "/rest/groups/g1", mocks::single(mocks::group("g1", "Acme"))).await;
    Group::discover(client(server), Some("g1")).await.unwrap()
}

#[tokio::test]
async fn test_search_assets_posts_query_then_follows_links() {
    let server = MockServer::start().await;
    let group = discover(&server).await;
    let query = json!({"query": {"attributes": {"operator": "and", "values": []}}});

    Mock::given(method("POST"))
        .and(path("/closed-beta/groups/g1/assets/search"))
        .and(header("Content-Type", "application/json"))
        .and(query_param("limit", "100"))
        .and(body_json(&query))
        .respond_with(ResponseTemplate::new(200).set_body_json(mocks::page(
            vec![repository_asset("a1", json!(["snyk"]))],
            Some("/closed-beta/groups/g1/assets/search?starting_after=a1"),
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/closed-beta/groups/g1/assets/search"))
        .and(query_param("starting_after", "a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mocks::page(
            vec![repository_asset("a2", json!(["github"]))],
            None,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let assets = group.search_assets(&query, QueryParams::new()).await.unwrap();
    assert_eq!(assets.len(), 2);
    assert!(Arc::ptr_eq(&assets, &group.assets().unwrap()));
}

#[tokio::test]
async fn test_search_assets_requires_query() {
    let server = MockServer::start().await;
    let group = discover(&server).await;

    let err = group
        .search_assets(&json!({}), QueryParams::new())
        .await
        .unwrap_err();
    assert_eq!(*err.kind(), SnykErrorKind::InvalidParameter);
    assert!(group.assets().is_none());
}

#[tokio::test]
async fn test_asset_organizations_and_projects() {
    let server = MockServer::start().await;
    let group = discover(&server).await;

    mount_get(
        &server,
        "/closed-beta/groups/g1/assets/a1",
        mocks::single(repository_asset("a1", json!(["github", "snyk"]))),
    )
    .await;
    let eng = mocks::single(mocks::organization("o1", "Eng"));
    mount_get_times(&server, "/rest/orgs/o1", eng, 1).await;
    mount_get_times(
        &server,
        PROJECTS_LINK,
        mocks::page(
            vec![
                mocks::project("p1", "o1", "payments-api:package.json"),
                mocks::project("p2", "o9", "payments-api:Dockerfile"),
            ],
            None,
        ),
        1,
    )
    .await;

    let asset = group.get_asset("a1").await.unwrap().unwrap();
    assert_eq!(asset.name(), "acme/payments-api");
    assert_eq!(
        asset.github_name_and_owner(),
        Some(("payments-api".to_string(), "acme".to_string()))
    );
    assert_eq!(asset.business_criticality(), Some("critical"));

    // Embedded summaries are hydrated through the single-organization endpoint.
    let orgs = asset.organizations().await.unwrap();
    assert_eq!(orgs.len(), 1);
    assert_eq!(orgs[0].name(), "Eng");
    assert_eq!(orgs[0].group().unwrap().id(), "g1");

    let projects = asset.projects().await.unwrap();
    assert_eq!(projects.len(), 2);
    for project in projects.iter() {
        match project.id() {
            "p1" => assert!(Arc::ptr_eq(&project.organization().unwrap(), &orgs[0])),
            _ => assert!(project.organization().is_none()),
        }
    }
    assert!(Arc::ptr_eq(&projects, &asset.projects().await.unwrap()));
}

#[tokio::test]
async fn test_asset_without_snyk_source_has_no_relationships() {
    let server = MockServer::start().await;
    let group = discover(&server).await;
    mount_get(
        &server,
        "/closed-beta/groups/g1/assets/a1",
        mocks::single(repository_asset("a1", json!(["github"]))),
    )
    .await;
    let eng = mocks::single(mocks::organization("o1", "Eng"));
    mount_get_times(&server, "/rest/orgs/o1", eng, 0).await;
    mount_get_times(&server, PROJECTS_LINK, mocks::page(vec![], None), 0).await;

    let asset = group.get_asset("a1").await.unwrap().unwrap();
    assert!(asset.organizations().await.unwrap().is_empty());
    assert!(asset.projects().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_get_asset_without_data_is_none() {
    let server = MockServer::start().await;
    let group = discover(&server).await;
    mount_get(&server, "/closed-beta/groups/g1/assets/gone", json!({"data": null})).await;

    assert!(group.get_asset("gone").await.unwrap().is_none());
}

#[tokio::test]
async fn test_issues_for_purl_use_encoded_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/orgs/o1/packages/pkg%3Anpm%2Flodash%404.17.20/issues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mocks::page(
            vec![mocks::issue("i1", "o1", "p1")],
            None,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let org = construct::<Organization>(
        mocks::organization("o1", "Eng"),
        Context::new(client),
        ConstructOptions::default(),
    )
    .await
    .unwrap();

    let purl = PackageUrl::new("npm", "lodash", "4.17.20");
    let issues = org.fetch_issues_for_purl(&purl, QueryParams::new()).await.unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].organization_id().as_deref(), Some("o1"));
}
