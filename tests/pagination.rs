//! Cursor pagination against a mock Snyk API.

mod common;

use common::*;
use futures::StreamExt;
use integrations_snyk::mocks;
use integrations_snyk::{QueryParams, SnykErrorKind};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tracing::Level;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ids(items: &[Value]) -> Vec<&str> {
    items.iter().map(|v| v["id"].as_str().unwrap()).collect()
}

#[tokio::test]
async fn test_next_link_is_followed_verbatim() {
    let server = MockServer::start().await;
    let next = "/rest/orgs/o1/projects?version=2024-10-15&starting_after=abc&limit=10";

    Mock::given(method("GET"))
        .and(path("/rest/orgs/o1/projects"))
        .and(query_param("origin", "github"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mocks::page(
            vec![mocks::project("p1", "o1", "one"), mocks::project("p2", "o1", "two")],
            Some(next),
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/orgs/o1/projects"))
        .and(query_param("starting_after", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mocks::page(
            vec![mocks::project("p3", "o1", "three")],
            None,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let params = client.list_params().with("origin", "github");
    let items = client
        .paginate("/rest/orgs/o1/projects", params)
        .data_key("data")
        .collect_all()
        .await
        .unwrap();
    assert_eq!(ids(&items), vec!["p1", "p2", "p3"]);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].url.query(),
        Some("version=2024-10-15&limit=100&origin=github")
    );
    assert_eq!(
        requests[1].url.query(),
        Some("version=2024-10-15&starting_after=abc&limit=10")
    );
}

#[tokio::test]
async fn test_absolute_next_link() {
    let server = MockServer::start().await;
    let next = format!("{}/rest/groups?starting_after=g1", server.uri());

    Mock::given(method("GET"))
        .and(path("/rest/groups"))
        .and(query_param("starting_after", "g1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mocks::page(
            vec![mocks::group("g2", "Two")],
            None,
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mocks::page(
            vec![mocks::group("g1", "One")],
            Some(&next),
        )))
        .mount(&server)
        .await;

    let client = client(&server);
    let mut paginator = client.paginate("/rest/groups", QueryParams::new()).data_key("data");
    let mut seen = Vec::new();
    while let Some(item) = paginator.next_item().await.unwrap() {
        seen.push(item["id"].as_str().unwrap().to_string());
    }
    assert_eq!(seen, vec!["g1", "g2"]);
    assert_eq!(paginator.pages_fetched(), 2);
}

#[tokio::test]
async fn test_first_page_error_propagates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/orgs/o1/issues"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(mocks::error_document(403, "forbidden")),
        )
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client
        .paginate("/rest/orgs/o1/issues", QueryParams::new())
        .data_key("data")
        .collect_all()
        .await
        .unwrap_err();
    assert_eq!(*err.kind(), SnykErrorKind::Forbidden);
}

#[tokio::test]
async fn test_later_page_error_keeps_earlier_items() {
    let (logs, _guard) = LogCapture::install();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/orgs/o1/issues"))
        .and(query_param("starting_after", "x"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/orgs/o1/issues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mocks::page(
            vec![mocks::issue("i1", "o1", "p1")],
            Some("/rest/orgs/o1/issues?starting_after=x"),
        )))
        .mount(&server)
        .await;

    let client = client(&server);
    let items = client
        .paginate("/rest/orgs/o1/issues", QueryParams::new())
        .data_key("data")
        .collect_all()
        .await
        .unwrap();

    assert_eq!(ids(&items), vec!["i1"]);
    assert_eq!(logs.count(Level::ERROR), 1);
}

#[tokio::test]
async fn test_missing_data_key_stops() {
    let (logs, _guard) = LogCapture::install();
    let server = MockServer::start().await;
    mount_get_times(
        &server,
        "/rest/orgs/o1/policies",
        json!({"links": {"next": "/rest/orgs/o1/policies?page=2"}}),
        1,
    )
    .await;

    let client = client(&server);
    let items = client
        .paginate("/rest/orgs/o1/policies", QueryParams::new())
        .data_key("data")
        .collect_all()
        .await
        .unwrap();

    assert!(items.is_empty());
    assert_eq!(logs.count(Level::WARN), 1);
}

#[tokio::test]
async fn test_non_array_data_is_one_item() {
    let server = MockServer::start().await;
    mount_get(&server, "/rest/orgs/o1", mocks::single(mocks::organization("o1", "Eng"))).await;

    let client = client(&server);
    let items = client
        .paginate("/rest/orgs/o1", QueryParams::new())
        .data_key("data")
        .collect_all()
        .await
        .unwrap();
    assert_eq!(ids(&items), vec!["o1"]);
}

#[tokio::test]
async fn test_malformed_json_ends_sequence() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;

    let client = client(&server);
    let items = client
        .paginate("/rest/groups", QueryParams::new())
        .data_key("data")
        .collect_all()
        .await
        .unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn test_max_pages_and_whole_page_mode() {
    let server = MockServer::start().await;
    mount_get_times(
        &server,
        "/rest/groups",
        mocks::page(vec![mocks::group("g1", "One")], Some("/rest/groups?starting_after=g1")),
        1,
    )
    .await;

    let client = client(&server);
    let pages: Vec<_> = client
        .paginate("/rest/groups", QueryParams::new())
        .max_pages(1)
        .into_stream()
        .collect()
        .await;

    assert_eq!(pages.len(), 1);
    let page = pages.into_iter().next().unwrap().unwrap();
    assert_eq!(page["data"][0]["id"], "g1");
}
