//! Transport behaviour against a mock Snyk API.

mod common;

use common::*;
use integrations_snyk::{LoadingStrategy, QueryParams, SnykErrorKind};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::{Duration, Instant};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_sends_auth_and_jsonapi_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/self"))
        .and(header("Authorization", "token test-token"))
        .and(header("Accept", "application/vnd.api+json"))
        .and(query_param("version", "2024-10-15"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": "u1"}})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let body = client
        .get("/rest/self", &client.version_params())
        .await
        .unwrap()
        .json_value()
        .unwrap();
    assert_eq!(body["data"]["id"], "u1");
}

#[tokio::test]
async fn test_get_retries_forcelisted_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/orgs/o1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/orgs/o1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": "o1"}})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let response = client.get("/rest/orgs/o1", &QueryParams::new()).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(client.metrics().snapshot().requests_retried, 2);
}

#[tokio::test]
async fn test_retry_budget_exhausted_returns_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/orgs/o1"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(4)
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client.get("/rest/orgs/o1", &QueryParams::new()).await.unwrap_err();
    assert_eq!(*err.kind(), SnykErrorKind::BadGateway);
    assert_eq!(err.status_code(), Some(502));
    assert_eq!(err.body(), Some("bad gateway"));
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_post_is_never_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/orgs/o1/things"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client
        .post("/rest/orgs/o1/things", &QueryParams::new(), &json!({"a": 1}))
        .await
        .unwrap_err();
    assert_eq!(*err.kind(), SnykErrorKind::ServiceUnavailable);
    assert_eq!(client.metrics().snapshot().requests_retried, 0);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/orgs/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client.get("/rest/orgs/missing", &QueryParams::new()).await.unwrap_err();
    assert_eq!(*err.kind(), SnykErrorKind::NotFound);
}

#[tokio::test]
async fn test_rate_limit_cooldown_blocks_next_caller() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/orgs/o1"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/orgs/o2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": "o2"}})))
        .mount(&server)
        .await;

    let client = client_with(&server, LoadingStrategy::Lazy, |b| b.no_retry());

    let err = client.get("/rest/orgs/o1", &QueryParams::new()).await.unwrap_err();
    assert_eq!(*err.kind(), SnykErrorKind::RateLimited);
    assert_eq!(err.retry_after(), Some(Duration::from_secs(1)));

    // A different request on another task still waits out the window.
    let started = Instant::now();
    let other = client.clone();
    let response =
        tokio::spawn(async move { other.get("/rest/orgs/o2", &QueryParams::new()).await })
            .await
            .unwrap()
            .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.status(), 200);
    assert!(elapsed >= Duration::from_millis(900), "waited only {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "waited {:?}", elapsed);

    let metrics = client.metrics().snapshot();
    assert_eq!(metrics.requests_rate_limited, 1);
    assert_eq!(metrics.cooldown_waits, 1);
}

#[tokio::test]
async fn test_rate_limited_get_is_retried_after_cooldown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/orgs/o1"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/orgs/o1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": "o1"}})))
        .mount(&server)
        .await;

    let client = client(&server);
    let started = Instant::now();
    let response = client.get("/rest/orgs/o1", &QueryParams::new()).await.unwrap();

    assert_eq!(response.status(), 200);
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert_eq!(client.metrics().snapshot().requests_rate_limited, 1);
}

#[tokio::test]
async fn test_connection_refused_is_connection_error() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let client = integrations_snyk::SnykClient::builder()
        .base_url(uri)
        .token(TOKEN)
        .no_retry()
        .build()
        .unwrap();
    let err = client.get("/rest/orgs", &QueryParams::new()).await.unwrap_err();
    assert!(err.is_connection_error(), "unexpected error {:?}", err);
}

#[tokio::test]
async fn test_close_twice_fails() {
    let server = MockServer::start().await;
    let client = client(&server);

    client.close().await.unwrap();
    let err = client.close().await.unwrap_err();
    assert_eq!(*err.kind(), SnykErrorKind::DispatcherClosed);

    let err = client.dispatcher().submit(async { Ok(1) }).err().unwrap();
    assert_eq!(*err.kind(), SnykErrorKind::DispatcherClosed);
}

#[tokio::test]
async fn test_oversized_retry_after_is_capped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/x"))
        .respond_with(
            ResponseTemplate::new(429).insert_header("Retry-After", "99999999999999999999"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/y"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;

    let client = client_with(&server, LoadingStrategy::Lazy, |b| {
        b.no_retry().max_cooldown(Duration::from_millis(300))
    });

    let first = client.clone();
    let err = tokio::spawn(async move { first.get("/rest/x", &QueryParams::new()).await })
        .await
        .expect("request task must not panic")
        .unwrap_err();
    assert_eq!(*err.kind(), SnykErrorKind::RateLimited);

    let started = Instant::now();
    let response = client.get("/rest/y", &QueryParams::new()).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.status(), 200);
    assert!(elapsed >= Duration::from_millis(250), "waited only {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "waited {:?}", elapsed);
}
