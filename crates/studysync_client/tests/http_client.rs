//! Tests for `ApiClient` against a local HTTP server.

use serde_json::json;
use studysync_client::{ApiClient, ApiKey, ClientConfig, ClientError, RemoteApi, RetryConfig};
use studysync_protocol::PageRequest;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn events_body(ids: &[&str], total: u64) -> serde_json::Value {
    let events: Vec<_> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "stored": "2024-03-01T12:00:00Z",
                "userId": "u1",
                "types": ["click"],
            })
        })
        .collect();
    json!({ "events": events, "total": total })
}

fn client_for(server: &MockServer, retries: u32) -> ApiClient {
    let config = ClientConfig::new(server.uri(), ApiKey::new("test-token"))
        .with_retry(RetryConfig::immediate(retries));
    tokio::task::block_in_place(|| ApiClient::connect(config)).expect("client")
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_page_sends_bearer_and_pagination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/studies/demo/events"))
        .and(header("authorization", "Bearer test-token"))
        .and(query_param("offset", "100"))
        .and(query_param("limit", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(events_body(&["e1", "e2"], 102)))
        .expect(1)
        .mount(&server)
        .await;

    let api = client_for(&server, 0);
    let page = tokio::task::spawn_blocking(move || {
        api.fetch_page("demo", &PageRequest::first(100).at_offset(100))
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(page.len(), 2);
    assert_eq!(page.total, Some(102));
    assert_eq!(page.events[0].user_id, "u1");
    assert!(page.is_last());
}

#[tokio::test(flavor = "multi_thread")]
async fn server_errors_are_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/studies/demo/events"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/studies/demo/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(events_body(&["e1"], 1)))
        .with_priority(2)
        .mount(&server)
        .await;

    let api = client_for(&server, 3);
    let (page, retries) = tokio::task::spawn_blocking(move || {
        let page = api.fetch_page("demo", &PageRequest::first(10));
        (page, api.retries())
    })
    .await
    .unwrap();

    assert_eq!(page.unwrap().len(), 1);
    assert_eq!(retries, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn unauthorized_is_reported_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
        .expect(1)
        .mount(&server)
        .await;

    let api = client_for(&server, 3);
    let result = tokio::task::spawn_blocking(move || api.fetch_page("demo", &PageRequest::first(10)))
        .await
        .unwrap();

    assert!(matches!(result, Err(ClientError::Unauthorized(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn list_studies_reads_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/studies"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "studies": [{"name": "alpha", "description": "first"}, "beta"]
        })))
        .mount(&server)
        .await;

    let api = client_for(&server, 0);
    let studies = tokio::task::spawn_blocking(move || api.list_studies())
        .await
        .unwrap()
        .unwrap();

    let names: Vec<_> = studies.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta"]);
    assert_eq!(studies[0].description.as_deref(), Some("first"));
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_server_is_transport_error() {
    // Bind then drop a server so the port is closed.
    let uri = {
        let server = MockServer::start().await;
        server.uri()
    };
    let config = ClientConfig::new(uri, ApiKey::new("test-token")).with_retry(RetryConfig::no_retry());
    let api = tokio::task::block_in_place(|| ApiClient::connect(config)).unwrap();

    let result = tokio::task::spawn_blocking(move || api.fetch_page("demo", &PageRequest::first(1)))
        .await
        .unwrap();

    match result {
        Err(err) => assert!(err.is_retryable()),
        Ok(_) => panic!("expected a transport error"),
    }
}
