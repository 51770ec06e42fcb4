use assert_matches::assert_matches;
use core_test_support::GRAPHQL_PATH;
use core_test_support::REFRESH_PATH;
use core_test_support::config_for;
use core_test_support::graphql_data;
use core_test_support::graphql_errors;
use core_test_support::mount_graphql_fallback;
use core_test_support::refresh_success;
use core_test_support::signals_page;
use pretty_assertions::assert_eq;
use serde_json::json;
use signal_core::CircuitState;
use signal_core::Operation;
use signal_core::QueryError;
use signal_core::SignalClient;
use signal_core::TransportError;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_partial_json;
use wiremock::matchers::header;
use wiremock::matchers::method;
use wiremock::matchers::path;

const SIGNALS: &str = "query Signals($page: Int) { signals(page: $page) { nodes { id } totalCount currentPage totalPages hasNextPage } }";

fn signals() -> Operation {
    Operation::new(SIGNALS).with_operation_name("Signals")
}

#[tokio::test]
async fn expired_token_is_refreshed_and_request_retransmitted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GRAPHQL_PATH))
        .and(header("authorization", "Bearer fresh"))
        .and(header("cookie", "access_token=fresh"))
        .respond_with(graphql_data(signals_page(&[1, 2], 1, false)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_partial_json(json!({ "refreshToken": "refresh-1" })))
        .respond_with(refresh_success("fresh"))
        .expect(1)
        .mount(&server)
        .await;
    mount_graphql_fallback(&server, ResponseTemplate::new(401)).await;

    let client = SignalClient::from_config(config_for(&server)).expect("client");
    let data = client.query(&signals()).await.expect("data after refresh");

    assert_eq!(data["signals"]["nodes"], json!([{ "id": 1 }, { "id": 2 }]));
    let credentials = client.credentials().get().expect("credentials installed");
    assert_eq!(credentials.access_token, "fresh");
    assert_eq!(credentials.refresh_token.as_deref(), Some("refresh-2"));
}

#[tokio::test]
async fn rejected_refresh_expires_the_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": false })))
        .expect(1)
        .mount(&server)
        .await;
    mount_graphql_fallback(
        &server,
        graphql_errors(json!([
            { "message": "Not signed in", "extensions": { "code": "UNAUTHENTICATED" } }
        ])),
    )
    .await;

    let client = SignalClient::from_config(config_for(&server)).expect("client");
    let err = client.query(&signals()).await.expect_err("expired");

    assert_eq!(err, QueryError::SessionExpired);
    assert!(client.credentials().is_revoked());
    assert!(!client.status().signed_in);
}

#[tokio::test]
async fn server_errors_are_retried_once_then_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GRAPHQL_PATH))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let client = SignalClient::from_config(config_for(&server)).expect("client");
    let err = client.query(&signals()).await.expect_err("bad gateway");

    assert_matches!(
        err,
        QueryError::TransientNetwork {
            attempts: 2,
            source: TransportError::HttpStatus { status: 502, .. }
        }
    );
    assert_eq!(client.status().breaker_failures, 1);
    assert_eq!(client.breaker_state(), CircuitState::Closed);
}

#[tokio::test]
async fn client_errors_are_reported_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GRAPHQL_PATH))
        .respond_with(ResponseTemplate::new(422).set_body_string("bad variables"))
        .expect(1)
        .mount(&server)
        .await;

    let client = SignalClient::from_config(config_for(&server)).expect("client");
    let err = client.query(&signals()).await.expect_err("unprocessable");

    assert_eq!(
        err,
        QueryError::Client {
            status: 422,
            body: "bad variables".to_string()
        }
    );
}

#[tokio::test]
async fn offset_pages_merge_through_the_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GRAPHQL_PATH))
        .and(body_partial_json(json!({ "variables": { "page": 2 } })))
        .respond_with(graphql_data(signals_page(&[3, 4], 2, false)))
        .expect(1)
        .mount(&server)
        .await;
    mount_graphql_fallback(&server, graphql_data(signals_page(&[1, 2], 1, true))).await;

    let mut config = config_for(&server);
    config.auth.access_token = None;
    let client = SignalClient::from_config(config).expect("client");

    client.query(&signals()).await.expect("page 1");
    let merged = client
        .query(&signals().with_variable("page", 2))
        .await
        .expect("page 2");

    assert_eq!(
        merged["signals"]["nodes"],
        json!([{ "id": 1 }, { "id": 2 }, { "id": 3 }, { "id": 4 }])
    );
    assert_eq!(merged["signals"]["hasNextPage"], json!(false));
    let cached = client.read(&signals()).expect("cached");
    assert_eq!(cached, merged);
}

#[tokio::test]
async fn health_probe_marks_backend_available() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GRAPHQL_PATH))
        .and(body_partial_json(json!({ "query": "query HealthProbe { __typename }" })))
        .respond_with(graphql_data(json!({ "__typename": "Query" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = SignalClient::from_config(config_for(&server)).expect("client");

    assert!(client.probe().await);
    assert!(client.network_status().can_make_request);
}

#[tokio::test]
async fn unreachable_backend_counts_as_network_failure() {
    let server = MockServer::start().await;
    let mut config = config_for(&server);
    // Nothing listens on the discard port.
    config.endpoint = "http://127.0.0.1:9/api/graphql".to_string();

    let client = SignalClient::from_config(config).expect("client");
    let err = client.query(&signals()).await.expect_err("connection refused");

    assert_matches!(err, QueryError::TransientNetwork { attempts: 2, .. });
    assert_eq!(client.network_status().error_count, 2);
}
