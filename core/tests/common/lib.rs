use serde_json::Value;
use serde_json::json;
use signal_core::ClientConfig;
use signal_core::FieldPolicy;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

pub const GRAPHQL_PATH: &str = "/api/graphql";
pub const REFRESH_PATH: &str = "/api/auth/refresh";

/// Client configuration pointing at `server`, with fast retries and an
/// offset policy for the `signals` field.
pub fn config_for(server: &MockServer) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.endpoint = format!("{}{GRAPHQL_PATH}", server.uri());
    config.auth.refresh_url = Some(format!("{}{REFRESH_PATH}", server.uri()));
    config.auth.access_token = Some("stale".to_string());
    config.auth.refresh_token = Some("refresh-1".to_string());
    config.retry.initial_delay_ms = 10;
    config.request_timeout_ms = 2_000;
    config.cache.fields.push(FieldPolicy::offset("signals"));
    config
}

pub fn graphql_data(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "data": data }))
}

pub fn graphql_errors(errors: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "data": null, "errors": errors }))
}

pub fn signals_page(ids: &[i64], page: u32, has_next_page: bool) -> Value {
    json!({
        "signals": {
            "nodes": ids.iter().map(|id| json!({ "id": id })).collect::<Vec<_>>(),
            "totalCount": 4,
            "currentPage": page,
            "totalPages": 2,
            "hasNextPage": has_next_page,
        }
    })
}

/// Mounts `response` for every GraphQL POST not matched by a more specific
/// mock.
pub async fn mount_graphql_fallback(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(GRAPHQL_PATH))
        .respond_with(response)
        .with_priority(10)
        .mount(server)
        .await;
}

pub fn refresh_success(access_token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "accessToken": access_token,
        "refreshToken": "refresh-2",
    }))
}
