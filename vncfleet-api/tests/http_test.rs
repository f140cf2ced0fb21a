//! HTTP surface integration tests against a mock orchestration API.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vncfleet_api::{build_state, create_router};
use vncfleet_core::config::Config;

fn endpoints_body() -> serde_json::Value {
    serde_json::json!({
        "metadata": {"name": "vnc-fleet", "namespace": "emulators", "resourceVersion": "3"},
        "subsets": [{
            "addresses": [
                {"ip": "10.0.0.1", "targetRef": {"kind": "Pod", "name": "emulator-0"}},
                {"ip": "10.0.0.2", "targetRef": {"kind": "Pod", "name": "emulator-1"}}
            ],
            "ports": [
                {"name": "vnc", "port": 5900, "protocol": "TCP"}
            ]
        }]
    })
}

async fn test_router(api_url: &str) -> axum::Router {
    let mut config = Config::default();
    config.discovery.api_url = api_url.to_string();
    config.discovery.token_path = "/nonexistent".to_string();
    config.discovery.namespace = "emulators".to_string();
    config.discovery.service = "vnc-fleet".to_string();
    config.fallback.strict = true;

    let state = build_state(&config).await.expect("state");
    state.registry.refresh_discovery().await;
    create_router(state)
}

async fn mock_api() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/namespaces/emulators/endpoints/vnc-fleet"))
        .respond_with(ResponseTemplate::new(200).set_body_json(endpoints_body()))
        .mount(&server)
        .await;
    server
}

async fn get_json(router: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).expect("request"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

async fn post_json(router: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(Request::post(uri).body(Body::empty()).expect("request"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, serde_json::from_slice(&bytes).expect("json body"))
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = mock_api().await;
    let router = test_router(&server.uri()).await;

    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_instance_list_envelope() {
    let server = mock_api().await;
    let router = test_router(&server.uri()).await;

    let (status, body) = get_json(&router, "/api/instances").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "dynamic");
    assert_eq!(body["degraded"], false);
    assert_eq!(body["count"], 2);
    assert_eq!(body["instances"][0]["id"], "instance-0");
    assert_eq!(body["instances"][1]["id"], "instance-1");
    // Wire format is camelCase.
    assert!(body["instances"][0]["addresses"]["podIP"].is_string());
}

#[tokio::test]
async fn test_instance_lookup_and_refresh() {
    let server = mock_api().await;
    let router = test_router(&server.uri()).await;

    let (status, body) = get_json(&router, "/api/instances/instance-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "instance-1");
    assert_eq!(body["provisioned"], true);

    let (status, body) = get_json(&router, "/api/instances/instance-9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().expect("error").contains("instance-9"));

    let (status, body) = post_json(&router, "/api/instances/refresh").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn test_quality_endpoints_before_first_cycle() {
    let server = mock_api().await;
    let router = test_router(&server.uri()).await;

    // No probe cycle has run yet: empty metrics, not an error.
    let (status, body) = get_json(&router, "/api/quality/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().expect("list").len(), 0);

    let (status, _) = get_json(&router, "/api/quality/metrics/instance-0").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = get_json(&router, "/api/quality/summary").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fleet"]["total"], 0);
    assert_eq!(body["fleet"]["monitoring"], false);
}

#[tokio::test]
async fn test_monitor_start_stop() {
    let server = mock_api().await;
    let router = test_router(&server.uri()).await;

    let (status, body) = post_json(&router, "/api/quality/monitor/start").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);

    // Second start is a no-op.
    let (_, body) = post_json(&router, "/api/quality/monitor/start").await;
    assert_eq!(body["changed"], false);

    let (_, body) = post_json(&router, "/api/quality/monitor/stop").await;
    assert_eq!(body["changed"], true);
    let (_, body) = post_json(&router, "/api/quality/monitor/stop").await;
    assert_eq!(body["changed"], false);
}

#[tokio::test]
async fn test_prometheus_exposition() {
    let server = mock_api().await;
    let router = test_router(&server.uri()).await;

    let response = router
        .oneshot(
            Request::get("/metrics")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let text = String::from_utf8(bytes.to_vec()).expect("utf8");
    assert!(text.contains("discovery_instances"));
}

#[tokio::test]
async fn test_recover_unknown_instance_is_404() {
    let server = mock_api().await;
    let router = test_router(&server.uri()).await;

    let (status, _) = post_json(&router, "/api/quality/recover/instance-9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
