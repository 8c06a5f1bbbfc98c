//! API integration tests for ding-api routes.
//!
//! Uses Axum's `tower::ServiceExt` to send requests directly to the app
//! without binding a TCP socket. DingTalk is a wiremock server.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ding_api::app::build_app;
use ding_api::state::AppState;
use ding_core::{
    CompiledTemplate, DispatchConfig, Dispatcher, HttpTransport, ProfileStore, TemplateStore,
};

async fn dingtalk_stub() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ops"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"errcode": 0, "errmsg": "ok"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dev"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"errcode": 0, "errmsg": "ok"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"errcode": 0, "errmsg": "ok"}))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;
    server
}

fn write_config(path: &Path, server: &MockServer, profiles: &[&str]) {
    let mut raw = String::from("[profiles]\n");
    for p in profiles {
        raw.push_str(&format!("{p} = \"{}/{p}\"\n", server.uri()));
    }
    std::fs::write(path, raw).unwrap();
}

fn state_for(config: &Path) -> AppState {
    state_with(config, TemplateStore::default(), 2000)
}

fn state_with(config: &Path, templates: TemplateStore, timeout_ms: u64) -> AppState {
    let transport =
        HttpTransport::new(&DispatchConfig::default().with_request_timeout(timeout_ms)).unwrap();
    let dispatcher = Dispatcher::new(
        ProfileStore::from_file(config).unwrap(),
        templates,
        Arc::new(transport),
    );
    AppState::new(dispatcher)
}

fn alert_payload() -> Value {
    json!({
        "version": "4",
        "status": "firing",
        "receiver": "dingtalk",
        "groupLabels": {"alertname": "HighCPU"},
        "commonLabels": {"alertname": "HighCPU"},
        "commonAnnotations": {},
        "externalURL": "http://alertmanager:9093",
        "alerts": [{
            "status": "firing",
            "labels": {"alertname": "HighCPU", "instance": "node-1"},
            "annotations": {},
            "startsAt": "2024-05-01T10:00:00Z",
            "endsAt": "0001-01-01T00:00:00Z"
        }]
    })
}

fn send_request(profile: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/dingtalk/{profile}/send"))
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn send_alert(profile: &str) -> Request<Body> {
    send_request(profile, serde_json::to_vec(&alert_payload()).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(body: Body) -> Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(body: Body) -> String {
    let bytes = body.collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let server = dingtalk_stub().await;
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    write_config(&config, &server, &["ops"]);

    let app = build_app(state_for(&config));
    for uri in ["/health", "/-/healthy"] {
        let resp = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp.into_body()).await, "ok");
    }
}

#[tokio::test]
async fn send_relays_to_profile() {
    let server = dingtalk_stub().await;
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    write_config(&config, &server, &["ops"]);

    let resp = build_app(state_for(&config))
        .oneshot(send_alert("ops"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["profile"], "ops");
    assert_eq!(body["errcode"], 0);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), "/ops");
    let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(sent["markdown"]["text"].as_str().unwrap().contains("HighCPU"));
}

#[tokio::test]
async fn send_to_unknown_profile_is_404_without_outbound_call() {
    let server = dingtalk_stub().await;
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    write_config(&config, &server, &["ops"]);

    let resp = build_app(state_for(&config))
        .oneshot(send_alert("missing"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["error"], "not_found");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn malformed_payload_is_400() {
    let server = dingtalk_stub().await;
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    write_config(&config, &server, &["ops"]);

    let resp = build_app(state_for(&config))
        .oneshot(send_request("ops", b"{not json".to_vec()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["error"], "bad_request");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn upstream_failure_is_502() {
    let server = dingtalk_stub().await;
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    write_config(&config, &server, &["broken"]);

    let resp = build_app(state_for(&config))
        .oneshot(send_alert("broken"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["error"], "upstream_error");
    assert!(body["message"].as_str().unwrap().contains("500"));
}

#[tokio::test]
async fn render_failure_is_422_without_outbound_call() {
    let server = dingtalk_stub().await;
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    write_config(&config, &server, &["ops"]);

    // Valid against an empty group, fails once an alert is present.
    let template = CompiledTemplate::compile(
        r#"{{#*inline "title"}}t{{/inline}}{{#*inline "text"}}{{#each alerts}}{{nosuchhelper status}}{{/each}}{{/inline}}"#,
    )
    .unwrap();

    let resp = build_app(state_with(&config, TemplateStore::new(template), 2000))
        .oneshot(send_alert("ops"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["error"], "render_error");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn slow_upstream_is_504_within_timeout() {
    let server = dingtalk_stub().await;
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    write_config(&config, &server, &["slow"]);

    let started = Instant::now();
    let resp = build_app(state_with(&config, TemplateStore::default(), 300))
        .oneshot(send_alert("slow"))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["error"], "upstream_timeout");
}

#[tokio::test]
async fn reload_drops_removed_profile_and_keeps_others() {
    let server = dingtalk_stub().await;
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    write_config(&config, &server, &["ops", "dev"]);

    let app = build_app(state_for(&config));
    let resp = app.clone().oneshot(send_alert("dev")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    write_config(&config, &server, &["ops"]);
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/-/reload")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp.into_body()).await, "ok");

    let resp = app.clone().oneshot(send_alert("dev")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app.clone().oneshot(send_alert("ops")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn failed_reload_keeps_running_profiles() {
    let server = dingtalk_stub().await;
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    write_config(&config, &server, &["ops"]);

    let app = build_app(state_for(&config));

    std::fs::write(&config, "[profiles]\n").unwrap();
    let resp = app.clone().oneshot(get("/reload")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(resp.into_body()).await;
    assert!(body["message"].as_str().unwrap().contains("reload failed"));

    let resp = app.clone().oneshot(send_alert("ops")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn metrics_count_outcomes() {
    let server = dingtalk_stub().await;
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    write_config(&config, &server, &["ops", "broken"]);

    let app = build_app(state_for(&config));
    app.clone().oneshot(send_alert("ops")).await.unwrap();
    app.clone().oneshot(send_alert("broken")).await.unwrap();
    app.clone().oneshot(send_alert("nope")).await.unwrap();

    let resp = app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let ct = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(ct.contains("openmetrics-text"));
    let text = body_text(resp.into_body()).await;
    assert!(
        text.contains(r#"dingtalk_notifications_total{profile="ops",outcome="ok"} 1"#),
        "{text}"
    );
    assert!(
        text.contains(r#"dingtalk_notifications_total{profile="broken",outcome="rejected"} 1"#),
        "{text}"
    );
    assert!(
        text.contains(r#"dingtalk_rejected_requests_total{reason="unknown_profile"} 1"#),
        "{text}"
    );
    assert!(text.contains("dingtalk_profiles 2"), "{text}");
    assert!(text.ends_with("# EOF\n"));
}
