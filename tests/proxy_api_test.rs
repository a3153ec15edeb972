// Integration tests for the proxy HTTP API

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use charge_proxy::api::{create_router, AppState};
use charge_proxy::config::{ProxyConfig, VehicleConfig};
use charge_proxy::event::EventBus;
use charge_proxy::host::{Command, SimulatedHost};
use charge_proxy::registry::ProxyRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const CURRENT_SOURCE: &str = "number.blacky_maximaler_ac_ladestrom";
const SWITCH_SOURCE: &str = "switch.blacky_laden";
const CURRENT_ID: &str = "number.blacky_maximaler_ac_ladestrom_blacky_charging_current_proxy";
const SWITCH_ID: &str = "switch.blacky_laden_blacky_charging_switch_proxy";

async fn create_test_app() -> (Router, Arc<SimulatedHost>) {
    let config = ProxyConfig {
        vehicles: vec![VehicleConfig {
            name: "blacky".to_string(),
            charging_current_entity: CURRENT_SOURCE.to_string(),
            charging_switch_entity: SWITCH_SOURCE.to_string(),
            device_id: None,
            min: None,
            max: None,
        }],
        ..Default::default()
    };

    let bus = EventBus::new();
    let host = Arc::new(SimulatedHost::new(bus.clone()));
    host.set_state_silently(CURRENT_SOURCE, Some("6"));
    host.set_state_silently(SWITCH_SOURCE, Some("off"));

    let registry = ProxyRegistry::attach(&config, host.clone(), &bus)
        .await
        .unwrap();
    let app = create_router(AppState {
        registry: Arc::new(registry),
        bus,
    });
    (app, host)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = match body {
        Some(json) => Body::from(json.to_string()),
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn send_raw(app: &Router, method: &str, uri: &str, body: &'static str) -> StatusCode {
    app.clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
}

#[tokio::test(start_paused = true)]
async fn test_health() {
    let (app, _host) = create_test_app().await;
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test(start_paused = true)]
async fn test_list_proxies() {
    let (app, _host) = create_test_app().await;
    let (status, body) = send(&app, "GET", "/api/proxies", None).await;
    assert_eq!(status, StatusCode::OK);

    let proxies = body.as_array().unwrap();
    assert_eq!(proxies.len(), 2);
    assert_eq!(proxies[0]["id"], CURRENT_ID);
    assert_eq!(proxies[0]["name"], "Blacky Charging Current Proxy");
    assert_eq!(proxies[0]["kind"], "current");
    assert_eq!(proxies[0]["unit"], "A");
    assert_eq!(proxies[0]["min"], 1.0);
    assert_eq!(proxies[0]["max"], 16.0);
    assert_eq!(proxies[0]["value"], 6.0);
    assert_eq!(proxies[1]["id"], SWITCH_ID);
    assert_eq!(proxies[1]["name"], "Blacky Charging Switch Proxy");
    assert_eq!(proxies[1]["value"], false);
}

#[tokio::test(start_paused = true)]
async fn test_get_unknown_proxy_returns_404() {
    let (app, _host) = create_test_app().await;
    let (status, body) = send(&app, "GET", "/api/proxies/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test(start_paused = true)]
async fn test_put_schedules_without_calling_host() {
    let (app, host) = create_test_app().await;
    let uri = format!("/api/proxies/{}", CURRENT_ID);

    let (status, body) = send(&app, "PUT", &uri, Some(json!({ "value": 16 }))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["scheduled"], true);
    assert_eq!(body["proxy"]["desired"], 16.0);
    assert_eq!(body["proxy"]["value"], 6.0);
    assert_eq!(body["proxy"]["converging"], true);
    assert!(host.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_put_clamps_out_of_range_value() {
    let (app, _host) = create_test_app().await;
    let uri = format!("/api/proxies/{}", CURRENT_ID);

    let (status, body) = send(&app, "PUT", &uri, Some(json!({ "value": 40 }))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["proxy"]["desired"], 16.0);
}

#[tokio::test(start_paused = true)]
async fn test_put_rejects_wrong_value_type() {
    let (app, _host) = create_test_app().await;

    let uri = format!("/api/proxies/{}", CURRENT_ID);
    let (status, body) = send(&app, "PUT", &uri, Some(json!({ "value": "fast" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("expected a number"));

    let uri = format!("/api/proxies/{}", SWITCH_ID);
    let (status, _) = send(&app, "PUT", &uri, Some(json!({ "value": 3 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn test_put_malformed_body() {
    let (app, _host) = create_test_app().await;
    let uri = format!("/api/proxies/{}", CURRENT_ID);
    let status = send_raw(&app, "PUT", &uri, "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn test_put_unknown_proxy_returns_404() {
    let (app, _host) = create_test_app().await;
    let (status, _) = send(&app, "PUT", "/api/proxies/nope", Some(json!({ "value": 8 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_put_switch_converges() {
    let (app, host) = create_test_app().await;
    let uri = format!("/api/proxies/{}", SWITCH_ID);

    let (status, _) = send(&app, "PUT", &uri, Some(json!({ "value": true }))).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    tokio::time::sleep(Duration::from_secs(1)).await;

    let calls = host.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].command, Command::TurnOn);

    let (_, body) = send(&app, "GET", &uri, None).await;
    assert_eq!(body["value"], true);
    assert_eq!(body["desired"], Value::Null);
    assert_eq!(body["converging"], false);
    assert!(body["last_actuated_at"].is_string());
}

#[tokio::test(start_paused = true)]
async fn test_source_event_updates_proxy() {
    let (app, _host) = create_test_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/source-events",
        Some(json!({ "entity_id": CURRENT_SOURCE, "new_state": "10" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["accepted"], 1);

    tokio::time::sleep(Duration::from_millis(10)).await;

    let (_, body) = send(&app, "GET", &format!("/api/proxies/{}", CURRENT_ID), None).await;
    assert_eq!(body["value"], 10.0);
}

#[tokio::test(start_paused = true)]
async fn test_source_event_batch() {
    let (app, _host) = create_test_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/source-events",
        Some(json!([
            { "source": SWITCH_SOURCE, "new_state": "on" },
            { "source": CURRENT_SOURCE, "new_state": "unavailable" }
        ])),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["accepted"], 2);

    tokio::time::sleep(Duration::from_millis(10)).await;

    let (_, body) = send(&app, "GET", "/api/proxies", None).await;
    assert_eq!(body[0]["value"], Value::Null);
    assert_eq!(body[1]["value"], true);
}

#[tokio::test(start_paused = true)]
async fn test_source_event_rejects_empty_batch() {
    let (app, _host) = create_test_app().await;
    let (status, _) = send(&app, "POST", "/api/source-events", Some(json!([]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/api/source-events",
        Some(json!({ "source": " ", "new_state": "on" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
