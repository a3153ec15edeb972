//! Home Assistant REST client.
//!
//! Reads entity states via `GET /api/states/{entity_id}` and issues commands
//! via `POST /api/services/{domain}/{service}`.

use super::ChargerApi;
use crate::config::HostConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Subset of the state object returned by `/api/states/{entity_id}`
#[derive(Deserialize)]
struct EntityState {
    state: Option<String>,
}

/// Client for the Home Assistant REST API.
pub struct HomeAssistantClient {
    /// Base URL (e.g., "http://localhost:8123")
    base_url: String,
    /// Long-lived access token sent as bearer
    token: Option<String>,
    http_client: reqwest::Client,
}

impl HomeAssistantClient {
    pub fn new(config: &HostConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            http_client,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// POST /api/services/{domain}/{service}
    async fn call_service(&self, domain: &str, service: &str, body: Value) -> Result<()> {
        let url = format!("{}/api/services/{}/{}", self.base_url, domain, service);
        debug!(url = %url, body = %body, "Calling host service");

        let response = self
            .authorize(self.http_client.post(&url))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to call service {}.{}", domain, service))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            anyhow::bail!(
                "Service {}.{} returned error status {}: {}",
                domain,
                service,
                status,
                body
            );
        }

        Ok(())
    }
}

#[async_trait]
impl ChargerApi for HomeAssistantClient {
    async fn current_state(&self, source: &str) -> Result<Option<String>> {
        let url = format!("{}/api/states/{}", self.base_url, source);

        let response = self
            .authorize(self.http_client.get(&url))
            .send()
            .await
            .with_context(|| format!("Failed to read state of '{}'", source))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!(
                "Reading state of '{}' returned error status {}",
                source,
                response.status()
            );
        }

        let state: EntityState = response
            .json()
            .await
            .with_context(|| format!("Failed to parse state of '{}'", source))?;
        Ok(state.state)
    }

    async fn set_value(&self, source: &str, value: f64) -> Result<()> {
        self.call_service(
            "number",
            "set_value",
            json!({ "entity_id": source, "value": value }),
        )
        .await
    }

    async fn turn_on(&self, source: &str) -> Result<()> {
        self.call_service("switch", "turn_on", json!({ "entity_id": source }))
            .await
    }

    async fn turn_off(&self, source: &str) -> Result<()> {
        self.call_service("switch", "turn_off", json!({ "entity_id": source }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Command;

    fn make_client(url: String) -> HomeAssistantClient {
        HomeAssistantClient::new(&HostConfig {
            url,
            token: Some("secret".to_string()),
            ..Default::default()
        })
        .expect("Failed to build client")
    }

    #[tokio::test]
    async fn test_current_state_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/states/number.blacky_ladestrom")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"entity_id":"number.blacky_ladestrom","state":"10.0","attributes":{}}"#)
            .create_async()
            .await;

        let client = make_client(server.url());
        let state = client.current_state("number.blacky_ladestrom").await.unwrap();
        assert_eq!(state.as_deref(), Some("10.0"));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_current_state_unknown_entity() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/states/switch.missing")
            .with_status(404)
            .with_body(r#"{"message":"Entity not found."}"#)
            .create_async()
            .await;

        let client = make_client(server.url());
        let state = client.current_state("switch.missing").await.unwrap();
        assert_eq!(state, None);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_current_state_server_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/states/switch.blacky_laden")
            .with_status(500)
            .create_async()
            .await;

        let client = make_client(server.url());
        assert!(client.current_state("switch.blacky_laden").await.is_err());
    }

    #[tokio::test]
    async fn test_set_value_posts_service_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/services/number/set_value")
            .match_header("authorization", "Bearer secret")
            .match_body(mockito::Matcher::Json(json!({
                "entity_id": "number.blacky_ladestrom",
                "value": 16.0
            })))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let client = make_client(server.url());
        Command::SetValue(16.0)
            .dispatch(&client, "number.blacky_ladestrom")
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_turn_off_posts_service_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/services/switch/turn_off")
            .match_body(mockito::Matcher::Json(json!({
                "entity_id": "switch.blacky_laden"
            })))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let client = make_client(server.url());
        client.turn_off("switch.blacky_laden").await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_service_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/services/switch/turn_on")
            .with_status(429)
            .with_body("Too many requests")
            .create_async()
            .await;

        let client = make_client(server.url());
        let err = client.turn_on("switch.blacky_laden").await.unwrap_err();
        assert!(err.to_string().contains("429"), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        // Nothing listens on this port
        let client = make_client("http://127.0.0.1:9".to_string());
        assert!(client.current_state("switch.blacky_laden").await.is_err());
    }
}
