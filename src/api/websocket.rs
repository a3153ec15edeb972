use super::AppState;
use crate::event::{ProxyUpdate, UpdateOrigin};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Client → Server message types
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe { proxy_id: String },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { proxy_id: String },
}

/// Server → Client: proxy state change
#[derive(Debug, Clone, Serialize)]
pub struct ProxyUpdateMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub proxy_id: String,
    pub source: String,
    pub old_value: Value,
    pub value: Value,
    pub origin: UpdateOrigin,
    pub timestamp: DateTime<Utc>,
}

impl From<ProxyUpdate> for ProxyUpdateMessage {
    fn from(update: ProxyUpdate) -> Self {
        Self {
            msg_type: "proxy_update".to_string(),
            proxy_id: update.proxy_id,
            source: update.source,
            old_value: update.old_value,
            value: update.new_value,
            origin: update.origin,
            timestamp: update.timestamp,
        }
    }
}

/// GET /api/ws - WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("WebSocket upgrade request received");
    let updates = state.registry.subscribe();
    ws.on_upgrade(move |socket| ConnectionManager::new().handle(socket, updates))
}

/// Manages a single WebSocket connection with proxy subscriptions
pub struct ConnectionManager {
    /// Proxy ids this connection is subscribed to; empty = all
    subscriptions: HashSet<String>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: HashSet::new(),
        }
    }

    /// Handle WebSocket connection lifecycle
    pub async fn handle(mut self, socket: WebSocket, mut updates: broadcast::Receiver<ProxyUpdate>) {
        info!("WebSocket connection established");
        let (mut sender, mut receiver) = socket.split();

        loop {
            tokio::select! {
                msg = receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_client_message(&text) {
                                warn!(error = %e, "Invalid client message");
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = sender.send(Message::Pong(data)).await {
                                error!(error = %e, "Failed to send pong");
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("WebSocket client disconnected");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }
                    }
                }

                result = updates.recv() => {
                    match result {
                        Ok(update) => {
                            if !self.should_forward(&update) {
                                continue;
                            }
                            let json = match serde_json::to_string(&ProxyUpdateMessage::from(update)) {
                                Ok(json) => json,
                                Err(e) => {
                                    error!(error = %e, "Failed to serialize proxy update");
                                    continue;
                                }
                            };
                            if let Err(e) = sender.send(Message::Text(json)).await {
                                error!(error = %e, "Failed to send proxy update");
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped = skipped, "WebSocket lagged, skipped updates");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Proxy updates closed");
                            break;
                        }
                    }
                }
            }
        }

        info!("WebSocket connection closed");
    }

    /// Handle client message (subscribe/unsubscribe)
    fn handle_client_message(&mut self, text: &str) -> anyhow::Result<()> {
        let msg: ClientMessage = serde_json::from_str(text)?;
        match msg {
            ClientMessage::Subscribe { proxy_id } => {
                info!(proxy_id = %proxy_id, "Client subscribed to proxy");
                self.subscriptions.insert(proxy_id);
            }
            ClientMessage::Unsubscribe { proxy_id } => {
                info!(proxy_id = %proxy_id, "Client unsubscribed from proxy");
                self.subscriptions.remove(&proxy_id);
            }
        }
        Ok(())
    }

    fn should_forward(&self, update: &ProxyUpdate) -> bool {
        self.subscriptions.is_empty() || self.subscriptions.contains(&update.proxy_id)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
