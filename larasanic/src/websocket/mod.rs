//! Authenticated WebSocket connections with per-user fan-out.
//!
//! Every server message, pushes and replies alike, uses the envelope
//! `{"channel", "data", "timestamp"}`. Clients may send `{"action": "ping"}` and
//! `{"action": "subscribe", "channel": ...}`.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    AppState,
    auth::User,
    errors::{Error, Result},
    routing::{Blueprint, Router},
};

/// Message pushed to clients on `channel`.
pub fn envelope(channel: &str, data: Value) -> Value {
    json!({
        "channel": channel,
        "data": data,
        "timestamp": chrono::Utc::now().timestamp(),
    })
}

/// Reply to a client frame, if it warrants one.
pub fn handle_client_message(text: &str) -> Option<Value> {
    let Ok(message) = serde_json::from_str::<Value>(text) else {
        return Some(envelope("error", json!({ "message": "Invalid JSON" })));
    };
    match message.get("action").and_then(Value::as_str) {
        Some("ping") => Some(envelope(
            "pong",
            json!({ "timestamp": chrono::Utc::now().to_rfc3339() }),
        )),
        Some("subscribe") => Some(envelope(
            "subscribed",
            json!({ "channel": message.get("channel").cloned().unwrap_or(Value::Null) }),
        )),
        _ => None,
    }
}

#[derive(Debug, Default)]
pub struct WebSocketManager {
    connections: DashMap<u64, Vec<(Uuid, UnboundedSender<Message>)>>,
}

impl WebSocketManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new connection for `user_id`.
    pub fn register(&self, user_id: u64) -> (Uuid, UnboundedSender<Message>, UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.connections.entry(user_id).or_default().push((id, tx.clone()));
        (id, tx, rx)
    }

    pub fn disconnect(&self, user_id: u64, connection: Uuid) {
        if let Some(mut entry) = self.connections.get_mut(&user_id) {
            entry.retain(|(id, _)| *id != connection);
        }
        self.connections.remove_if(&user_id, |_, conns| conns.is_empty());
    }

    /// Serve a socket until the client goes away.
    #[instrument(skip_all, fields(user_id = user.id))]
    pub async fn connect(&self, user: User, socket: WebSocket) {
        let (connection, tx, mut rx) = self.register(user.id);
        info!(%connection, "WebSocket connected");

        let (mut sink, mut stream) = socket.split();
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        });

        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => {
                    if let Some(reply) = handle_client_message(text.as_str())
                        && tx.send(Message::Text(reply.to_string().into())).is_err()
                    {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        self.disconnect(user.id, connection);
        writer.abort();
        info!(%connection, "WebSocket disconnected");
    }

    /// Push to every connection of one user, dropping dead ones. Returns how many got it.
    pub fn broadcast_to_user(&self, user_id: u64, channel: &str, data: Value) -> usize {
        let text = envelope(channel, data).to_string();
        let mut delivered = 0;
        if let Some(mut conns) = self.connections.get_mut(&user_id) {
            conns.retain(|(_, tx)| {
                let alive = tx.send(Message::Text(text.clone().into())).is_ok();
                delivered += usize::from(alive);
                alive
            });
        }
        self.connections.remove_if(&user_id, |_, conns| conns.is_empty());
        delivered
    }

    pub fn broadcast_to_all(&self, channel: &str, data: Value) -> usize {
        let users: Vec<u64> = self.connections.iter().map(|e| *e.key()).collect();
        let delivered: usize = users
            .into_iter()
            .map(|user| self.broadcast_to_user(user, channel, data.clone()))
            .sum();
        debug!(channel, delivered, "Broadcast to all users");
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.connections.iter().map(|e| e.value().len()).sum()
    }

    pub fn user_count(&self) -> usize {
        self.connections.len()
    }
}

/// Upgrade handler. Authentication happens before the upgrade.
pub async fn websocket_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    upgrade: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response> {
    let manager = state.websocket.clone().ok_or_else(|| Error::Internal {
        operation: "accept websocket: connection manager is not registered".to_string(),
    })?;
    let auth = state.auth.as_ref().ok_or_else(|| Error::Internal {
        operation: "accept websocket: auth service is not registered".to_string(),
    })?;

    let user = auth
        .user_from_headers(&headers)
        .await
        .ok()
        .flatten()
        .ok_or(Error::Unauthenticated {
            message: Some("Authentication failed".to_string()),
        })?;

    let upgrade = upgrade.map_err(|e| Error::BadRequest { message: e.body_text() })?;
    Ok(upgrade
        .on_upgrade(move |socket| async move { manager.connect(user, socket).await })
        .into_response())
}

pub fn register_routes(router: &mut Router, path: &str) {
    router.blueprint(Blueprint::Ws).group(|router| {
        router.get(path, websocket_handler).name("websocket");
    });
}
