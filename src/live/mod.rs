//! Live-Update Fabric (C7, spec §4.7): duplex websocket broadcast that
//! delivers operation progress and system notifications to subscribed
//! clients.
//!
//! Grounded on `events.rs`'s tagged envelope enum for the message shapes,
//! generalized from a single Tauri event channel to per-client axum
//! websocket connections; the split-socket forward-task/receive-loop
//! shape follows `synctv-api/src/http/websocket.rs`'s `handle_socket`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::models::OperationId;
use crate::ops::{OperationProgress, OperationSink};

const CLIENT_QUEUE_CAPACITY: usize = 256;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
    Success,
    CursorInvalidation,
    CacheInvalidation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoUpdateAction {
    Update,
    Delete,
    Restore,
    MoveToTrash,
}

/// `video_id` is carried as a string on the wire (spec S5;
/// `original_source/src/api/websocket_api.py`'s `str(video_id)`), not a
/// JSON number.
#[derive(Debug, Clone, Serialize)]
pub struct VideoUpdate {
    pub video_id: String,
    pub action: VideoUpdateAction,
    pub changes: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
struct CursorInvalidationPayload {
    #[serde(rename = "type")]
    kind: &'static str,
    video_update: VideoUpdate,
}

#[derive(Debug, Clone, Serialize)]
struct CacheInvalidationPayload {
    #[serde(rename = "type")]
    kind: &'static str,
    cache_invalidation: CacheInvalidationDetail,
}

#[derive(Debug, Clone, Serialize)]
struct CacheInvalidationDetail {
    cache_keys: Vec<String>,
    reason: String,
}

/// Control frames a client may send over the socket (spec §4.7).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ControlFrame {
    Subscribe { operation_id: OperationId },
    Unsubscribe { operation_id: OperationId },
    GetStatus,
    Ping,
}

/// The envelope every server-sent frame is wrapped in (spec §4.7, §6).
#[derive(Debug, Clone, Serialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: &'static str,
    data: Value,
    timestamp: DateTime<Utc>,
    message_id: Uuid,
}

impl Envelope {
    fn new(kind: &'static str, data: impl Serialize) -> Self {
        Self {
            kind,
            data: serde_json::to_value(data).unwrap_or(Value::Null),
            timestamp: Utc::now(),
            message_id: Uuid::new_v4(),
        }
    }

    fn into_ws_message(self) -> WsMessage {
        WsMessage::Text(serde_json::to_string(&self).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct FabricStats {
    pub connected_clients: usize,
    pub total_subscriptions: usize,
}

struct ClientHandle {
    sender: mpsc::Sender<WsMessage>,
    subscriptions: DashSet<OperationId>,
}

/// Shared hub owning client registrations; implements `OperationSink` so
/// the Operation Manager (C6) can push progress without depending on this
/// module's transport details.
pub struct LiveFabric {
    clients: DashMap<Uuid, ClientHandle>,
}

impl LiveFabric {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { clients: DashMap::new() })
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new().route("/ws", get(ws_handler)).with_state(self.clone())
    }

    /// Spawns the ~30 s heartbeat task (spec §5). The caller keeps the
    /// handle alive for the process lifetime.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let fabric = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                fabric.broadcast_all(Envelope::new("heartbeat", Value::Null));
            }
        })
    }

    pub fn stats(&self) -> FabricStats {
        FabricStats {
            connected_clients: self.clients.len(),
            total_subscriptions: self.clients.iter().map(|e| e.subscriptions.len()).sum(),
        }
    }

    pub fn send_notification(&self, message: impl Into<String>, level: NotificationLevel, data: Option<Value>) {
        let envelope = Envelope::new(
            "notification",
            serde_json::json!({ "message": message.into(), "level": level, "data": data }),
        );
        self.broadcast_all(envelope);
    }

    pub fn send_cursor_invalidation(&self, video_update: VideoUpdate) {
        let payload = CursorInvalidationPayload { kind: "video_update", video_update };
        let envelope = Envelope::new(
            "notification",
            serde_json::json!({
                "message": "cursor invalidated",
                "level": NotificationLevel::CursorInvalidation,
                "data": payload,
            }),
        );
        self.broadcast_all(envelope);
    }

    pub fn send_cache_invalidation(&self, cache_keys: Vec<String>, reason: impl Into<String>) {
        let payload = CacheInvalidationPayload {
            kind: "cache_invalidation",
            cache_invalidation: CacheInvalidationDetail { cache_keys, reason: reason.into() },
        };
        let envelope = Envelope::new(
            "notification",
            serde_json::json!({
                "message": "cache invalidated",
                "level": NotificationLevel::CacheInvalidation,
                "data": payload,
            }),
        );
        self.broadcast_all(envelope);
    }

    /// Delivers to every connected client via a detached send-per-client
    /// task, so a single slow socket cannot stall the broadcaster (spec
    /// §5: "broadcasting runs on a dedicated loop"). These frames
    /// (notification/heartbeat/system_status) are never coalesced away.
    fn broadcast_all(&self, envelope: Envelope) {
        let message = envelope.into_ws_message();
        for entry in self.clients.iter() {
            let sender = entry.sender.clone();
            let msg = message.clone();
            tokio::spawn(async move {
                let _ = sender.send(msg).await;
            });
        }
    }

    /// Same delivery guarantee as `broadcast_all`, scoped to subscribers
    /// of one operation — used for `complete`/`failed`/`cancelled`, which
    /// must never be dropped (spec §4.7).
    fn send_to_subscribers_reliable(&self, operation_id: OperationId, envelope: Envelope) {
        let message = envelope.into_ws_message();
        for entry in self.clients.iter() {
            if !entry.subscriptions.contains(&operation_id) {
                continue;
            }
            let sender = entry.sender.clone();
            let msg = message.clone();
            tokio::spawn(async move {
                let _ = sender.send(msg).await;
            });
        }
    }

    /// Progress frames may be coalesced under backpressure (spec §4.7):
    /// a non-blocking `try_send` that silently drops the frame when a
    /// client's queue is full, since a fresher progress update follows
    /// shortly. A genuinely closed channel drops the client.
    fn send_progress_to_subscribers(&self, operation_id: OperationId, envelope: Envelope) {
        let message = envelope.into_ws_message();
        let mut closed = Vec::new();
        for entry in self.clients.iter() {
            if !entry.subscriptions.contains(&operation_id) {
                continue;
            }
            match entry.sender.try_send(message.clone()) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }
        for id in closed {
            self.clients.remove(&id);
        }
    }
}

impl OperationSink for LiveFabric {
    fn on_progress(&self, id: OperationId, progress: OperationProgress) {
        let envelope = Envelope::new("operation_progress", serde_json::json!({ "operation_id": id, "progress": progress }));
        self.send_progress_to_subscribers(id, envelope);
    }

    fn on_complete(&self, id: OperationId, result: Option<Value>) {
        let envelope = Envelope::new("operation_complete", serde_json::json!({ "operation_id": id, "result": result }));
        self.send_to_subscribers_reliable(id, envelope);
    }

    fn on_failed(&self, id: OperationId, error: String) {
        let envelope = Envelope::new("operation_failed", serde_json::json!({ "operation_id": id, "error": error }));
        self.send_to_subscribers_reliable(id, envelope);
    }

    fn on_cancelled(&self, id: OperationId) {
        let envelope = Envelope::new("operation_cancelled", serde_json::json!({ "operation_id": id }));
        self.send_to_subscribers_reliable(id, envelope);
    }
}

async fn ws_handler(State(fabric): State<Arc<LiveFabric>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, fabric))
}

async fn handle_socket(socket: WebSocket, fabric: Arc<LiveFabric>) {
    let client_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<WsMessage>(CLIENT_QUEUE_CAPACITY);
    fabric.clients.insert(client_id, ClientHandle { sender: tx.clone(), subscriptions: DashSet::new() });

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let forward_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if ws_sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let welcome = Envelope::new("welcome", serde_json::json!({ "client_id": client_id }));
    let _ = tx.send(welcome.into_ws_message()).await;

    while let Some(Ok(message)) = ws_receiver.next().await {
        match message {
            WsMessage::Text(text) => handle_control_frame(&fabric, client_id, &text, &tx).await,
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    fabric.clients.remove(&client_id);
    forward_task.abort();
    debug!("live fabric: client {client_id} disconnected");
}

async fn handle_control_frame(fabric: &Arc<LiveFabric>, client_id: Uuid, text: &str, tx: &mpsc::Sender<WsMessage>) {
    let frame = match serde_json::from_str::<ControlFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("live fabric: malformed control frame from {client_id}: {e}");
            return;
        }
    };
    match frame {
        ControlFrame::Subscribe { operation_id } => {
            if let Some(entry) = fabric.clients.get(&client_id) {
                entry.subscriptions.insert(operation_id);
            }
        }
        ControlFrame::Unsubscribe { operation_id } => {
            if let Some(entry) = fabric.clients.get(&client_id) {
                entry.subscriptions.remove(&operation_id);
            }
        }
        ControlFrame::GetStatus => {
            let envelope = Envelope::new("system_status", fabric.stats());
            let _ = tx.send(envelope.into_ws_message()).await;
        }
        ControlFrame::Ping => {
            let envelope = Envelope::new("heartbeat", "pong");
            let _ = tx.send(envelope.into_ws_message()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_frame_subscribe_parses_operation_id() {
        let id = OperationId::new();
        let text = serde_json::json!({ "action": "subscribe", "operation_id": id }).to_string();
        let frame: ControlFrame = serde_json::from_str(&text).unwrap();
        match frame {
            ControlFrame::Subscribe { operation_id } => assert_eq!(operation_id, id),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn control_frame_ping_and_get_status_have_no_payload() {
        let ping: ControlFrame = serde_json::from_str(r#"{"action":"ping"}"#).unwrap();
        assert!(matches!(ping, ControlFrame::Ping));
        let status: ControlFrame = serde_json::from_str(r#"{"action":"get_status"}"#).unwrap();
        assert!(matches!(status, ControlFrame::GetStatus));
    }

    #[test]
    fn envelope_carries_type_data_timestamp_and_message_id() {
        let envelope = Envelope::new("notification", serde_json::json!({ "message": "hi" }));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "notification");
        assert_eq!(value["data"]["message"], "hi");
        assert!(value.get("timestamp").is_some());
        assert!(value.get("message_id").is_some());
    }

    #[test]
    fn new_fabric_reports_zero_clients() {
        let fabric = LiveFabric::new();
        let stats = fabric.stats();
        assert_eq!(stats.connected_clients, 0);
        assert_eq!(stats.total_subscriptions, 0);
    }
}
