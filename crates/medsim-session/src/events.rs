//! Session events and the `/ws` stream.
//!
//! Every state change is broadcast so observers (a browser front end, the
//! CLI's report writer) can follow the session without polling.
//!
//! # Event Types
//!
//! - `connected` - Sent to a new WebSocket client, with the current snapshot
//! - `loading_started` - A provider call was issued
//! - `state_changed` - The session changed; carries the new snapshot
//! - `case_completed` - A case was scored and recorded
//! - `error` - A provider call failed; carries the localized message

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::session::{CompletedCase, OperationKind, SessionSnapshot};

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for `connected` and `state_changed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPayload {
    /// The session after the change.
    pub snapshot: SessionSnapshot,
}

/// Payload for `loading_started`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadingStartedPayload {
    /// The operation now in flight.
    pub operation: OperationKind,
    /// When the call was issued.
    pub timestamp: DateTime<Utc>,
}

/// Payload for `case_completed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseCompletedPayload {
    /// The archived case.
    pub case: CompletedCase,
}

/// Payload for `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// The operation that failed.
    pub operation: OperationKind,
    /// Localized message shown to the player.
    pub message: String,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Events published by a session.
///
/// Serialized as JSON objects with `event` and `payload` fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Sent to a client when it connects.
    Connected(SnapshotPayload),
    /// A provider call was issued.
    LoadingStarted(LoadingStartedPayload),
    /// The session changed.
    StateChanged(SnapshotPayload),
    /// A case was scored and recorded.
    CaseCompleted(Box<CaseCompletedPayload>),
    /// A provider call failed.
    Error(ErrorPayload),
}

impl SessionEvent {
    /// Creates a `Connected` event.
    #[must_use]
    pub const fn connected(snapshot: SessionSnapshot) -> Self {
        Self::Connected(SnapshotPayload { snapshot })
    }

    /// Creates a `LoadingStarted` event stamped now.
    #[must_use]
    pub fn loading_started(operation: OperationKind) -> Self {
        Self::LoadingStarted(LoadingStartedPayload {
            operation,
            timestamp: Utc::now(),
        })
    }

    /// Creates a `StateChanged` event.
    #[must_use]
    pub const fn state_changed(snapshot: SessionSnapshot) -> Self {
        Self::StateChanged(SnapshotPayload { snapshot })
    }

    /// Creates a `CaseCompleted` event.
    #[must_use]
    pub fn case_completed(case: CompletedCase) -> Self {
        Self::CaseCompleted(Box::new(CaseCompletedPayload { case }))
    }

    /// Creates an `Error` event with the operation's localized message.
    #[must_use]
    pub fn error(operation: OperationKind) -> Self {
        Self::Error(ErrorPayload {
            operation,
            message: operation.failure_message().to_string(),
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::LoadingStarted(_) => "loading_started",
            Self::StateChanged(_) => "state_changed",
            Self::CaseCompleted(_) => "case_completed",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Fans session events out to every subscriber.
///
/// Events are not kept for subscribers that join later.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster buffering up to `capacity` events per
    /// subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Creates a new subscriber.
    ///
    /// A subscriber that falls more than `capacity` events behind receives
    /// `Lagged` and misses the oldest events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event. Returns how many subscribers will receive it.
    pub fn send(&self, event: SessionEvent) -> usize {
        // Err only means nobody is listening
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Interval between heartbeat pings.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// `GET /ws`: upgrades to a WebSocket that streams [`SessionEvent`]s.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("New WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before reading the snapshot so no change slips between them
    let mut events = state.controller.subscribe();
    let connected = SessionEvent::connected(state.controller.snapshot());
    let connected_json = match serde_json::to_string(&connected) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize connected event: {}", e);
            return;
        }
    };

    if sender.send(Message::Text(connected_json)).await.is_err() {
        debug!("Client disconnected before receiving connected event");
        return;
    }

    info!("WebSocket client connected, sent initial snapshot");

    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    let mut missed_pongs = 0u8;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client requested close");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                        debug!("Ignoring message from client; the stream is read-only");
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(event = event.event_name(), "Failed to serialize event: {}", e);
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json)).await.is_err() {
                            debug!("Failed to send event, client disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client lagged, missed {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Event channel closed");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!("Client missed {} pongs, closing connection", MAX_MISSED_PONGS);
                    break;
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}
