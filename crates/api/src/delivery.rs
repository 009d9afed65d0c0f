//! Live delivery channel.
//!
//! Keeps one WebSocket per connected client session and pushes
//! `message.created` and `read.updated` events published by the conversation
//! service. Delivery is best-effort and at-most-once: a frame that cannot be
//! handed to a session is dropped, and the client reconciles through the
//! paginated fetch plus the unread count after its next connect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use huddle_common::{AppResult, IdGenerator};
use huddle_core::DeliveryPublisher;
use huddle_db::entities::{message, user};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::middleware::AppState;

/// Streaming query parameters.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Session-verified user id (supplied by the identity layer).
    #[serde(rename = "i")]
    pub token: Option<String>,
}

/// Message payload carried in a `message.created` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub attachment_url: Option<String>,
    pub attachment_type: Option<String>,
    pub is_edited: bool,
    pub is_deleted: bool,
    pub created_at: String,
}

impl From<&message::Model> for MessagePayload {
    fn from(msg: &message::Model) -> Self {
        Self {
            id: msg.id.clone(),
            conversation_id: msg.conversation_id.clone(),
            sender_id: msg.sender_id.clone(),
            content: msg.content.clone(),
            attachment_url: msg.attachment_url.clone(),
            attachment_type: msg.attachment_type.clone(),
            is_edited: msg.is_edited,
            is_deleted: msg.is_deleted,
            created_at: msg.created_at.to_rfc3339(),
        }
    }
}

/// Server-to-client frame.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "body")]
pub enum ServerFrame {
    /// A new message was appended to a conversation the user is in.
    #[serde(rename = "message.created")]
    MessageCreated {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        message: MessagePayload,
    },
    /// Another participant advanced their read position.
    #[serde(rename = "read.updated")]
    ReadUpdated {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "throughMessageId")]
        through_message_id: String,
    },
    /// Liveness reply to a client ping.
    #[serde(rename = "pong")]
    Pong,
}

/// Client-to-server frame.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "body")]
pub enum ClientFrame {
    /// Liveness probe; resets the stale timer.
    #[serde(rename = "ping")]
    Ping,
    /// Best-effort receipt acknowledgement.
    #[serde(rename = "ack")]
    Ack {
        #[serde(rename = "messageId")]
        message_id: String,
    },
}

struct Session {
    id: String,
    tx: mpsc::Sender<ServerFrame>,
}

/// Per-process table of live connections, keyed by user id.
///
/// A user may hold several sessions (multiple tabs or devices); each gets
/// its own bounded outbound queue. Sessions are added on socket open and
/// removed on close, with no global singleton anywhere.
#[derive(Clone)]
pub struct DeliveryRegistry {
    sessions: Arc<RwLock<HashMap<String, Vec<Session>>>>,
    queue_size: usize,
    stale_after: Duration,
    id_gen: IdGenerator,
}

impl DeliveryRegistry {
    /// Create a registry whose sessions buffer up to `queue_size` frames and
    /// are closed after `stale_after` of client silence.
    #[must_use]
    pub fn new(queue_size: usize, stale_after: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            queue_size,
            stale_after,
            id_gen: IdGenerator::new(),
        }
    }

    /// How long a session may stay silent before it is closed.
    #[must_use]
    pub const fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Register a new session for a user. Returns the session id and the
    /// receiving half of its outbound queue.
    pub async fn register(&self, user_id: &str) -> (String, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(self.queue_size);
        let session_id = self.id_gen.generate();

        let mut sessions = self.sessions.write().await;
        sessions.entry(user_id.to_string()).or_default().push(Session {
            id: session_id.clone(),
            tx,
        });

        (session_id, rx)
    }

    /// Remove a session. The user's entry disappears with its last session.
    pub async fn unregister(&self, user_id: &str, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(list) = sessions.get_mut(user_id) {
            list.retain(|s| s.id != session_id);
            if list.is_empty() {
                sessions.remove(user_id);
            }
        }
    }

    /// Queue a frame for every session of a user. Returns how many sessions
    /// accepted it; full or closed queues drop the frame.
    pub async fn send_to_user(&self, user_id: &str, frame: &ServerFrame) -> usize {
        let sessions = self.sessions.read().await;
        let Some(list) = sessions.get(user_id) else {
            return 0;
        };

        let mut delivered = 0;
        for session in list {
            match session.tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(user_id, session_id = %session.id, error = %e, "Dropping frame");
                }
            }
        }
        delivered
    }

    /// Number of currently connected sessions across all users.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl DeliveryPublisher for DeliveryRegistry {
    async fn publish_message_created(
        &self,
        recipient_ids: &[String],
        conversation_id: &str,
        message: &message::Model,
    ) -> AppResult<()> {
        let frame = ServerFrame::MessageCreated {
            conversation_id: conversation_id.to_string(),
            message: MessagePayload::from(message),
        };

        for user_id in recipient_ids {
            let delivered = self.send_to_user(user_id, &frame).await;
            debug!(user_id, delivered, "message.created fan-out");
        }

        Ok(())
    }

    async fn publish_read_updated(
        &self,
        recipient_ids: &[String],
        conversation_id: &str,
        reader_id: &str,
        through_message_id: &str,
    ) -> AppResult<()> {
        let frame = ServerFrame::ReadUpdated {
            conversation_id: conversation_id.to_string(),
            user_id: reader_id.to_string(),
            through_message_id: through_message_id.to_string(),
        };

        for user_id in recipient_ids {
            let delivered = self.send_to_user(user_id, &frame).await;
            debug!(user_id, delivered, "read.updated fan-out");
        }

        Ok(())
    }
}

/// WebSocket handler for the live delivery channel.
pub async fn streaming_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<StreamQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let Some(token) = query.token else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let user = match state.user_repo.find_by_id(&token).await {
        Ok(Some(user)) => user,
        Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(e) => return e.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, user, state))
}

/// Drive one connection: add to the registry, pump frames both ways,
/// remove from the registry on any exit path.
async fn handle_socket(socket: WebSocket, user: user::Model, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (session_id, mut outbound) = state.delivery.register(&user.id).await;

    info!(user_id = %user.id, session_id = %session_id, "Delivery channel opened");

    let mut last_seen = Instant::now();
    let mut stale_check = tokio::time::interval(Duration::from_secs(15));

    loop {
        tokio::select! {
            // Frames published for this session
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let json = serde_json::to_string(&frame).unwrap_or_default();
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }

            // Frames from the client
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Ping) => {
                                let json = serde_json::to_string(&ServerFrame::Pong)
                                    .unwrap_or_default();
                                if sender.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            Ok(ClientFrame::Ack { message_id }) => {
                                debug!(user_id = %user.id, message_id, "Client ack");
                            }
                            Err(e) => {
                                warn!(user_id = %user.id, error = %e, "Unparseable client frame");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_seen = Instant::now();
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(user_id = %user.id, error = %e, "WebSocket error");
                        break;
                    }
                }
            }

            // Stale connection sweep
            _ = stale_check.tick() => {
                if last_seen.elapsed() > state.delivery.stale_after() {
                    info!(user_id = %user.id, session_id = %session_id, "Closing stale connection");
                    break;
                }
            }
        }
    }

    state.delivery.unregister(&user.id, &session_id).await;
    info!(user_id = %user.id, session_id = %session_id, "Delivery channel closed");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_message() -> message::Model {
        message::Model {
            id: "msg1".to_string(),
            conversation_id: "conv1".to_string(),
            sender_id: "user1".to_string(),
            content: "hello".to_string(),
            attachment_url: None,
            attachment_type: None,
            is_edited: false,
            is_deleted: false,
            created_at: Utc::now().fixed_offset(),
            updated_at: None,
        }
    }

    #[test]
    fn test_server_frame_wire_format() {
        let frame = ServerFrame::MessageCreated {
            conversation_id: "conv1".to_string(),
            message: MessagePayload::from(&test_message()),
        };

        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"message.created\""));
        assert!(json.contains("\"conversationId\":\"conv1\""));
        assert!(json.contains("\"senderId\":\"user1\""));
    }

    #[test]
    fn test_client_frame_parses_ping_and_ack() {
        let ping: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(ping, ClientFrame::Ping));

        let ack: ClientFrame =
            serde_json::from_str(r#"{"type":"ack","body":{"messageId":"msg1"}}"#).unwrap();
        assert!(matches!(ack, ClientFrame::Ack { message_id } if message_id == "msg1"));
    }

    #[tokio::test]
    async fn test_registry_lifecycle() {
        let registry = DeliveryRegistry::new(8, Duration::from_secs(90));

        let (session_id, mut rx) = registry.register("user1").await;
        assert_eq!(registry.session_count().await, 1);

        let delivered = registry.send_to_user("user1", &ServerFrame::Pong).await;
        assert_eq!(delivered, 1);
        assert!(matches!(rx.recv().await, Some(ServerFrame::Pong)));

        // Unknown user: nothing to deliver to.
        assert_eq!(registry.send_to_user("ghost", &ServerFrame::Pong).await, 0);

        registry.unregister("user1", &session_id).await;
        assert_eq!(registry.session_count().await, 0);
        assert_eq!(registry.send_to_user("user1", &ServerFrame::Pong).await, 0);
    }

    #[tokio::test]
    async fn test_registry_supports_multiple_sessions_per_user() {
        let registry = DeliveryRegistry::new(8, Duration::from_secs(90));

        let (s1, mut rx1) = registry.register("user1").await;
        let (_s2, mut rx2) = registry.register("user1").await;
        assert_eq!(registry.session_count().await, 2);

        let delivered = registry.send_to_user("user1", &ServerFrame::Pong).await;
        assert_eq!(delivered, 2);
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());

        registry.unregister("user1", &s1).await;
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_frames() {
        let registry = DeliveryRegistry::new(1, Duration::from_secs(90));

        let (_session, _rx) = registry.register("user1").await;
        assert_eq!(registry.send_to_user("user1", &ServerFrame::Pong).await, 1);
        // Queue of one is now full; the next frame is dropped, not queued.
        assert_eq!(registry.send_to_user("user1", &ServerFrame::Pong).await, 0);
    }

    #[tokio::test]
    async fn test_publisher_fans_out_to_each_recipient() {
        let registry = DeliveryRegistry::new(8, Duration::from_secs(90));
        let (_sa, mut rx_a) = registry.register("userA").await;
        let (_sb, mut rx_b) = registry.register("userB").await;

        let recipients = vec!["userA".to_string(), "userB".to_string()];
        registry
            .publish_message_created(&recipients, "conv1", &test_message())
            .await
            .unwrap();

        assert!(matches!(
            rx_a.recv().await,
            Some(ServerFrame::MessageCreated { .. })
        ));
        assert!(matches!(
            rx_b.recv().await,
            Some(ServerFrame::MessageCreated { .. })
        ));
    }
}
