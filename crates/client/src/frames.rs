//! Wire frames exchanged over the live delivery channel.
//!
//! These mirror the server's JSON contract. The client crate keeps its own
//! copies so that consumers do not pull in the server stack.

use serde::{Deserialize, Serialize};

/// Message payload carried in a `message.created` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
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

/// Server-to-client event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "body")]
pub enum ServerEvent {
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
    /// Liveness reply to a ping.
    #[serde(rename = "pong")]
    Pong,
}

/// Client-to-server frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "body")]
pub enum ClientFrame {
    /// Liveness probe.
    #[serde(rename = "ping")]
    Ping,
    /// Best-effort receipt acknowledgement.
    #[serde(rename = "ack")]
    Ack {
        #[serde(rename = "messageId")]
        message_id: String,
    },
}
