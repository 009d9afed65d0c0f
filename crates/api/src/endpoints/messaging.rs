//! Messaging endpoints for conversations, messages, and read state.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use huddle_common::AppResult;
use huddle_core::services::conversation::SendMessageInput;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// Create messaging router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/conversations", post(start_conversation))
        .route("/conversations", get(list_conversations))
        .route("/conversations/{conversation_id}/messages", get(list_messages))
        .route("/conversations/{conversation_id}/messages", post(send_message))
        .route("/conversations/{conversation_id}/read", post(mark_read))
        .route("/conversations/{conversation_id}/unread", get(get_unread_count))
        .route(
            "/conversations/{conversation_id}/participants",
            post(add_participant),
        )
        .route(
            "/conversations/{conversation_id}/participants",
            delete(leave_conversation),
        )
        .route("/messages/{message_id}", delete(delete_message))
}

/// Conversation response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<huddle_db::entities::conversation::Model> for ConversationResponse {
    fn from(conversation: huddle_db::entities::conversation::Model) -> Self {
        Self {
            id: conversation.id,
            created_at: conversation.created_at.into(),
            updated_at: conversation.updated_at.map(Into::into),
        }
    }
}

/// Message response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub attachment_url: Option<String>,
    pub attachment_type: Option<String>,
    pub is_edited: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<huddle_db::entities::message::Model> for MessageResponse {
    fn from(msg: huddle_db::entities::message::Model) -> Self {
        Self {
            id: msg.id,
            conversation_id: msg.conversation_id,
            sender_id: msg.sender_id,
            content: msg.content,
            attachment_url: msg.attachment_url,
            attachment_type: msg.attachment_type,
            is_edited: msg.is_edited,
            is_deleted: msg.is_deleted,
            created_at: msg.created_at.into(),
            updated_at: msg.updated_at.map(Into::into),
        }
    }
}

/// Participant user response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<huddle_db::entities::user::Model> for UserResponse {
    fn from(user: huddle_db::entities::user::Model) -> Self {
        Self {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
        }
    }
}

const fn default_conversations_limit() -> u64 {
    20
}

const fn default_messages_limit() -> u64 {
    50
}

/// Start conversation request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConversationRequest {
    pub participant_ids: Vec<String>,
}

/// Start a conversation with one or more other users.
async fn start_conversation(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<StartConversationRequest>,
) -> AppResult<ApiResponse<ConversationResponse>> {
    info!(initiator = %user.id, "Starting conversation");

    let conversation = state
        .conversation_service
        .start_conversation(&user.id, req.participant_ids)
        .await?;

    Ok(ApiResponse::ok(ConversationResponse::from(conversation)))
}

/// Conversation summary response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummaryResponse {
    pub conversation: ConversationResponse,
    pub participants: Vec<UserResponse>,
    pub last_message: Option<MessageResponse>,
    pub unread_count: u64,
}

/// List conversations response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationsListResponse {
    pub conversations: Vec<ConversationSummaryResponse>,
}

/// List conversations query.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListConversationsQuery {
    #[serde(default = "default_conversations_limit")]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
}

/// List the authenticated user's conversations, most recently active first.
async fn list_conversations(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ListConversationsQuery>,
) -> AppResult<ApiResponse<ConversationsListResponse>> {
    let summaries = state
        .conversation_service
        .conversation_overview(&user.id, query.limit, query.offset)
        .await?;

    let conversations = summaries
        .into_iter()
        .map(|s| ConversationSummaryResponse {
            conversation: ConversationResponse::from(s.conversation),
            participants: s.participants.into_iter().map(UserResponse::from).collect(),
            last_message: s.last_message.map(MessageResponse::from),
            unread_count: s.unread_count,
        })
        .collect();

    Ok(ApiResponse::ok(ConversationsListResponse { conversations }))
}

/// List messages query.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMessagesQuery {
    #[serde(default = "default_messages_limit")]
    pub limit: u64,
    pub cursor: Option<String>,
}

/// Message list response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageListResponse {
    pub messages: Vec<MessageResponse>,
    pub next_cursor: Option<String>,
}

/// List a page of messages in a conversation.
async fn list_messages(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
) -> AppResult<ApiResponse<MessageListResponse>> {
    let page = state
        .conversation_service
        .list_messages(&conversation_id, &user.id, query.cursor.as_deref(), query.limit)
        .await?;

    Ok(ApiResponse::ok(MessageListResponse {
        messages: page.messages.into_iter().map(MessageResponse::from).collect(),
        next_cursor: page.next_cursor,
    }))
}

/// Send message request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: String,
    pub attachment_url: Option<String>,
    pub attachment_type: Option<String>,
}

/// Send a message to a conversation.
async fn send_message(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<ApiResponse<MessageResponse>> {
    info!(sender = %user.id, conversation = %conversation_id, "Sending message");

    let message = state
        .conversation_service
        .send_message(
            &conversation_id,
            &user.id,
            SendMessageInput {
                content: req.content,
                attachment_url: req.attachment_url,
                attachment_type: req.attachment_type,
            },
        )
        .await?;

    Ok(ApiResponse::ok(MessageResponse::from(message)))
}

/// Mark read request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub through_message_id: String,
}

/// Mark read response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    pub read_count: u64,
}

/// Mark all messages up to a position as read.
async fn mark_read(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(req): Json<MarkReadRequest>,
) -> AppResult<ApiResponse<MarkReadResponse>> {
    let read_count = state
        .conversation_service
        .mark_conversation_read(&conversation_id, &user.id, &req.through_message_id)
        .await?;

    Ok(ApiResponse::ok(MarkReadResponse { read_count }))
}

/// Unread count response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub count: u64,
}

/// Get unread message count in a conversation.
async fn get_unread_count(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> AppResult<ApiResponse<UnreadCountResponse>> {
    let count = state
        .conversation_service
        .unread_count(&conversation_id, &user.id)
        .await?;

    Ok(ApiResponse::ok(UnreadCountResponse { count }))
}

/// Add participant request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddParticipantRequest {
    pub user_id: String,
}

/// Participant response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantResponse {
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
}

/// Add a user to a conversation.
async fn add_participant(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(req): Json<AddParticipantRequest>,
) -> AppResult<ApiResponse<ParticipantResponse>> {
    info!(
        inviter = %user.id,
        invitee = %req.user_id,
        conversation = %conversation_id,
        "Adding participant"
    );

    let participant = state
        .conversation_service
        .add_participant(&conversation_id, &user.id, &req.user_id)
        .await?;

    Ok(ApiResponse::ok(ParticipantResponse {
        id: participant.id,
        conversation_id: participant.conversation_id,
        user_id: participant.user_id,
        joined_at: participant.joined_at.into(),
    }))
}

/// Leave a conversation.
async fn leave_conversation(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> AppResult<ApiResponse<()>> {
    info!(user = %user.id, conversation = %conversation_id, "Leaving conversation");

    state
        .conversation_service
        .remove_participant(&conversation_id, &user.id)
        .await?;

    Ok(ApiResponse::ok(()))
}

/// Soft-delete a message.
async fn delete_message(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> AppResult<ApiResponse<()>> {
    info!(user = %user.id, message = %message_id, "Deleting message");

    state
        .conversation_service
        .delete_message(&message_id, &user.id)
        .await?;

    Ok(ApiResponse::ok(()))
}
