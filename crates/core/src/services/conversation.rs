//! Conversation service.
//!
//! Enforces the conversation-level business rules over the repositories:
//! who may write, what counts as unread, how far history is visible, and
//! when live delivery fan-out happens. This is the only writer of messages
//! and read rows.

use chrono::Utc;
use huddle_common::{AppError, AppResult, IdGenerator};
use huddle_db::cursor::MessageCursor;
use huddle_db::entities::{conversation, message, participant, user};
use huddle_db::repositories::{
    ConversationRepository, MessageRepository, ReadStatusRepository, UserRepository,
};

use crate::services::delivery::DeliveryPublisherService;

/// Maximum message content length after trimming.
pub const MAX_CONTENT_LENGTH: usize = 10_000;

/// Input for sending a message.
pub struct SendMessageInput {
    pub content: String,
    pub attachment_url: Option<String>,
    pub attachment_type: Option<String>,
}

/// One page of a conversation's messages, ascending by `(created_at, id)`.
pub struct MessagePage {
    /// Messages with deleted content already redacted.
    pub messages: Vec<message::Model>,
    /// Cursor for the next page, absent when this page reached the end of
    /// what the caller may see.
    pub next_cursor: Option<String>,
}

/// Conversation summary for the overview listing.
pub struct ConversationSummary {
    pub conversation: conversation::Model,
    pub participants: Vec<user::Model>,
    pub last_message: Option<message::Model>,
    pub unread_count: u64,
}

/// Conversation service.
#[derive(Clone)]
pub struct ConversationService {
    conversation_repo: ConversationRepository,
    message_repo: MessageRepository,
    read_status_repo: ReadStatusRepository,
    user_repo: UserRepository,
    delivery: Option<DeliveryPublisherService>,
    id_gen: IdGenerator,
}

impl ConversationService {
    /// Create a new conversation service.
    #[must_use]
    pub const fn new(
        conversation_repo: ConversationRepository,
        message_repo: MessageRepository,
        read_status_repo: ReadStatusRepository,
        user_repo: UserRepository,
    ) -> Self {
        Self {
            conversation_repo,
            message_repo,
            read_status_repo,
            user_repo,
            delivery: None,
            id_gen: IdGenerator::new(),
        }
    }

    /// Set the delivery publisher for live fan-out.
    pub fn set_delivery_publisher(&mut self, delivery: DeliveryPublisherService) {
        self.delivery = Some(delivery);
    }

    /// Start a conversation between the initiator and the given other users.
    ///
    /// The initiator is included exactly once no matter what the caller
    /// passes. Identical participant sets are not de-duplicated: two
    /// concurrent calls produce two distinct conversations.
    pub async fn start_conversation(
        &self,
        initiator_id: &str,
        other_user_ids: Vec<String>,
    ) -> AppResult<conversation::Model> {
        let mut user_ids: Vec<String> = vec![initiator_id.to_string()];
        for id in other_user_ids {
            if !user_ids.contains(&id) {
                user_ids.push(id);
            }
        }

        if user_ids.len() < 2 {
            return Err(AppError::Validation(
                "A conversation needs at least 2 distinct participants".to_string(),
            ));
        }

        let found = self.user_repo.find_by_ids(&user_ids).await?;
        if found.len() != user_ids.len() {
            let missing = user_ids
                .iter()
                .find(|id| !found.iter().any(|u| &u.id == *id))
                .cloned()
                .unwrap_or_default();
            return Err(AppError::NotFound(format!("User not found: {missing}")));
        }

        let participants = user_ids
            .into_iter()
            .map(|user_id| (self.id_gen.generate(), user_id))
            .collect();

        self.conversation_repo
            .create_with_participants(
                self.id_gen.generate(),
                participants,
                Utc::now().fixed_offset(),
            )
            .await
    }

    /// Send a message to a conversation.
    ///
    /// Persists first, then fans out `message.created` to every other ACTIVE
    /// participant. Fan-out failures are logged and never fail the send; the
    /// sender gets the created message back once it is durable.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        input: SendMessageInput,
    ) -> AppResult<message::Model> {
        self.conversation_repo
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Conversation not found: {conversation_id}"))
            })?;

        self.conversation_repo
            .find_active_participant(conversation_id, sender_id)
            .await?
            .ok_or_else(|| {
                AppError::Forbidden("Not an active participant of this conversation".to_string())
            })?;

        let content = input.content.trim().to_string();
        if content.is_empty() {
            return Err(AppError::Validation(
                "Message content must not be empty".to_string(),
            ));
        }
        if content.len() > MAX_CONTENT_LENGTH {
            return Err(AppError::Validation(format!(
                "Message content exceeds {MAX_CONTENT_LENGTH} characters"
            )));
        }
        if input.attachment_url.is_some() != input.attachment_type.is_some() {
            return Err(AppError::Validation(
                "Attachment URL and type must be given together".to_string(),
            ));
        }

        let created = self
            .message_repo
            .append(
                self.id_gen.generate(),
                conversation_id.to_string(),
                sender_id.to_string(),
                content,
                input.attachment_url,
                input.attachment_type,
                self.id_gen.generate(),
                Utc::now().fixed_offset(),
            )
            .await?;

        // Everything past the append is best-effort: the message is durable
        // and the sender must get it back even if fan-out cannot happen.
        if let Some(ref delivery) = self.delivery {
            match self
                .other_active_participants(conversation_id, sender_id)
                .await
            {
                Ok(recipients) => {
                    if let Err(e) = delivery
                        .publish_message_created(&recipients, conversation_id, &created)
                        .await
                    {
                        tracing::warn!(error = %e, conversation_id, "Failed to publish message.created");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, conversation_id, "Failed to resolve message.created recipients");
                }
            }
        }

        Ok(created)
    }

    /// List a page of messages visible to the user.
    ///
    /// Any current or past participant may read. ACTIVE members (including
    /// rejoined ones) see the whole thread; LEFT members see only messages
    /// created up to when they left. Deleted messages keep their position
    /// but come back redacted.
    pub async fn list_messages(
        &self,
        conversation_id: &str,
        user_id: &str,
        cursor: Option<&str>,
        limit: u64,
    ) -> AppResult<MessagePage> {
        self.conversation_repo
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Conversation not found: {conversation_id}"))
            })?;

        let history = self
            .conversation_repo
            .find_membership_history(conversation_id, user_id)
            .await?;
        if history.is_empty() {
            return Err(AppError::Forbidden(
                "Not a participant of this conversation".to_string(),
            ));
        }

        let visible_until = if history.iter().any(participant::Model::is_active) {
            None
        } else {
            history.iter().filter_map(|p| p.left_at).max()
        };

        let after = cursor.map(MessageCursor::decode).transpose()?;
        let limit = limit.clamp(1, 100);

        let fetched = self
            .message_repo
            .list_page(conversation_id, after.as_ref(), limit)
            .await?;
        let fetched_len = fetched.len() as u64;

        let messages: Vec<message::Model> = fetched
            .into_iter()
            .filter(|m| visible_until.is_none_or(|until| m.created_at <= until))
            .map(redact)
            .collect();

        // A clipped page means the user's visibility window ended here.
        let next_cursor = if fetched_len == limit && messages.len() as u64 == fetched_len {
            messages
                .last()
                .map(|m| MessageCursor::new(m.created_at, m.id.clone()).encode())
        } else {
            None
        };

        Ok(MessagePage {
            messages,
            next_cursor,
        })
    }

    /// Mark all messages up to and including `through_message_id` as read.
    ///
    /// Idempotent: already-read messages are untouched and keep their
    /// original read timestamp. Publishes `read.updated` to the other
    /// active participants and returns the newly-read count.
    pub async fn mark_conversation_read(
        &self,
        conversation_id: &str,
        user_id: &str,
        through_message_id: &str,
    ) -> AppResult<u64> {
        self.conversation_repo
            .find_active_participant(conversation_id, user_id)
            .await?
            .ok_or_else(|| {
                AppError::Forbidden("Not an active participant of this conversation".to_string())
            })?;

        let through = self
            .message_repo
            .find_by_id(through_message_id)
            .await?
            .filter(|m| m.conversation_id == conversation_id)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Message not found in conversation: {through_message_id}"
                ))
            })?;

        let position = MessageCursor::new(through.created_at, through.id.clone());
        let message_ids = self
            .message_repo
            .find_ids_through(conversation_id, user_id, &position)
            .await?;

        let newly_read = self
            .read_status_repo
            .mark_many_read(message_ids, user_id, Utc::now().fixed_offset())
            .await?;

        // Read rows are already written; a fan-out hiccup must not undo the
        // caller's result.
        if let Some(ref delivery) = self.delivery {
            match self
                .other_active_participants(conversation_id, user_id)
                .await
            {
                Ok(recipients) => {
                    if let Err(e) = delivery
                        .publish_read_updated(&recipients, conversation_id, user_id, &through.id)
                        .await
                    {
                        tracing::warn!(error = %e, conversation_id, "Failed to publish read.updated");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, conversation_id, "Failed to resolve read.updated recipients");
                }
            }
        }

        Ok(newly_read)
    }

    /// Count unread messages for an active participant.
    ///
    /// Counts messages from other senders created since the user's current
    /// join, with no read row yet.
    pub async fn unread_count(&self, conversation_id: &str, user_id: &str) -> AppResult<u64> {
        let membership = self
            .conversation_repo
            .find_active_participant(conversation_id, user_id)
            .await?
            .ok_or_else(|| {
                AppError::Forbidden("Not an active participant of this conversation".to_string())
            })?;

        self.read_status_repo
            .count_unread(conversation_id, user_id, membership.joined_at)
            .await
    }

    /// Add a user to a conversation. Any active participant may invite.
    pub async fn add_participant(
        &self,
        conversation_id: &str,
        inviter_id: &str,
        user_id: &str,
    ) -> AppResult<participant::Model> {
        self.conversation_repo
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Conversation not found: {conversation_id}"))
            })?;

        self.conversation_repo
            .find_active_participant(conversation_id, inviter_id)
            .await?
            .ok_or_else(|| {
                AppError::Forbidden("Not an active participant of this conversation".to_string())
            })?;

        self.user_repo
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User not found: {user_id}")))?;

        if self
            .conversation_repo
            .find_active_participant(conversation_id, user_id)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(
                "User is already an active participant".to_string(),
            ));
        }

        self.conversation_repo
            .add_participant(
                self.id_gen.generate(),
                conversation_id.to_string(),
                user_id.to_string(),
                Utc::now().fixed_offset(),
            )
            .await
    }

    /// Leave a conversation by closing the active membership.
    pub async fn remove_participant(&self, conversation_id: &str, user_id: &str) -> AppResult<()> {
        let closed = self
            .conversation_repo
            .mark_left(conversation_id, user_id, Utc::now().fixed_offset())
            .await?;

        if closed == 0 {
            return Err(AppError::NotFound(
                "Not an active participant of this conversation".to_string(),
            ));
        }

        Ok(())
    }

    /// Soft-delete a message. Only the sender may delete; repeating the
    /// call on an already-deleted message is a no-op.
    pub async fn delete_message(&self, message_id: &str, user_id: &str) -> AppResult<()> {
        let message = self
            .message_repo
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Message not found: {message_id}")))?;

        if message.sender_id != user_id {
            return Err(AppError::Forbidden(
                "Cannot delete another user's message".to_string(),
            ));
        }

        self.message_repo
            .soft_delete(message_id, Utc::now().fixed_offset())
            .await?;

        Ok(())
    }

    /// List the user's conversations, most recently active first, with the
    /// latest message and unread count for each.
    pub async fn conversation_overview(
        &self,
        user_id: &str,
        limit: u64,
        offset: u64,
    ) -> AppResult<Vec<ConversationSummary>> {
        let conversations = self
            .conversation_repo
            .find_for_user(user_id, limit, offset)
            .await?;

        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let members = self
                .conversation_repo
                .find_active_participants(&conversation.id)
                .await?;

            let member_ids: Vec<String> = members.iter().map(|p| p.user_id.clone()).collect();
            let participants = self.user_repo.find_by_ids(&member_ids).await?;

            let last_message = self
                .message_repo
                .find_latest(&conversation.id)
                .await?
                .map(redact);

            let joined_at = members
                .iter()
                .find(|p| p.user_id == user_id)
                .map(|p| p.joined_at);

            let unread_count = match joined_at {
                Some(since) => {
                    self.read_status_repo
                        .count_unread(&conversation.id, user_id, since)
                        .await?
                }
                None => 0,
            };

            summaries.push(ConversationSummary {
                conversation,
                participants,
                last_message,
                unread_count,
            });
        }

        Ok(summaries)
    }

    async fn other_active_participants(
        &self,
        conversation_id: &str,
        except_user_id: &str,
    ) -> AppResult<Vec<String>> {
        Ok(self
            .conversation_repo
            .find_active_participants(conversation_id)
            .await?
            .into_iter()
            .filter(|p| p.user_id != except_user_id)
            .map(|p| p.user_id)
            .collect())
    }
}

/// Strip deleted content before it reaches any client-facing surface.
fn redact(mut message: message::Model) -> message::Model {
    if message.is_deleted {
        message.content.clear();
        message.attachment_url = None;
        message.attachment_type = None;
    }
    message
}
