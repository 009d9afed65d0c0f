//! Delivery publisher service.
//!
//! Abstraction for pushing live events to connected clients. The actual
//! implementation lives in the API crate, where the connection registry is;
//! core services publish through this trait without knowing about sockets.

use async_trait::async_trait;
use huddle_common::AppResult;
use huddle_db::entities::message;
use std::sync::Arc;

/// Trait for publishing live delivery events.
///
/// Delivery is best-effort: callers log failures and carry on, because
/// disconnected recipients reconcile through the paginated fetch and the
/// unread count on their next connect.
#[async_trait]
pub trait DeliveryPublisher: Send + Sync {
    /// Push a `message.created` event to the given recipients.
    async fn publish_message_created(
        &self,
        recipient_ids: &[String],
        conversation_id: &str,
        message: &message::Model,
    ) -> AppResult<()>;

    /// Push a `read.updated` event to the given recipients.
    async fn publish_read_updated(
        &self,
        recipient_ids: &[String],
        conversation_id: &str,
        reader_id: &str,
        through_message_id: &str,
    ) -> AppResult<()>;
}

/// A no-op implementation for testing or when live delivery is disabled.
#[derive(Clone, Default)]
pub struct NoOpDeliveryPublisher;

#[async_trait]
impl DeliveryPublisher for NoOpDeliveryPublisher {
    async fn publish_message_created(
        &self,
        _recipient_ids: &[String],
        _conversation_id: &str,
        _message: &message::Model,
    ) -> AppResult<()> {
        Ok(())
    }

    async fn publish_read_updated(
        &self,
        _recipient_ids: &[String],
        _conversation_id: &str,
        _reader_id: &str,
        _through_message_id: &str,
    ) -> AppResult<()> {
        Ok(())
    }
}

/// Wrapper for boxed `DeliveryPublisher` trait object.
pub type DeliveryPublisherService = Arc<dyn DeliveryPublisher>;
