//! Message repository.
//!
//! Pages ascending over the `(created_at, id)` total order. The append path
//! also writes the sender's own read row and bumps the conversation's
//! `updated_at`, all inside one transaction.

use std::sync::Arc;

use huddle_common::{AppError, AppResult};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait, prelude::DateTimeWithTimeZone,
};

use crate::cursor::MessageCursor;
use crate::entities::conversation;
use crate::entities::message::{self, Column, Entity as Message};
use crate::entities::read_status;

/// Repository for message operations.
#[derive(Clone)]
pub struct MessageRepository {
    db: Arc<DatabaseConnection>,
}

impl MessageRepository {
    /// Create a new message repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Append a message to a conversation.
    ///
    /// Within one transaction this inserts the message, records the sender's
    /// own read row (a sender never counts their message as unread), and
    /// bumps the conversation's `updated_at`.
    #[allow(clippy::too_many_arguments)]
    pub async fn append(
        &self,
        id: String,
        conversation_id: String,
        sender_id: String,
        content: String,
        attachment_url: Option<String>,
        attachment_type: Option<String>,
        sender_read_id: String,
        now: DateTimeWithTimeZone,
    ) -> AppResult<message::Model> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let created = message::ActiveModel {
            id: Set(id),
            conversation_id: Set(conversation_id.clone()),
            sender_id: Set(sender_id.clone()),
            content: Set(content),
            attachment_url: Set(attachment_url),
            attachment_type: Set(attachment_type),
            is_edited: Set(false),
            is_deleted: Set(false),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        let sender_read = read_status::ActiveModel {
            id: Set(sender_read_id),
            message_id: Set(created.id.clone()),
            user_id: Set(sender_id),
            is_read: Set(true),
            read_at: Set(Some(now)),
        };

        read_status::Entity::insert(sender_read)
            .on_conflict(
                OnConflict::columns([read_status::Column::MessageId, read_status::Column::UserId])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        conversation::Entity::update_many()
            .col_expr(conversation::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(conversation::Column::Id.eq(conversation_id))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(created)
    }

    /// Find a message by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<message::Model>> {
        Message::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// List a page of messages in ascending `(created_at, id)` order.
    ///
    /// With a cursor, returns only messages strictly after that position, so
    /// repeated calls walk the conversation without overlap or gaps.
    pub async fn list_page(
        &self,
        conversation_id: &str,
        after: Option<&MessageCursor>,
        limit: u64,
    ) -> AppResult<Vec<message::Model>> {
        let mut query = Message::find()
            .filter(Column::ConversationId.eq(conversation_id))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id);

        if let Some(cursor) = after {
            query = query.filter(
                Condition::any()
                    .add(Column::CreatedAt.gt(cursor.created_at))
                    .add(
                        Condition::all()
                            .add(Column::CreatedAt.eq(cursor.created_at))
                            .add(Column::Id.gt(cursor.id.as_str())),
                    ),
            );
        }

        query
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find the latest message of a conversation by `(created_at, id)`.
    pub async fn find_latest(&self, conversation_id: &str) -> AppResult<Option<message::Model>> {
        Message::find()
            .filter(Column::ConversationId.eq(conversation_id))
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find IDs of messages at or before the given position, excluding ones
    /// the user sent. Feeds the bulk read-marking path.
    pub async fn find_ids_through(
        &self,
        conversation_id: &str,
        reader_id: &str,
        through: &MessageCursor,
    ) -> AppResult<Vec<String>> {
        Message::find()
            .select_only()
            .column(Column::Id)
            .filter(Column::ConversationId.eq(conversation_id))
            .filter(Column::SenderId.ne(reader_id))
            .filter(
                Condition::any()
                    .add(Column::CreatedAt.lt(through.created_at))
                    .add(
                        Condition::all()
                            .add(Column::CreatedAt.eq(through.created_at))
                            .add(Column::Id.lte(through.id.as_str())),
                    ),
            )
            .into_tuple()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Soft-delete a message. The row survives with `is_deleted` set so
    /// ordering and read rows stay intact; content is redacted at read time.
    pub async fn soft_delete(&self, id: &str, now: DateTimeWithTimeZone) -> AppResult<u64> {
        let result = Message::update_many()
            .col_expr(Column::IsDeleted, Expr::value(true))
            .col_expr(Column::UpdatedAt, Expr::value(Some(now)))
            .filter(Column::Id.eq(id))
            .filter(Column::IsDeleted.eq(false))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn create_test_message(id: &str, conversation_id: &str, sender_id: &str) -> message::Model {
        message::Model {
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: "hello".to_string(),
            attachment_url: None,
            attachment_type: None,
            is_edited: false,
            is_deleted: false,
            created_at: Utc::now().fixed_offset(),
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_append_writes_message_read_row_and_touch() {
        let msg = create_test_message("msg1", "conv1", "user1");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[msg.clone()]])
                .append_exec_results([
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1, // sender read row
                    },
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1, // conversation touch
                    },
                ])
                .into_connection(),
        );

        let repo = MessageRepository::new(db);
        let created = repo
            .append(
                "msg1".to_string(),
                "conv1".to_string(),
                "user1".to_string(),
                "hello".to_string(),
                None,
                None,
                "read1".to_string(),
                msg.created_at,
            )
            .await
            .unwrap();

        assert_eq!(created.id, "msg1");
        assert_eq!(created.conversation_id, "conv1");
    }

    #[tokio::test]
    async fn test_list_page_returns_messages() {
        let msg1 = create_test_message("msg1", "conv1", "user1");
        let msg2 = create_test_message("msg2", "conv1", "user2");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[msg1, msg2]])
                .into_connection(),
        );

        let repo = MessageRepository::new(db);
        let page = repo.list_page("conv1", None, 50).await.unwrap();

        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "msg1");
    }

    #[tokio::test]
    async fn test_list_page_with_cursor_applies_filter() {
        let msg2 = create_test_message("msg2", "conv1", "user2");
        let cursor = MessageCursor::new(Utc::now().fixed_offset(), "msg1".to_string());

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[msg2]])
                .into_connection(),
        );

        let repo = MessageRepository::new(db);
        let page = repo.list_page("conv1", Some(&cursor), 50).await.unwrap();

        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "msg2");
    }

    #[tokio::test]
    async fn test_soft_delete_reports_zero_when_already_deleted() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .into_connection(),
        );

        let repo = MessageRepository::new(db);
        let affected = repo
            .soft_delete("msg1", Utc::now().fixed_offset())
            .await
            .unwrap();

        assert_eq!(affected, 0);
    }
}
