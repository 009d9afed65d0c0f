//! Read status repository.
//!
//! All writes go through `ON CONFLICT (message_id, user_id) DO NOTHING`
//! upserts, which makes read-marking idempotent under retries and concurrent
//! sessions without any application-side locking.

use std::sync::Arc;

use huddle_common::{AppError, AppResult, IdGenerator};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, EntityTrait, Set, Statement,
    prelude::DateTimeWithTimeZone,
};

use crate::entities::read_status::{self, Column, Entity as ReadStatus};

/// Repository for read status operations.
#[derive(Clone)]
pub struct ReadStatusRepository {
    db: Arc<DatabaseConnection>,
    id_gen: IdGenerator,
}

impl ReadStatusRepository {
    /// Create a new read status repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            id_gen: IdGenerator::new(),
        }
    }

    /// Mark a single message as read by a user.
    ///
    /// Returns the number of rows written: zero means the user had already
    /// read the message and the original `read_at` stands.
    pub async fn mark_read(
        &self,
        message_id: String,
        user_id: String,
        now: DateTimeWithTimeZone,
    ) -> AppResult<u64> {
        let active_model = read_status::ActiveModel {
            id: Set(self.id_gen.generate()),
            message_id: Set(message_id),
            user_id: Set(user_id),
            is_read: Set(true),
            read_at: Set(Some(now)),
        };

        ReadStatus::insert(active_model)
            .on_conflict(
                OnConflict::columns([Column::MessageId, Column::UserId])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Mark a batch of messages as read by a user in one statement.
    ///
    /// Already-read messages are skipped by the conflict target, so only the
    /// newly-read count comes back.
    pub async fn mark_many_read(
        &self,
        message_ids: Vec<String>,
        user_id: &str,
        now: DateTimeWithTimeZone,
    ) -> AppResult<u64> {
        if message_ids.is_empty() {
            return Ok(0);
        }

        let rows = message_ids.into_iter().map(|message_id| {
            read_status::ActiveModel {
                id: Set(self.id_gen.generate()),
                message_id: Set(message_id),
                user_id: Set(user_id.to_string()),
                is_read: Set(true),
                read_at: Set(Some(now)),
            }
        });

        ReadStatus::insert_many(rows)
            .on_conflict(
                OnConflict::columns([Column::MessageId, Column::UserId])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Count messages a user has not read in a conversation.
    ///
    /// Counts only messages from other senders created at or after `since`
    /// (the user's latest join), skipping soft-deleted rows. An absent read
    /// row means unread, so this is an anti-join rather than a flag scan.
    pub async fn count_unread(
        &self,
        conversation_id: &str,
        user_id: &str,
        since: DateTimeWithTimeZone,
    ) -> AppResult<u64> {
        let sql = r"
            SELECT COUNT(*) AS unread FROM message m
            WHERE m.conversation_id = $1
              AND m.sender_id <> $2
              AND m.is_deleted = FALSE
              AND m.created_at >= $3
              AND NOT EXISTS (
                  SELECT 1 FROM read_status r
                  WHERE r.message_id = m.id
                    AND r.user_id = $2
                    AND r.is_read = TRUE
              )
        ";

        let row = self
            .db
            .query_one(Statement::from_sql_and_values(
                sea_orm::DatabaseBackend::Postgres,
                sql,
                [conversation_id.into(), user_id.into(), since.into()],
            ))
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let count = match row {
            Some(row) => row
                .try_get::<i64>("", "unread")
                .map_err(|e| AppError::Database(e.to_string()))?,
            None => 0,
        };

        Ok(u64::try_from(count).unwrap_or(0))
    }
}
