//! Conversation repository.
//!
//! Owns both the `conversation` rows and the `participant` membership rows,
//! since every conversation mutation touches the two together.

use std::sync::Arc;

use huddle_common::{AppError, AppResult};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait, prelude::DateTimeWithTimeZone,
};

use crate::entities::conversation::{self, Entity as Conversation};
use crate::entities::participant::{self, Entity as Participant};

/// Repository for conversation and participant operations.
#[derive(Clone)]
pub struct ConversationRepository {
    db: Arc<DatabaseConnection>,
}

impl ConversationRepository {
    /// Create a new conversation repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Create a conversation together with its initial participant rows.
    ///
    /// `participants` pairs a pre-generated row ID with the user ID. The
    /// insert runs in a transaction so a half-created conversation never
    /// becomes visible.
    pub async fn create_with_participants(
        &self,
        id: String,
        participants: Vec<(String, String)>,
        now: DateTimeWithTimeZone,
    ) -> AppResult<conversation::Model> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let created = conversation::ActiveModel {
            id: Set(id),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        let rows = participants
            .into_iter()
            .map(|(row_id, user_id)| participant::ActiveModel {
                id: Set(row_id),
                conversation_id: Set(created.id.clone()),
                user_id: Set(user_id),
                joined_at: Set(now),
                left_at: Set(None),
            });

        Participant::insert_many(rows)
            .exec_without_returning(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(created)
    }

    /// Find a conversation by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<conversation::Model>> {
        Conversation::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find the ACTIVE membership row for a user in a conversation, if any.
    pub async fn find_active_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> AppResult<Option<participant::Model>> {
        Participant::find()
            .filter(participant::Column::ConversationId.eq(conversation_id))
            .filter(participant::Column::UserId.eq(user_id))
            .filter(participant::Column::LeftAt.is_null())
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find every membership row a user has held in a conversation, oldest
    /// join first. Multiple rows mean the user left and rejoined.
    pub async fn find_membership_history(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> AppResult<Vec<participant::Model>> {
        Participant::find()
            .filter(participant::Column::ConversationId.eq(conversation_id))
            .filter(participant::Column::UserId.eq(user_id))
            .order_by_asc(participant::Column::JoinedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find all ACTIVE participants of a conversation.
    pub async fn find_active_participants(
        &self,
        conversation_id: &str,
    ) -> AppResult<Vec<participant::Model>> {
        Participant::find()
            .filter(participant::Column::ConversationId.eq(conversation_id))
            .filter(participant::Column::LeftAt.is_null())
            .order_by_asc(participant::Column::JoinedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Add a participant row. Used for join and rejoin alike; the partial
    /// unique index rejects a second ACTIVE row for the same pair.
    pub async fn add_participant(
        &self,
        row_id: String,
        conversation_id: String,
        user_id: String,
        joined_at: DateTimeWithTimeZone,
    ) -> AppResult<participant::Model> {
        let active_model = participant::ActiveModel {
            id: Set(row_id),
            conversation_id: Set(conversation_id),
            user_id: Set(user_id),
            joined_at: Set(joined_at),
            left_at: Set(None),
        };

        active_model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Close the ACTIVE membership of a user by stamping `left_at`.
    ///
    /// Returns the number of rows closed: zero means the user was not an
    /// active participant.
    pub async fn mark_left(
        &self,
        conversation_id: &str,
        user_id: &str,
        left_at: DateTimeWithTimeZone,
    ) -> AppResult<u64> {
        let result = Participant::update_many()
            .col_expr(participant::Column::LeftAt, Expr::value(Some(left_at)))
            .filter(participant::Column::ConversationId.eq(conversation_id))
            .filter(participant::Column::UserId.eq(user_id))
            .filter(participant::Column::LeftAt.is_null())
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }

    /// Find conversations a user is an ACTIVE participant of, most recently
    /// updated first.
    pub async fn find_for_user(
        &self,
        user_id: &str,
        limit: u64,
        offset: u64,
    ) -> AppResult<Vec<conversation::Model>> {
        let conversation_ids: Vec<String> = Participant::find()
            .select_only()
            .column(participant::Column::ConversationId)
            .filter(participant::Column::UserId.eq(user_id))
            .filter(participant::Column::LeftAt.is_null())
            .into_tuple()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if conversation_ids.is_empty() {
            return Ok(Vec::new());
        }

        Conversation::find()
            .filter(conversation::Column::Id.is_in(conversation_ids))
            .order_by_desc(conversation::Column::UpdatedAt)
            .order_by_desc(conversation::Column::CreatedAt)
            .offset(offset)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn create_test_participant(
        id: &str,
        conversation_id: &str,
        user_id: &str,
        left: bool,
    ) -> participant::Model {
        let now = Utc::now().fixed_offset();
        participant::Model {
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            joined_at: now,
            left_at: left.then_some(now),
        }
    }

    #[tokio::test]
    async fn test_create_with_participants_returns_conversation() {
        let now = Utc::now().fixed_offset();
        let conversation = conversation::Model {
            id: "conv1".to_string(),
            created_at: now,
            updated_at: None,
        };

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[conversation]])
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 2,
                }])
                .into_connection(),
        );

        let repo = ConversationRepository::new(db);
        let result = repo
            .create_with_participants(
                "conv1".to_string(),
                vec![
                    ("p1".to_string(), "user1".to_string()),
                    ("p2".to_string(), "user2".to_string()),
                ],
                now,
            )
            .await
            .unwrap();

        assert_eq!(result.id, "conv1");
    }

    #[tokio::test]
    async fn test_find_active_participant_ignores_left_rows() {
        // Query filters on left_at IS NULL, so a mock returning nothing
        // models a user whose only membership row is closed.
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<participant::Model>::new()])
                .into_connection(),
        );

        let repo = ConversationRepository::new(db);
        let result = repo.find_active_participant("conv1", "user1").await.unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_find_membership_history_returns_all_rows() {
        let old = create_test_participant("p1", "conv1", "user1", true);
        let current = create_test_participant("p2", "conv1", "user1", false);

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[old, current]])
                .into_connection(),
        );

        let repo = ConversationRepository::new(db);
        let history = repo.find_membership_history("conv1", "user1").await.unwrap();

        assert_eq!(history.len(), 2);
        assert!(history[0].left_at.is_some());
        assert!(history[1].is_active());
    }

    #[tokio::test]
    async fn test_mark_left_reports_rows_closed() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );

        let repo = ConversationRepository::new(db);
        let closed = repo
            .mark_left("conv1", "user1", Utc::now().fixed_offset())
            .await
            .unwrap();

        assert_eq!(closed, 1);
    }

    #[tokio::test]
    async fn test_find_for_user_with_no_memberships_skips_lookup() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<participant::Model>::new()])
                .into_connection(),
        );

        let repo = ConversationRepository::new(db);
        let conversations = repo.find_for_user("user1", 20, 0).await.unwrap();

        assert!(conversations.is_empty());
    }
}
