//! Create `participant` table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Participant::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Participant::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Participant::ConversationId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Participant::UserId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Participant::JoinedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Participant::LeftAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_participant_conversation")
                            .from(Participant::Table, Participant::ConversationId)
                            .to(Conversation::Table, Conversation::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_participant_user")
                            .from(Participant::Table, Participant::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: conversation_id
        manager
            .create_index(
                Index::create()
                    .name("idx_participant_conversation_id")
                    .table(Participant::Table)
                    .col(Participant::ConversationId)
                    .to_owned(),
            )
            .await?;

        // Index: user_id
        manager
            .create_index(
                Index::create()
                    .name("idx_participant_user_id")
                    .table(Participant::Table)
                    .col(Participant::UserId)
                    .to_owned(),
            )
            .await?;

        // Partial unique index: one ACTIVE membership per (conversation, user).
        // Historical rows (left_at set) may repeat the pair, so rejoin is a
        // plain insert and the constraint still rejects concurrent
        // double-joins.
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS uq_participant_active \
                 ON participant (conversation_id, user_id) \
                 WHERE left_at IS NULL",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Participant::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Participant {
    Table,
    Id,
    ConversationId,
    UserId,
    JoinedAt,
    LeftAt,
}

#[derive(Iden)]
enum Conversation {
    Table,
    Id,
}

#[derive(Iden)]
enum User {
    Table,
    Id,
}
