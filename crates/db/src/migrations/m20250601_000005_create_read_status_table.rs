//! Create `read_status` table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ReadStatus::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ReadStatus::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ReadStatus::MessageId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReadStatus::UserId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReadStatus::IsRead)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(ReadStatus::ReadAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_read_status_message")
                            .from(ReadStatus::Table, ReadStatus::MessageId)
                            .to(Message::Table, Message::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_read_status_user")
                            .from(ReadStatus::Table, ReadStatus::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique (message_id, user_id): the target of ON CONFLICT DO NOTHING
        // upserts, so a message is marked read at most once per user.
        manager
            .create_index(
                Index::create()
                    .name("uq_read_status_message_user")
                    .table(ReadStatus::Table)
                    .col(ReadStatus::MessageId)
                    .col(ReadStatus::UserId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index: user_id for unread counting
        manager
            .create_index(
                Index::create()
                    .name("idx_read_status_user_id")
                    .table(ReadStatus::Table)
                    .col(ReadStatus::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ReadStatus::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ReadStatus {
    Table,
    Id,
    MessageId,
    UserId,
    IsRead,
    ReadAt,
}

#[derive(Iden)]
enum Message {
    Table,
    Id,
}

#[derive(Iden)]
enum User {
    Table,
    Id,
}
