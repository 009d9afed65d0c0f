//! Create `message` table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Message::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Message::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Message::ConversationId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Message::SenderId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Message::Content).text().not_null())
                    .col(ColumnDef::new(Message::AttachmentUrl).string_len(512))
                    .col(ColumnDef::new(Message::AttachmentType).string_len(64))
                    .col(
                        ColumnDef::new(Message::IsEdited)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Message::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Message::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Message::UpdatedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_message_conversation")
                            .from(Message::Table, Message::ConversationId)
                            .to(Conversation::Table, Conversation::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_message_sender")
                            .from(Message::Table, Message::SenderId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: (conversation_id, created_at, id) backs the total order used
        // for pagination and read-through scans.
        manager
            .create_index(
                Index::create()
                    .name("idx_message_conversation_created_at_id")
                    .table(Message::Table)
                    .col(Message::ConversationId)
                    .col(Message::CreatedAt)
                    .col(Message::Id)
                    .to_owned(),
            )
            .await?;

        // Index: sender_id
        manager
            .create_index(
                Index::create()
                    .name("idx_message_sender_id")
                    .table(Message::Table)
                    .col(Message::SenderId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Message::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Message {
    Table,
    Id,
    ConversationId,
    SenderId,
    Content,
    AttachmentUrl,
    AttachmentType,
    IsEdited,
    IsDeleted,
    CreatedAt,
    UpdatedAt,
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
