//! Message entity.
//!
//! Messages are totally ordered within a conversation by `(created_at, id)`;
//! the lowercase-ULID id is the tie-break for same-timestamp inserts.
//! Deletion is soft: the row is retained with `is_deleted` set and content
//! redacted on every client-facing read.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "message")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub conversation_id: String,

    /// Sender user ID. Must be a current or past participant.
    #[sea_orm(indexed)]
    pub sender_id: String,

    /// Message text content. Non-empty after trim at write time.
    #[sea_orm(column_type = "Text")]
    pub content: String,

    /// Optional single attachment.
    #[sea_orm(nullable)]
    pub attachment_url: Option<String>,

    #[sea_orm(nullable)]
    pub attachment_type: Option<String>,

    #[sea_orm(default_value = false)]
    pub is_edited: bool,

    #[sea_orm(default_value = false)]
    pub is_deleted: bool,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::conversation::Entity",
        from = "Column::ConversationId",
        to = "super::conversation::Column::Id",
        on_delete = "Cascade"
    )]
    Conversation,

    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::SenderId",
        to = "super::user::Column::Id"
    )]
    Sender,

    #[sea_orm(has_many = "super::read_status::Entity")]
    ReadStatuses,
}

impl Related<super::conversation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Conversation.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sender.def()
    }
}

impl Related<super::read_status::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReadStatuses.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
