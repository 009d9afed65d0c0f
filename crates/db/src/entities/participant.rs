//! Participant entity - a user's membership record in a conversation.
//!
//! A membership is active while `left_at` is null. Rejoining after leaving
//! inserts a fresh row with a new `joined_at`; the old row keeps its
//! `left_at` so history-visibility bounds from the original join survive.
//! A partial unique index on `(conversation_id, user_id) WHERE left_at IS
//! NULL` rejects concurrent double-joins at the SQL level.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "participant")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub conversation_id: String,

    #[sea_orm(indexed)]
    pub user_id: String,

    /// When the user joined the conversation.
    pub joined_at: DateTimeWithTimeZone,

    /// When the user left, if they have. Null means active membership.
    #[sea_orm(nullable)]
    pub left_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Whether this membership is currently active.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
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
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::conversation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Conversation.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
