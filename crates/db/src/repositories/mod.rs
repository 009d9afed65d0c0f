//! Database repositories.

pub mod conversation;
pub mod message;
pub mod read_status;
pub mod user;

pub use conversation::ConversationRepository;
pub use message::MessageRepository;
pub use read_status::ReadStatusRepository;
pub use user::UserRepository;
