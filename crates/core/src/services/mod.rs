//! Business logic services.

pub mod conversation;
pub mod delivery;

pub use conversation::ConversationService;
pub use delivery::{DeliveryPublisher, DeliveryPublisherService, NoOpDeliveryPublisher};
