//! Client-side live delivery channel for huddle.
//!
//! Provides [`LiveChannel`], a reconnecting WebSocket connector that
//! delivers `message.created` and `read.updated` events pushed by the
//! server, plus the wire frame types shared with it.
//!
//! Live delivery is best-effort and at-most-once: after a reconnect the
//! caller reconciles through the paginated message fetch and unread count
//! rather than trusting the event stream alone.

pub mod channel;
pub mod frames;

pub use channel::{ChannelConfig, ChannelState, LiveChannel};
pub use frames::{ClientFrame, MessagePayload, ServerEvent};
