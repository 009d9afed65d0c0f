//! HTTP API layer for huddle.
//!
//! This crate provides the REST API and the live delivery channel:
//!
//! - **Endpoints**: conversations, messages, read state
//! - **Extractors**: authenticated user
//! - **Middleware**: identity resolution
//! - **Delivery**: WebSocket push with a per-process connection registry
//!
//! Built on Axum 0.8 with Tower middleware stack.

pub mod delivery;
pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;

pub use delivery::{DeliveryRegistry, streaming_handler};
pub use endpoints::router;
