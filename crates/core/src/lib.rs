//! Core business logic for huddle.

pub mod services;

pub use services::*;
