//! Database entities.

#![allow(missing_docs)]

pub mod conversation;
pub mod message;
pub mod participant;
pub mod read_status;
pub mod user;
