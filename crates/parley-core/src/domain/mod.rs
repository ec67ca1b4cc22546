//! Domain models of the messaging service.
//!
//! These are the rows the relational store owns and the cache layer
//! serializes into entries.

pub mod message;
pub mod user;

pub use message::*;
pub use user::*;
