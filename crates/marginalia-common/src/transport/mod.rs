//! Sync transport.
//!
//! - `CollabMessage`: wire protocol for authentication, sync and updates
//! - `Transport` / `TransportLink`: how a replica reaches the sync server
//! - `MemoryHub`: in-process server used by tests and the CLI demo

mod hub;
mod link;
mod messages;

pub use crate::error::TransportError;
pub use hub::MemoryHub;
pub use link::{Transport, TransportLink};
pub use messages::CollabMessage;
