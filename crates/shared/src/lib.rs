//! Livedesk Shared Types and Utilities
//!
//! Domain types, errors and the session store shared by the Livedesk crates.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use db::*;
pub use error::*;
pub use store::{AppendedMessage, MemorySessionStore, PgSessionStore, SessionStore};
pub use types::*;
