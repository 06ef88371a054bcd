//! WebSocket support for live chat
//!
//! # Architecture
//!
//! - **Connection**: an authenticated WebSocket connection and its outbound queue
//! - **Registry**: who is connected, session rooms and the support room
//! - **Router**: turns client events and REST calls into chat operations and fan-out
//! - **Handler**: Axum WebSocket route handler
//! - **Events**: Type-safe event definitions for client/server communication
//!
//! The registry is local to one process. With several API instances behind a
//! load balancer, a user and an agent on different instances do not see each
//! other's live events; both still read the persisted history.

pub mod connection;
pub mod events;
pub mod handler;
pub mod registry;
pub mod router;

pub use connection::{Connection, ConnectionId};
pub use events::{ClientEvent, ServerEvent};
pub use handler::ws_handler;
pub use registry::{ConnectionRegistry, RegistryStats};
pub use router::{Closer, RealtimeRouter};
