//! Authentication module for Livedesk
//!
//! Tokens are issued by the account service; this crate only verifies them.

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtError, JwtManager};
pub use middleware::{require_agent_like, require_auth, require_elevated, AuthUser};
