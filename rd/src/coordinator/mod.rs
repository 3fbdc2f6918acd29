//! Resource Handshake Coordinator
//!
//! Owns the single resource holder connection and serves one requester at a
//! time through the token handshake:
//! - **Receive:** read one correlation token from the requester
//! - **Forward:** pass it unmodified to the resource holder
//! - **Release:** wait for the holder's completion token and echo it back

mod config;
mod core;
mod error;
mod session;

pub use config::{CoordinatorConfig, HolderPolicy, SessionTimeouts};
pub use core::{Coordinator, CoordinatorStats, StatsSnapshot};
pub use error::SessionError;
pub use session::{CompletedSession, SessionState, serve_session};
