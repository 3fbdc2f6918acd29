//! Rendezvous - serialized access to a single resource holder
//!
//! A coordinator that sits between many requesters and one long-lived
//! resource holder. Each requester sends a 4-byte correlation token, waits its
//! turn, and is released with the holder's completion token. Observers watch
//! every transition as a stream of short text lines.
//!
//! # Core Concepts
//!
//! - **Strict Serialization**: At most one requester is in session with the holder
//! - **Opaque Tokens**: Correlation tokens are relayed byte-for-byte
//! - **Bounded Observers**: A fixed table of observer slots, failures retire one slot
//! - **Decoupled Feed**: The coordinator never waits on an observer socket
//!
//! # Modules
//!
//! - [`coordinator`] - Holder acceptance and the per-requester handshake
//! - [`events`] - Event messages and the buffer between producer and broadcaster
//! - [`observers`] - Observer registry, registration and broadcast
//! - [`server`] - Endpoint binding and task wiring
//! - [`client`] - Bundled requester, holder and observer peers
//! - [`token`] - Correlation token codec
//! - [`transport`] - Connection and acceptor abstractions
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod observers;
pub mod server;
pub mod token;
pub mod transport;

// Re-export commonly used types
pub use config::{Config, EventsConfig, LogSettings, ObserverConfig, ServerConfig};
pub use coordinator::{
    CompletedSession, Coordinator, CoordinatorConfig, CoordinatorStats, HolderPolicy, SessionError, SessionState,
    SessionTimeouts, StatsSnapshot, serve_session,
};
pub use events::{EventKind, EventMessage, EventPublisher, EventReceiver, event_buffer};
pub use observers::{BroadcastReport, ObserverRegistry, OverflowPolicy, Registration};
pub use server::{LocalAddrs, Server};
pub use token::{ByteOrder, CorrelationToken};
pub use transport::{Acceptor, BoxedConnection, Connection, Endpoint};
