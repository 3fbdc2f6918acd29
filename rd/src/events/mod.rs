//! Event publishing for live observability
//!
//! Every coordination state transition produces one [`EventMessage`]. The
//! coordinator is the sole producer; the broadcaster is the sole consumer and
//! fans each message out to the registered observers.
//!
//! # Architecture
//!
//! ```text
//!   Coordinator ──publish──► EventBuffer (bounded mpsc) ──recv──► Broadcaster
//!                                                                    │
//!                                                  ┌─────────────────┼─────────────────┐
//!                                                  ▼                 ▼                 ▼
//!                                              observer 0        observer 1   ...  observer N-1
//! ```

mod buffer;
mod message;

pub use buffer::{DEFAULT_BUFFER_CAPACITY, EventPublisher, EventReceiver, event_buffer};
pub use message::{EventKind, EventMessage, MAX_EVENT_LEN};
