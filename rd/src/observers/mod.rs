//! Observer side: slot registry, registration task, fan-out broadcaster
//!
//! The registry is the only state the registration task and the broadcaster
//! share. Both go through its single lock, which is held for table scans and
//! updates only, never across connection I/O.

mod broadcaster;
mod registration;
mod registry;

pub use broadcaster::{BroadcastReport, Broadcaster, broadcast, spawn_broadcaster};
pub use registration::{run_registration, spawn_registration};
pub use registry::{
    ActiveObserver, DEFAULT_OBSERVER_CAPACITY, ObserverRegistry, OverflowPolicy, Registration, SharedConnection,
};
