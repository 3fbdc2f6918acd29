//! Observer Registry - fixed-capacity slot table shared by registration and broadcast

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::transport::BoxedConnection;

/// Default number of observer slots
pub const DEFAULT_OBSERVER_CAPACITY: usize = 15;

/// Writer handle shared between a slot and an in-flight broadcast round
pub type SharedConnection = Arc<tokio::sync::Mutex<BoxedConnection>>;

/// What to do with a new observer when every slot is active
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Close the new connection without registering it
    #[default]
    Reject,
    /// Deactivate the longest-registered observer and reuse its slot
    EvictOldest,
}

/// Result of [`ObserverRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered { slot: usize },
    /// Registered after evicting the previous occupant of `slot`
    Evicted { slot: usize },
    Rejected,
}

/// Handle to one active slot, taken under the lock
#[derive(Clone)]
pub struct ActiveObserver {
    pub slot: usize,
    pub generation: u64,
    pub conn: SharedConnection,
    closed: Arc<Notify>,
}

impl ActiveObserver {
    /// Resolves once this registration is deactivated, evicted or retired
    pub async fn closed(&self) {
        self.closed.notified().await;
    }
}

impl std::fmt::Debug for ActiveObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveObserver")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct ObserverSlot {
    conn: Option<SharedConnection>,
    /// Close signal for the current registration
    closed: Arc<Notify>,
    active: bool,
    /// Registration stamp; increases monotonically across the table
    generation: u64,
}

impl ObserverSlot {
    fn occupy(&mut self, conn: SharedConnection, generation: u64) {
        self.conn = Some(conn);
        self.closed = Arc::new(Notify::new());
        self.active = true;
        self.generation = generation;
    }

    /// Mark inactive and wake any delivery in flight; the caller drops the connection
    fn vacate(&mut self) -> Option<SharedConnection> {
        self.active = false;
        // A stored permit covers a delivery that starts waiting after this point
        self.closed.notify_one();
        self.conn.take()
    }

    fn handle(&self, slot: usize) -> Option<ActiveObserver> {
        let conn = self.conn.as_ref().filter(|_| self.active)?;
        Some(ActiveObserver {
            slot,
            generation: self.generation,
            conn: Arc::clone(conn),
            closed: Arc::clone(&self.closed),
        })
    }
}

struct SlotTable {
    slots: Vec<ObserverSlot>,
    next_generation: u64,
}

/// Fixed-capacity observer table guarded by one lock
///
/// The lock covers scans and updates only. Connection I/O happens on
/// [`SharedConnection`] handles after the lock is released. Leaving the table
/// wakes the holder of any such handle through [`ActiveObserver::closed`], so
/// the connection closes as soon as that delivery lets go of it.
pub struct ObserverRegistry {
    table: Mutex<SlotTable>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl ObserverRegistry {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        debug!(capacity, ?policy, "ObserverRegistry::new: called");
        let slots = (0..capacity).map(|_| ObserverSlot::default()).collect();
        Self {
            table: Mutex::new(SlotTable {
                slots,
                next_generation: 1,
            }),
            capacity,
            policy,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, SlotTable> {
        // Table invariants hold after every statement, so a poisoned guard is still usable
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new observer connection in the first inactive slot
    ///
    /// When the table is full the configured [`OverflowPolicy`] decides. A
    /// rejected connection is closed; an evicted one is closed and replaced.
    pub fn register(&self, conn: BoxedConnection) -> Registration {
        debug!("ObserverRegistry::register: called");
        let shared: SharedConnection = Arc::new(tokio::sync::Mutex::new(conn));

        // Connections leaving the table are dropped after the lock is released
        let (outcome, displaced) = {
            let mut table = self.lock();
            let generation = table.next_generation;

            if let Some(slot) = table.slots.iter().position(|s| !s.active) {
                table.next_generation += 1;
                table.slots[slot].occupy(shared, generation);
                (Registration::Registered { slot }, None)
            } else {
                match self.policy {
                    OverflowPolicy::Reject => (Registration::Rejected, Some(shared)),
                    OverflowPolicy::EvictOldest => {
                        let oldest = table
                            .slots
                            .iter()
                            .enumerate()
                            .min_by_key(|(_, s)| s.generation)
                            .map(|(i, _)| i);
                        match oldest {
                            Some(slot) => {
                                table.next_generation += 1;
                                let entry = &mut table.slots[slot];
                                let evicted = entry.vacate();
                                entry.occupy(shared, generation);
                                (Registration::Evicted { slot }, evicted)
                            }
                            // Zero-capacity table
                            None => (Registration::Rejected, Some(shared)),
                        }
                    }
                }
            }
        };
        drop(displaced);

        match outcome {
            Registration::Registered { slot } => info!(slot, "Set observer to position {}", slot),
            Registration::Evicted { slot } => info!(slot, "Evicted oldest observer from position {}", slot),
            Registration::Rejected => warn!(capacity = self.capacity, "Observer table full, rejecting connection"),
        }
        outcome
    }

    /// Deactivate a slot and close its connection
    ///
    /// Idempotent: returns false if the slot was already inactive or out of range.
    pub fn deactivate(&self, slot: usize) -> bool {
        debug!(slot, "ObserverRegistry::deactivate: called");
        let closed = {
            let mut table = self.lock();
            match table.slots.get_mut(slot) {
                Some(entry) if entry.active => entry.vacate(),
                _ => None,
            }
        };
        let changed = closed.is_some();
        drop(closed);
        if changed {
            info!(slot, "Observer disconnected");
        }
        changed
    }

    /// Deactivate `observer.slot` only if it still holds the same registration
    ///
    /// A slot reused since the snapshot was taken is left untouched.
    pub fn retire(&self, observer: &ActiveObserver) -> bool {
        debug!(slot = observer.slot, generation = observer.generation, "ObserverRegistry::retire: called");
        let closed = {
            let mut table = self.lock();
            match table.slots.get_mut(observer.slot) {
                Some(entry) if entry.active && entry.generation == observer.generation => entry.vacate(),
                _ => None,
            }
        };
        let changed = closed.is_some();
        drop(closed);
        if changed {
            info!(slot = observer.slot, "Observer disconnected");
        }
        changed
    }

    /// Whether `observer` is still the active occupant of its slot
    pub fn is_current(&self, observer: &ActiveObserver) -> bool {
        let table = self.lock();
        table
            .slots
            .get(observer.slot)
            .is_some_and(|s| s.active && s.generation == observer.generation)
    }

    /// Handles to every active slot, in slot order
    pub fn snapshot(&self) -> Vec<ActiveObserver> {
        let table = self.lock();
        table
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, s)| s.handle(slot))
            .collect()
    }

    /// `(slot, generation)` of every active slot, in slot order
    ///
    /// Holds no connection handles, so nothing is kept open on behalf of a
    /// slot that is deactivated before its turn comes.
    pub fn active_slots(&self) -> Vec<(usize, u64)> {
        let table = self.lock();
        table
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.active)
            .map(|(slot, s)| (slot, s.generation))
            .collect()
    }

    /// Handle to `slot` if it still holds registration `generation`
    pub fn checkout(&self, slot: usize, generation: u64) -> Option<ActiveObserver> {
        let table = self.lock();
        table
            .slots
            .get(slot)
            .filter(|s| s.generation == generation)
            .and_then(|s| s.handle(slot))
    }

    pub fn active_count(&self) -> usize {
        self.lock().slots.iter().filter(|s| s.active).count()
    }

    pub fn is_active(&self, slot: usize) -> bool {
        self.lock().slots.get(slot).is_some_and(|s| s.active)
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("active", &self.active_count())
            .finish()
    }
}
