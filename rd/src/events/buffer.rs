//! Event Buffer - bounded queue between the coordinator and the broadcaster
//!
//! The coordinator publishes whole [`EventMessage`] values; the broadcaster
//! drains them one at a time in submission order. A full buffer makes
//! `publish` wait; an empty buffer makes `recv` wait.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::message::EventMessage;
use crate::token::{ByteOrder, CorrelationToken};

/// Default buffer capacity (events)
pub const DEFAULT_BUFFER_CAPACITY: usize = 64;

/// Create a bounded event buffer
///
/// A capacity of zero is bumped to one.
pub fn event_buffer(capacity: usize, order: ByteOrder) -> (EventPublisher, EventReceiver) {
    let capacity = capacity.max(1);
    debug!(capacity, ?order, "event_buffer: creating event buffer");
    let (tx, rx) = mpsc::channel(capacity);
    (EventPublisher { tx, order }, EventReceiver { rx })
}

/// Producer side of the event buffer
///
/// Cheap to clone. Carries the byte order used to render tokens so callers can
/// use the convenience methods without repeating it.
#[derive(Clone, Debug)]
pub struct EventPublisher {
    tx: mpsc::Sender<EventMessage>,
    order: ByteOrder,
}

impl EventPublisher {
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Publish a message, waiting while the buffer is full
    ///
    /// If the consumer is gone the event is dropped with a warning; event
    /// delivery never fails the caller.
    pub async fn publish(&self, msg: EventMessage) {
        debug!(kind = msg.kind().as_str(), "EventPublisher::publish");
        if let Err(e) = self.tx.send(msg).await {
            warn!(kind = e.0.kind().as_str(), "Event buffer closed, dropping event");
        }
    }

    /// Number of free slots right now
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    // === Convenience methods ===

    pub async fn open(&self) {
        self.publish(EventMessage::open()).await;
    }

    pub async fn queued(&self, token: CorrelationToken) {
        self.publish(EventMessage::queued(token, self.order)).await;
    }

    pub async fn left_queue(&self, token: CorrelationToken) {
        self.publish(EventMessage::left_queue(token, self.order)).await;
    }

    pub async fn service_complete(&self, token: CorrelationToken) {
        self.publish(EventMessage::service_complete(token, self.order)).await;
    }

    pub async fn requester_left(&self, token: CorrelationToken) {
        self.publish(EventMessage::requester_left(token, self.order)).await;
    }

    pub async fn aborted(&self, token: Option<CorrelationToken>, reason: &str) {
        self.publish(EventMessage::aborted(token, self.order, reason)).await;
    }
}

/// Consumer side of the event buffer
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<EventMessage>,
}

impl EventReceiver {
    /// Wait for the next message; `None` once every publisher is dropped
    pub async fn recv(&mut self) -> Option<EventMessage> {
        self.rx.recv().await
    }
}
