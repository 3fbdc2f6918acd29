//! Coordination event messages

use std::fmt;

use crate::token::{ByteOrder, CorrelationToken};

/// Maximum payload size of one event message in bytes
pub const MAX_EVENT_LEN: usize = 149;

/// Coordination state transition an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Resource holder connected, requester service begins
    Open,
    Queued,
    LeftQueue,
    ServiceComplete,
    RequesterLeft,
    /// Session ended on an I/O failure
    Aborted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Open => "Open",
            EventKind::Queued => "Queued",
            EventKind::LeftQueue => "LeftQueue",
            EventKind::ServiceComplete => "ServiceComplete",
            EventKind::RequesterLeft => "RequesterLeft",
            EventKind::Aborted => "Aborted",
        }
    }
}

/// Immutable, bounded text describing one transition
///
/// Text longer than [`MAX_EVENT_LEN`] bytes is cut at the last char boundary
/// that fits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMessage {
    kind: EventKind,
    text: String,
}

impl EventMessage {
    pub fn new(kind: EventKind, text: impl Into<String>) -> Self {
        let mut text = text.into();
        if text.len() > MAX_EVENT_LEN {
            let mut end = MAX_EVENT_LEN;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
        }
        Self { kind, text }
    }

    pub fn open() -> Self {
        Self::new(EventKind::Open, "Resource holder is open\n")
    }

    pub fn queued(token: CorrelationToken, order: ByteOrder) -> Self {
        Self::new(
            EventKind::Queued,
            format!("Requester {} is in the queue\n", token.display(order)),
        )
    }

    pub fn left_queue(token: CorrelationToken, order: ByteOrder) -> Self {
        Self::new(
            EventKind::LeftQueue,
            format!("Requester {} leaves the queue for service\n", token.display(order)),
        )
    }

    pub fn service_complete(token: CorrelationToken, order: ByteOrder) -> Self {
        Self::new(
            EventKind::ServiceComplete,
            format!(
                "Requester {} got served, resource holder is idle\n",
                token.display(order)
            ),
        )
    }

    pub fn requester_left(token: CorrelationToken, order: ByteOrder) -> Self {
        Self::new(
            EventKind::RequesterLeft,
            format!("Requester {} left\n", token.display(order)),
        )
    }

    /// The token is absent when the session failed before one was read
    pub fn aborted(token: Option<CorrelationToken>, order: ByteOrder, reason: &str) -> Self {
        let text = match token {
            Some(token) => format!("Requester {} aborted: {}\n", token.display(order), reason),
            None => format!("Requester aborted: {}\n", reason),
        };
        Self::new(EventKind::Aborted, text)
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }
}

impl fmt::Display for EventMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
