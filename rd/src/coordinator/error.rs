//! Session error types

use std::io;
use std::time::Duration;

use thiserror::Error;

use super::session::SessionState;
use crate::transport::Endpoint;

/// Errors that end a single requester session
///
/// None of these are fatal to the process; the coordinator decides what to do
/// with the resource holder based on [`SessionError::is_holder_fault`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to read token from requester: {0}")]
    RequesterRead(#[source] io::Error),

    #[error("Failed to send completion token to requester: {0}")]
    RequesterWrite(#[source] io::Error),

    #[error("Failed to forward token to resource holder: {0}")]
    HolderWrite(#[source] io::Error),

    #[error("Failed to read completion token from resource holder: {0}")]
    HolderRead(#[source] io::Error),

    #[error("Timed out waiting on {peer} after {after:?} in state {state:?}")]
    Timeout {
        peer: Endpoint,
        state: SessionState,
        after: Duration,
    },
}

impl SessionError {
    /// Whether the resource holder connection is suspect after this error
    pub fn is_holder_fault(&self) -> bool {
        match self {
            SessionError::HolderWrite(_) | SessionError::HolderRead(_) => true,
            SessionError::Timeout { peer, .. } => *peer == Endpoint::ResourceHolder,
            SessionError::RequesterRead(_) | SessionError::RequesterWrite(_) => false,
        }
    }

    /// Short description used in the aborted event text
    pub fn reason(&self) -> &'static str {
        match self {
            SessionError::RequesterRead(e) if e.kind() == io::ErrorKind::UnexpectedEof => "short token from requester",
            SessionError::RequesterRead(_) => "requester read failed",
            SessionError::RequesterWrite(_) => "requester write failed",
            SessionError::HolderWrite(_) => "resource holder write failed",
            SessionError::HolderRead(e) if e.kind() == io::ErrorKind::UnexpectedEof => "resource holder closed",
            SessionError::HolderRead(_) => "resource holder read failed",
            SessionError::Timeout {
                peer: Endpoint::ResourceHolder,
                ..
            } => "resource holder timed out",
            SessionError::Timeout { .. } => "requester timed out",
        }
    }
}
