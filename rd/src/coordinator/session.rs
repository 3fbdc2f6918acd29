//! One requester handshake against the resource holder
//!
//! ```text
//! Accepted ─► AwaitingToken ─► Queued ─► ForwardedToResource ─► AwaitingRelease ─► Released ─► Completed
//!                  │              │                │                    │               │
//!                  └──────────────┴────────────────┴────────────────────┴───────────────┴──► Aborted
//! ```

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::config::SessionTimeouts;
use super::error::SessionError;
use crate::events::EventPublisher;
use crate::token::CorrelationToken;
use crate::transport::{BoxedConnection, Endpoint};

/// Handshake state of a requester session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    AwaitingToken,
    Queued,
    ForwardedToResource,
    AwaitingRelease,
    Released,
    Completed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted)
    }
}

/// A finished handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedSession {
    /// Token the requester sent
    pub token: CorrelationToken,
    /// Completion token the holder returned and the requester received
    pub completion: CorrelationToken,
}

struct Session<'a> {
    requester: BoxedConnection,
    holder: &'a mut BoxedConnection,
    publisher: &'a EventPublisher,
    timeouts: SessionTimeouts,
    state: SessionState,
    token: Option<CorrelationToken>,
}

impl Session<'_> {
    fn advance(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "Session::advance");
        self.state = next;
    }

    async fn handshake(&mut self) -> Result<CompletedSession, SessionError> {
        self.advance(SessionState::AwaitingToken);
        let token = deadline(
            self.timeouts.requester,
            Endpoint::Requester,
            self.state,
            CorrelationToken::read_from(&mut self.requester),
        )
        .await?
        .map_err(SessionError::RequesterRead)?;
        self.token = Some(token);

        self.advance(SessionState::Queued);
        self.publisher.queued(token).await;

        deadline(
            self.timeouts.holder,
            Endpoint::ResourceHolder,
            self.state,
            token.write_to(&mut *self.holder),
        )
        .await?
        .map_err(SessionError::HolderWrite)?;
        self.advance(SessionState::ForwardedToResource);
        self.publisher.left_queue(token).await;

        self.advance(SessionState::AwaitingRelease);
        let completion = deadline(
            self.timeouts.holder,
            Endpoint::ResourceHolder,
            self.state,
            CorrelationToken::read_from(&mut *self.holder),
        )
        .await?
        .map_err(SessionError::HolderRead)?;

        self.advance(SessionState::Released);
        self.publisher.service_complete(token).await;

        deadline(
            self.timeouts.requester,
            Endpoint::Requester,
            self.state,
            completion.write_to(&mut self.requester),
        )
        .await?
        .map_err(SessionError::RequesterWrite)?;

        Ok(CompletedSession { token, completion })
    }
}

/// Apply an optional deadline; the outer error is the timeout itself
async fn deadline<T>(
    limit: Option<Duration>,
    peer: Endpoint,
    state: SessionState,
    fut: impl Future<Output = io::Result<T>>,
) -> Result<io::Result<T>, SessionError> {
    match limit {
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| SessionError::Timeout { peer, state, after }),
        None => Ok(fut.await),
    }
}

async fn close(mut requester: BoxedConnection) {
    if let Err(e) = requester.shutdown().await {
        debug!(error = %e, "close: requester shutdown failed");
    }
}

/// Serve one requester to completion
///
/// Owns the requester connection and closes it in every outcome. The holder is
/// borrowed: it outlives the session. On failure an aborted event is published
/// and the error returned; the caller decides what to do with the holder.
pub async fn serve_session(
    requester: BoxedConnection,
    holder: &mut BoxedConnection,
    publisher: &EventPublisher,
    timeouts: SessionTimeouts,
) -> Result<CompletedSession, SessionError> {
    let mut session = Session {
        requester,
        holder,
        publisher,
        timeouts,
        state: SessionState::Accepted,
        token: None,
    };

    let result = session.handshake().await;
    let Session {
        requester, state, token, ..
    } = session;
    close(requester).await;

    match result {
        Ok(done) => {
            debug!(from = ?state, to = ?SessionState::Completed, "serve_session: requester closed");
            publisher.requester_left(done.token).await;
            info!(
                token = %done.token.display(publisher.byte_order()),
                "Requester served"
            );
            Ok(done)
        }
        Err(e) => {
            warn!(state = ?state, error = %e, "Session aborted");
            debug!(from = ?state, to = ?SessionState::Aborted, "serve_session: requester closed");
            publisher.aborted(token, e.reason()).await;
            Err(e)
        }
    }
}
