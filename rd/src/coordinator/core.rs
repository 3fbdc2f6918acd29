//! Main Coordinator loop
//!
//! Serves requesters strictly one at a time. The loop awaits each session to
//! completion before accepting the next requester, which is the whole mutual
//! exclusion mechanism over the resource holder.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use eyre::{Result, eyre};
use tracing::{debug, error, info, warn};

use super::config::{CoordinatorConfig, HolderPolicy};
use super::session::serve_session;
use crate::events::EventPublisher;
use crate::transport::{Acceptor, BoxedConnection};

/// Pause after a failed accept
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Running counters, readable while the coordinator runs
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    sessions_completed: AtomicU64,
    sessions_aborted: AtomicU64,
    holder_connections: AtomicU64,
}

/// Point-in-time copy of [`CoordinatorStats`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub sessions_completed: u64,
    pub sessions_aborted: u64,
    pub holder_connections: u64,
}

impl CoordinatorStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_aborted: self.sessions_aborted.load(Ordering::Relaxed),
            holder_connections: self.holder_connections.load(Ordering::Relaxed),
        }
    }
}

/// The serial core: owns the resource holder and is the sole event producer
pub struct Coordinator {
    config: CoordinatorConfig,
    publisher: EventPublisher,
    stats: Arc<CoordinatorStats>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, publisher: EventPublisher) -> Self {
        debug!(?config, "Coordinator::new: called");
        Self {
            config,
            publisher,
            stats: Arc::new(CoordinatorStats::default()),
        }
    }

    /// Shared handle to the running counters
    pub fn stats(&self) -> Arc<CoordinatorStats> {
        Arc::clone(&self.stats)
    }

    /// Block until a resource holder connects
    async fn accept_holder(&self, acceptor: &dyn Acceptor) -> BoxedConnection {
        debug!("Coordinator::accept_holder: waiting for resource holder");
        loop {
            match acceptor.accept().await {
                Ok((conn, peer)) => {
                    info!(%peer, "Resource holder connected from {}", peer);
                    self.stats.holder_connections.fetch_add(1, Ordering::Relaxed);
                    self.publisher.open().await;
                    return conn;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept resource holder connection");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Run the coordinator
    ///
    /// Accepts the resource holder first, then serves requesters forever. Only
    /// returns on a holder failure under [`HolderPolicy::Shutdown`]; stop it by
    /// dropping the future.
    pub async fn run(self, holder_acceptor: Arc<dyn Acceptor>, requester_acceptor: Arc<dyn Acceptor>) -> Result<()> {
        info!("Coordinator started");
        let timeouts = self.config.timeouts();
        let mut holder: Option<BoxedConnection> = None;

        loop {
            let holder_conn = match holder.as_mut() {
                Some(conn) => conn,
                None => {
                    holder = Some(self.accept_holder(holder_acceptor.as_ref()).await);
                    continue;
                }
            };

            let (requester, peer) = match requester_acceptor.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept requester connection");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };
            info!(%peer, "Handling {}", peer);

            match serve_session(requester, holder_conn, &self.publisher, timeouts).await {
                Ok(_) => {
                    self.stats.sessions_completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats.sessions_aborted.fetch_add(1, Ordering::Relaxed);
                    if e.is_holder_fault() {
                        match self.config.holder_policy {
                            HolderPolicy::Reconnect => {
                                warn!(error = %e, "Resource holder failed, waiting for a new one");
                                holder = None;
                            }
                            HolderPolicy::Shutdown => {
                                error!(error = %e, "Resource holder failed, shutting down");
                                return Err(eyre!("Resource holder failed: {}", e));
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, event_buffer};
    use crate::token::{ByteOrder, CorrelationToken};
    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio::sync::{Mutex, mpsc};

    /// Acceptor fed by the test through a channel
    struct ChannelAcceptor {
        rx: Mutex<mpsc::Receiver<BoxedConnection>>,
    }

    #[async_trait]
    impl Acceptor for ChannelAcceptor {
        async fn accept(&self) -> std::io::Result<(BoxedConnection, String)> {
            match self.rx.lock().await.recv().await {
                Some(conn) => Ok((conn, "test-peer".to_string())),
                None => std::future::pending().await,
            }
        }
    }

    fn channel_acceptor() -> (mpsc::Sender<BoxedConnection>, Arc<dyn Acceptor>) {
        let (tx, rx) = mpsc::channel(8);
        (tx, Arc::new(ChannelAcceptor { rx: Mutex::new(rx) }))
    }

    fn pipe() -> (BoxedConnection, DuplexStream) {
        let (server, client) = tokio::io::duplex(64);
        (Box::new(server), client)
    }

    async fn echo_holder(mut conn: DuplexStream, sessions: usize) {
        for _ in 0..sessions {
            let token = CorrelationToken::read_from(&mut conn).await.unwrap();
            token.write_to(&mut conn).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_serves_requesters_in_sequence_over_one_holder() {
        let (publisher, mut receiver) = event_buffer(64, ByteOrder::Big);
        let coordinator = Coordinator::new(CoordinatorConfig::default(), publisher);
        let stats = coordinator.stats();

        let (holder_tx, holder_acceptor) = channel_acceptor();
        let (requester_tx, requester_acceptor) = channel_acceptor();
        let task = tokio::spawn(coordinator.run(holder_acceptor, requester_acceptor));

        let (holder, holder_client) = pipe();
        holder_tx.send(holder).await.unwrap();
        let holder_task = tokio::spawn(echo_holder(holder_client, 3));

        for value in [1, 2, 3] {
            let (requester, mut client) = pipe();
            requester_tx.send(requester).await.unwrap();
            CorrelationToken::from_value(value, ByteOrder::Big)
                .write_to(&mut client)
                .await
                .unwrap();
            let reply = CorrelationToken::read_from(&mut client).await.unwrap();
            assert_eq!(reply.value(ByteOrder::Big), value);
        }
        holder_task.await.unwrap();

        assert_eq!(receiver.recv().await.unwrap().kind(), EventKind::Open);
        for _ in 0..3 {
            assert_eq!(receiver.recv().await.unwrap().kind(), EventKind::Queued);
            assert_eq!(receiver.recv().await.unwrap().kind(), EventKind::LeftQueue);
            assert_eq!(receiver.recv().await.unwrap().kind(), EventKind::ServiceComplete);
            assert_eq!(receiver.recv().await.unwrap().kind(), EventKind::RequesterLeft);
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sessions_completed, 3);
        assert_eq!(snapshot.holder_connections, 1);
        task.abort();
    }

    #[tokio::test]
    async fn test_requester_failure_keeps_holder() {
        let (publisher, _receiver) = event_buffer(64, ByteOrder::Big);
        let coordinator = Coordinator::new(CoordinatorConfig::default(), publisher);
        let stats = coordinator.stats();

        let (holder_tx, holder_acceptor) = channel_acceptor();
        let (requester_tx, requester_acceptor) = channel_acceptor();
        let task = tokio::spawn(coordinator.run(holder_acceptor, requester_acceptor));

        let (holder, holder_client) = pipe();
        holder_tx.send(holder).await.unwrap();
        let holder_task = tokio::spawn(echo_holder(holder_client, 1));

        // First requester hangs up before sending a full token
        let (bad, bad_client) = pipe();
        requester_tx.send(bad).await.unwrap();
        drop(bad_client);

        let (good, mut client) = pipe();
        requester_tx.send(good).await.unwrap();
        CorrelationToken::from_value(9, ByteOrder::Big)
            .write_to(&mut client)
            .await
            .unwrap();
        let reply = CorrelationToken::read_from(&mut client).await.unwrap();
        assert_eq!(reply.value(ByteOrder::Big), 9);
        holder_task.await.unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sessions_aborted, 1);
        assert_eq!(snapshot.sessions_completed, 1);
        assert_eq!(snapshot.holder_connections, 1);
        task.abort();
    }

    #[tokio::test]
    async fn test_holder_failure_reconnects() {
        let (publisher, _receiver) = event_buffer(64, ByteOrder::Big);
        let coordinator = Coordinator::new(CoordinatorConfig::default(), publisher);
        let stats = coordinator.stats();

        let (holder_tx, holder_acceptor) = channel_acceptor();
        let (requester_tx, requester_acceptor) = channel_acceptor();
        let task = tokio::spawn(coordinator.run(holder_acceptor, requester_acceptor));

        // First holder dies before answering
        let (holder, holder_client) = pipe();
        holder_tx.send(holder).await.unwrap();
        drop(holder_client);

        let (first, mut first_client) = pipe();
        requester_tx.send(first).await.unwrap();
        CorrelationToken::from_value(1, ByteOrder::Big)
            .write_to(&mut first_client)
            .await
            .unwrap();
        let mut rest = Vec::new();
        assert_eq!(first_client.read_to_end(&mut rest).await.unwrap(), 0);

        // A replacement holder takes over
        let (holder, holder_client) = pipe();
        holder_tx.send(holder).await.unwrap();
        let holder_task = tokio::spawn(echo_holder(holder_client, 1));

        let (second, mut second_client) = pipe();
        requester_tx.send(second).await.unwrap();
        CorrelationToken::from_value(2, ByteOrder::Big)
            .write_to(&mut second_client)
            .await
            .unwrap();
        let reply = CorrelationToken::read_from(&mut second_client).await.unwrap();
        assert_eq!(reply.value(ByteOrder::Big), 2);
        holder_task.await.unwrap();

        assert_eq!(stats.snapshot().holder_connections, 2);
        task.abort();
    }

    #[tokio::test]
    async fn test_stalled_holder_write_triggers_reconnect() {
        let (publisher, _receiver) = event_buffer(64, ByteOrder::Big);
        let config = CoordinatorConfig {
            holder_timeout_ms: 30,
            ..Default::default()
        };
        let coordinator = Coordinator::new(config, publisher);
        let stats = coordinator.stats();

        let (holder_tx, holder_acceptor) = channel_acceptor();
        let (requester_tx, requester_acceptor) = channel_acceptor();
        let task = tokio::spawn(coordinator.run(holder_acceptor, requester_acceptor));

        // First holder never reads, so the forward write stalls half way
        let (stalled, _stalled_client) = tokio::io::duplex(2);
        holder_tx.send(Box::new(stalled)).await.unwrap();

        let (first, mut first_client) = pipe();
        requester_tx.send(first).await.unwrap();
        CorrelationToken::from_value(1, ByteOrder::Big)
            .write_to(&mut first_client)
            .await
            .unwrap();
        let mut rest = Vec::new();
        assert_eq!(first_client.read_to_end(&mut rest).await.unwrap(), 0);

        // The partially written holder is dropped, not reused
        let (holder, holder_client) = pipe();
        holder_tx.send(holder).await.unwrap();
        let holder_task = tokio::spawn(echo_holder(holder_client, 1));

        let (second, mut second_client) = pipe();
        requester_tx.send(second).await.unwrap();
        CorrelationToken::from_value(2, ByteOrder::Big)
            .write_to(&mut second_client)
            .await
            .unwrap();
        let reply = CorrelationToken::read_from(&mut second_client).await.unwrap();
        assert_eq!(reply.value(ByteOrder::Big), 2);
        holder_task.await.unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.holder_connections, 2);
        assert_eq!(snapshot.sessions_aborted, 1);
        task.abort();
    }

    #[tokio::test]
    async fn test_holder_failure_shutdown_policy() {
        let (publisher, _receiver) = event_buffer(64, ByteOrder::Big);
        let config = CoordinatorConfig {
            holder_policy: HolderPolicy::Shutdown,
            ..Default::default()
        };
        let coordinator = Coordinator::new(config, publisher);

        let (holder_tx, holder_acceptor) = channel_acceptor();
        let (requester_tx, requester_acceptor) = channel_acceptor();
        let task = tokio::spawn(coordinator.run(holder_acceptor, requester_acceptor));

        let (holder, holder_client) = pipe();
        holder_tx.send(holder).await.unwrap();
        drop(holder_client);

        let (requester, mut client) = pipe();
        requester_tx.send(requester).await.unwrap();
        CorrelationToken::from_value(1, ByteOrder::Big)
            .write_to(&mut client)
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Resource holder failed"));
    }
}
