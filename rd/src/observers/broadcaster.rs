//! Fan-out Broadcaster - drains the event buffer into every active observer

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::{ActiveObserver, ObserverRegistry};
use crate::events::{EventMessage, EventReceiver};

/// Outcome of one broadcast round
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Delivers each buffered event to all active observers
///
/// Delivery failure (error or deadline) deactivates exactly the failing slot;
/// the round continues with the remaining slots. Nothing is retried.
pub struct Broadcaster {
    registry: Arc<ObserverRegistry>,
    receiver: EventReceiver,
    write_timeout: Option<Duration>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ObserverRegistry>, receiver: EventReceiver, write_timeout: Option<Duration>) -> Self {
        debug!(?write_timeout, "Broadcaster::new: called");
        Self {
            registry,
            receiver,
            write_timeout,
        }
    }

    /// Run until the event buffer closes
    pub async fn run(mut self) {
        info!("Broadcaster started");
        while let Some(msg) = self.receiver.recv().await {
            let report = broadcast(&self.registry, &msg, self.write_timeout).await;
            debug!(
                kind = msg.kind().as_str(),
                delivered = report.delivered,
                failed = report.failed,
                "Broadcaster::run: round complete"
            );
        }
        info!("Event buffer closed, broadcaster stopping");
    }
}

/// Deliver one message to every slot active at delivery time
pub async fn broadcast(
    registry: &ObserverRegistry,
    msg: &EventMessage,
    write_timeout: Option<Duration>,
) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    for (slot, generation) in registry.active_slots() {
        // The slot may have been deactivated or reused since the scan
        let Some(observer) = registry.checkout(slot, generation) else {
            continue;
        };

        match deliver(&observer, msg, write_timeout).await {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                if registry.retire(&observer) {
                    warn!(slot, error = %e, "Delivery to observer failed");
                } else {
                    debug!(slot, error = %e, "broadcast: observer left during delivery");
                }
                report.failed += 1;
            }
        }
    }

    report
}

async fn deliver(observer: &ActiveObserver, msg: &EventMessage, write_timeout: Option<Duration>) -> std::io::Result<()> {
    let write = async {
        let mut conn = observer.conn.lock().await;
        conn.write_all(msg.as_bytes()).await?;
        conn.flush().await
    };

    let bounded = async {
        match write_timeout {
            Some(limit) => match tokio::time::timeout(limit, write).await {
                Ok(res) => res,
                Err(_) => Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "observer write timed out",
                )),
            },
            None => write.await,
        }
    };

    tokio::select! {
        res = bounded => res,
        _ = observer.closed() => Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionAborted,
            "observer deactivated during delivery",
        )),
    }
}

/// Spawn the broadcaster as a background task
pub fn spawn_broadcaster(
    registry: Arc<ObserverRegistry>,
    receiver: EventReceiver,
    write_timeout: Option<Duration>,
) -> JoinHandle<()> {
    let broadcaster = Broadcaster::new(registry, receiver, write_timeout);
    tokio::spawn(broadcaster.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, event_buffer};
    use crate::observers::OverflowPolicy;
    use crate::token::ByteOrder;
    use crate::transport::BoxedConnection;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn observer(buffer: usize) -> (BoxedConnection, DuplexStream) {
        let (server, client) = tokio::io::duplex(buffer);
        (Box::new(server), client)
    }

    async fn read_text(client: &mut DuplexStream, len: usize) -> String {
        let mut buf = vec![0u8; len];
        client.read_exact(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_active_slot() {
        let registry = ObserverRegistry::new(3, OverflowPolicy::Reject);
        let (a, mut a_client) = observer(256);
        let (b, mut b_client) = observer(256);
        registry.register(a);
        registry.register(b);

        let msg = EventMessage::open();
        let report = broadcast(&registry, &msg, None).await;
        assert_eq!(report, BroadcastReport { delivered: 2, failed: 0 });

        assert_eq!(read_text(&mut a_client, msg.text().len()).await, msg.text());
        assert_eq!(read_text(&mut b_client, msg.text().len()).await, msg.text());
    }

    #[tokio::test]
    async fn test_failed_slot_is_deactivated_neighbours_continue() {
        let registry = ObserverRegistry::new(3, OverflowPolicy::Reject);
        let (a, mut a_client) = observer(256);
        let (b, b_client) = observer(256);
        let (c, mut c_client) = observer(256);
        registry.register(a);
        registry.register(b);
        registry.register(c);

        // Slot 1 goes away
        drop(b_client);

        let msg = EventMessage::open();
        let report = broadcast(&registry, &msg, None).await;
        assert_eq!(report, BroadcastReport { delivered: 2, failed: 1 });
        assert!(registry.is_active(0));
        assert!(!registry.is_active(1));
        assert!(registry.is_active(2));

        // Neighbours keep receiving later events
        let next = EventMessage::new(EventKind::Queued, "next\n");
        let report = broadcast(&registry, &next, None).await;
        assert_eq!(report, BroadcastReport { delivered: 2, failed: 0 });

        let expected = format!("{}{}", msg.text(), next.text());
        assert_eq!(read_text(&mut a_client, expected.len()).await, expected);
        assert_eq!(read_text(&mut c_client, expected.len()).await, expected);
    }

    #[tokio::test]
    async fn test_stalled_observer_hits_deadline() {
        let registry = ObserverRegistry::new(2, OverflowPolicy::Reject);
        // Tiny pipe that nobody reads fills up after a few bytes
        let (stalled, _stalled_client) = observer(4);
        let (healthy, mut healthy_client) = observer(256);
        registry.register(stalled);
        registry.register(healthy);

        let msg = EventMessage::open();
        let report = broadcast(&registry, &msg, Some(Duration::from_millis(50))).await;
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert!(!registry.is_active(0));
        assert_eq!(read_text(&mut healthy_client, msg.text().len()).await, msg.text());
    }

    #[tokio::test]
    async fn test_deactivate_cuts_stalled_delivery_and_closes() {
        let registry = Arc::new(ObserverRegistry::new(1, OverflowPolicy::Reject));
        // No deadline and a pipe that fills after 4 bytes: the write would wait forever
        let (stalled, mut stalled_client) = observer(4);
        registry.register(stalled);

        let round = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { broadcast(&registry, &EventMessage::open(), None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!round.is_finished());

        assert!(registry.deactivate(0));
        let report = tokio::time::timeout(Duration::from_secs(1), round)
            .await
            .expect("round ends once the slot is deactivated")
            .unwrap();
        assert_eq!(report, BroadcastReport { delivered: 0, failed: 1 });

        // The partial write is readable, then the connection is closed
        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(1), stalled_client.read_to_end(&mut rest))
            .await
            .expect("connection closed after deactivation")
            .unwrap();
        assert_eq!(rest.len(), 4);
    }

    #[tokio::test]
    async fn test_run_drains_buffer_until_closed() {
        let registry = Arc::new(ObserverRegistry::new(1, OverflowPolicy::Reject));
        let (a, mut a_client) = observer(1024);
        registry.register(a);

        let (publisher, receiver) = event_buffer(4, ByteOrder::Big);
        let handle = spawn_broadcaster(Arc::clone(&registry), receiver, None);

        publisher.open().await;
        publisher.aborted(None, "test").await;
        drop(publisher);
        handle.await.unwrap();

        let expected = "Resource holder is open\nRequester aborted: test\n";
        assert_eq!(read_text(&mut a_client, expected.len()).await, expected);
    }
}
