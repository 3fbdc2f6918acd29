//! Observer registration task

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::{ObserverRegistry, Registration};
use crate::transport::Acceptor;

/// Pause after a failed accept
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Accept observer connections forever and register each one
///
/// Never touches the event buffer or coordinator state.
pub async fn run_registration(acceptor: Arc<dyn Acceptor>, registry: Arc<ObserverRegistry>) {
    info!("Observer registration started");
    loop {
        match acceptor.accept().await {
            Ok((conn, peer)) => {
                info!(%peer, "Handling observer {}", peer);
                if registry.register(conn) == Registration::Rejected {
                    debug!(%peer, "run_registration: observer connection closed");
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept observer connection");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

/// Spawn the registration loop as a background task
pub fn spawn_registration(acceptor: Arc<dyn Acceptor>, registry: Arc<ObserverRegistry>) -> JoinHandle<()> {
    tokio::spawn(run_registration(acceptor, registry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observers::OverflowPolicy;
    use crate::transport::{Endpoint, bind_endpoint, parse_address};
    use tokio::net::TcpStream;

    async fn wait_for_active(registry: &ObserverRegistry, expected: usize) {
        for _ in 0..100 {
            if registry.active_count() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} active observers, found {}", expected, registry.active_count());
    }

    #[tokio::test]
    async fn test_registration_registers_tcp_observers() {
        let ip = parse_address("127.0.0.1").unwrap();
        let listener = bind_endpoint(ip, 0, 5, Endpoint::Observer).unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = Arc::new(ObserverRegistry::new(2, OverflowPolicy::Reject));

        let handle = spawn_registration(Arc::new(listener), Arc::clone(&registry));

        let _first = TcpStream::connect(addr).await.unwrap();
        let _second = TcpStream::connect(addr).await.unwrap();
        wait_for_active(&registry, 2).await;

        // Table is full; the third is accepted then closed
        let _third = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.active_count(), 2);

        handle.abort();
    }
}
