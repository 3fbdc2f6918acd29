//! Server context
//!
//! Owns everything the three concurrent parts share: listening endpoints, the
//! event buffer, and the observer registry. Startup order:
//!
//! 1. Bind every endpoint before any accept
//! 2. Coordinator accepts the resource holder, then starts serving requesters
//! 3. Observer registration and the broadcaster run alongside from the start

use std::net::SocketAddr;
use std::sync::Arc;

use eyre::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorStats};
use crate::events::{EventReceiver, event_buffer};
use crate::observers::{ObserverRegistry, spawn_broadcaster, spawn_registration};
use crate::transport::{Endpoint, bind_endpoint, parse_address};

/// Addresses the endpoints actually bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalAddrs {
    pub requester: SocketAddr,
    pub holder: SocketAddr,
    pub observer: Option<SocketAddr>,
}

/// Bound, not yet running server
pub struct Server {
    config: Config,
    requester: Arc<TcpListener>,
    holder: Arc<TcpListener>,
    observer: Option<Arc<TcpListener>>,
    registry: Arc<ObserverRegistry>,
    coordinator: Coordinator,
    receiver: EventReceiver,
}

impl Server {
    /// Bind all endpoints
    ///
    /// Any failure here is a setup error: nothing has been served yet.
    pub fn bind(config: Config) -> Result<Self> {
        debug!(?config.server, "Server::bind: called");
        let ip = parse_address(&config.server.address)?;
        let backlog = config.server.backlog;

        let requester = bind_endpoint(ip, config.server.requester_port, backlog, Endpoint::Requester)?;
        let holder = bind_endpoint(ip, config.server.holder_port, backlog, Endpoint::ResourceHolder)?;
        let observer = config
            .server
            .observer_port
            .map(|port| bind_endpoint(ip, port, backlog, Endpoint::Observer))
            .transpose()?;

        let (publisher, receiver) = event_buffer(config.events.buffer, config.server.token_byte_order);
        let registry = Arc::new(ObserverRegistry::new(
            config.observers.capacity,
            config.observers.overflow,
        ));
        let coordinator = Coordinator::new(config.coordinator.clone(), publisher);

        Ok(Self {
            config,
            requester: Arc::new(requester),
            holder: Arc::new(holder),
            observer: observer.map(Arc::new),
            registry,
            coordinator,
            receiver,
        })
    }

    pub fn local_addrs(&self) -> Result<LocalAddrs> {
        Ok(LocalAddrs {
            requester: self.requester.local_addr().context("Failed to read requester address")?,
            holder: self.holder.local_addr().context("Failed to read holder address")?,
            observer: self
                .observer
                .as_ref()
                .map(|l| l.local_addr())
                .transpose()
                .context("Failed to read observer address")?,
        })
    }

    /// Shared observer registry
    pub fn registry(&self) -> Arc<ObserverRegistry> {
        Arc::clone(&self.registry)
    }

    /// Coordinator counters
    pub fn stats(&self) -> Arc<CoordinatorStats> {
        self.coordinator.stats()
    }

    /// Run until shutdown is requested or the coordinator gives up
    ///
    /// Shutdown is immediate: in-flight sessions and undelivered events are
    /// dropped along with every socket.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        let Server {
            config,
            requester,
            holder,
            observer,
            registry,
            coordinator,
            receiver,
        } = self;

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        match observer {
            Some(listener) => {
                tasks.push(spawn_registration(listener, Arc::clone(&registry)));
                tasks.push(spawn_broadcaster(
                    Arc::clone(&registry),
                    receiver,
                    config.observers.write_timeout(),
                ));
            }
            None => {
                info!("No observer endpoint configured, events go to the log only");
                tasks.push(tokio::spawn(log_events(receiver)));
            }
        }

        let result = tokio::select! {
            res = coordinator.run(holder, requester) => res,
            _ = shutdown.recv() => {
                info!("Shutdown requested");
                Ok(())
            }
        };

        debug!(count = tasks.len(), "Server::run: aborting background tasks");
        for task in tasks {
            task.abort();
        }
        info!("disconnected");
        result
    }
}

/// Drain events when nobody can observe them
async fn log_events(mut receiver: EventReceiver) {
    while let Some(msg) = receiver.recv().await {
        debug!(kind = msg.kind().as_str(), text = msg.text().trim_end(), "event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn ephemeral(observer: bool) -> Config {
        Config {
            server: ServerConfig {
                requester_port: 0,
                holder_port: 0,
                observer_port: observer.then_some(0),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bind_all_endpoints() {
        let server = Server::bind(ephemeral(true)).unwrap();
        let addrs = server.local_addrs().unwrap();
        assert_ne!(addrs.requester.port(), 0);
        assert_ne!(addrs.holder.port(), 0);
        assert!(addrs.observer.is_some());
        assert_eq!(server.registry().capacity(), 15);
    }

    #[tokio::test]
    async fn test_observer_endpoint_is_optional() {
        let server = Server::bind(ephemeral(false)).unwrap();
        assert_eq!(server.local_addrs().unwrap().observer, None);
    }

    #[tokio::test]
    async fn test_invalid_address_is_setup_error() {
        let mut config = ephemeral(false);
        config.server.address = "999.1.1.1".to_string();
        assert!(Server::bind(config).is_err());
    }

    #[tokio::test]
    async fn test_shutdown_stops_run() {
        let server = Server::bind(ephemeral(true)).unwrap();
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(server.run(rx));

        tx.send(()).await.unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
