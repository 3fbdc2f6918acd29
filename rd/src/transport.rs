//! Connection acceptor
//!
//! The core only ever sees already-connected byte streams. This module binds the
//! three listening endpoints and hands accepted connections over as
//! [`BoxedConnection`] values.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use eyre::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, info};

/// Any bidirectional byte stream the core can drive
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Owned, type-erased connection
pub type BoxedConnection = Box<dyn Connection>;

/// The three listening endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Requester,
    ResourceHolder,
    Observer,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Endpoint::Requester => "requester",
            Endpoint::ResourceHolder => "resource-holder",
            Endpoint::Observer => "observer",
        };
        f.write_str(name)
    }
}

/// Source of accepted connections
#[async_trait]
pub trait Acceptor: Send + Sync {
    /// Wait for the next connection; returns it with a printable peer description
    async fn accept(&self) -> std::io::Result<(BoxedConnection, String)>;
}

#[async_trait]
impl Acceptor for TcpListener {
    async fn accept(&self) -> std::io::Result<(BoxedConnection, String)> {
        let (stream, peer) = TcpListener::accept(self).await?;
        // Tokens are tiny; don't let Nagle hold them back
        stream.set_nodelay(true)?;
        debug!(%peer, "Acceptor::accept: accepted tcp connection");
        Ok((Box::new(stream), peer.to_string()))
    }
}

/// Parse the configured listen address
pub fn parse_address(address: &str) -> Result<IpAddr> {
    address
        .parse::<IpAddr>()
        .with_context(|| format!("Invalid address: {}", address))
}

/// Bind and listen on one endpoint
///
/// Port 0 asks the OS for an ephemeral port; use `local_addr()` on the result.
pub fn bind_endpoint(address: IpAddr, port: u16, backlog: u32, endpoint: Endpoint) -> Result<TcpListener> {
    debug!(%address, port, backlog, %endpoint, "bind_endpoint: called");
    let addr = SocketAddr::new(address, port);

    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .with_context(|| format!("Failed to create {} socket", endpoint))?;

    socket
        .set_reuseaddr(true)
        .with_context(|| format!("Failed to configure {} socket", endpoint))?;
    socket
        .bind(addr)
        .with_context(|| format!("Failed to bind {} endpoint on {}", endpoint, addr))?;
    let listener = socket
        .listen(backlog)
        .with_context(|| format!("Failed to listen on {} endpoint", endpoint))?;

    let local = listener.local_addr().context("Failed to read bound address")?;
    info!(%endpoint, %local, "Endpoint listening");
    Ok(listener)
}
