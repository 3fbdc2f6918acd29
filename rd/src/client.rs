//! Bundled peers: observer, requester and resource holder
//!
//! Thin TCP clients that speak the coordinator's wire protocol. Used by the
//! `rd observe|request|hold` commands and by the integration tests.

use std::time::Duration;

use eyre::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info};

use crate::events::MAX_EVENT_LEN;
use crate::token::{ByteOrder, CorrelationToken};

/// Stream the observer feed into `sink` until the server closes the connection
///
/// Returns the number of bytes received.
pub async fn observe<A, W>(addr: A, sink: &mut W) -> Result<u64>
where
    A: ToSocketAddrs,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut stream = TcpStream::connect(addr)
        .await
        .context("Failed to connect to observer endpoint")?;
    info!("Observer is ready");

    let mut buf = [0u8; MAX_EVENT_LEN];
    let mut total = 0u64;
    loop {
        let n = stream.read(&mut buf).await.context("Failed to read event feed")?;
        if n == 0 {
            debug!(total, "observe: server closed connection");
            return Ok(total);
        }
        total += n as u64;
        sink.write_all(&buf[..n]).await.context("Failed to write event")?;
        sink.flush().await.context("Failed to flush event")?;
    }
}

/// Send one token and wait for the completion token
pub async fn request<A>(addr: A, token: CorrelationToken) -> Result<CorrelationToken>
where
    A: ToSocketAddrs,
{
    let mut stream = TcpStream::connect(addr)
        .await
        .context("Failed to connect to requester endpoint")?;
    stream.set_nodelay(true).context("Failed to configure socket")?;

    token.write_to(&mut stream).await.context("Failed to send token")?;
    debug!(bytes = ?token.as_bytes(), "request: token sent, waiting for release");

    CorrelationToken::read_from(&mut stream)
        .await
        .context("Connection closed before completion token arrived")
}

/// Act as the resource holder: echo every token after `service_time`
///
/// Stops after `sessions` tokens if given, or when the coordinator closes the
/// connection. Returns the number of tokens served.
pub async fn hold<A>(addr: A, service_time: Duration, sessions: Option<usize>, order: ByteOrder) -> Result<usize>
where
    A: ToSocketAddrs,
{
    let mut stream = TcpStream::connect(addr)
        .await
        .context("Failed to connect to resource holder endpoint")?;
    stream.set_nodelay(true).context("Failed to configure socket")?;
    info!("Resource holder is ready");

    let mut served = 0usize;
    while sessions.is_none_or(|limit| served < limit) {
        let token = match CorrelationToken::read_from(&mut stream).await {
            Ok(token) => token,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!(served, "hold: coordinator closed connection");
                break;
            }
            Err(e) => return Err(e).context("Failed to read token"),
        };
        info!(token = %token.display(order), "Serving requester {}", token.display(order));

        if !service_time.is_zero() {
            tokio::time::sleep(service_time).await;
        }

        token.write_to(&mut stream).await.context("Failed to send completion token")?;
        served += 1;
    }

    Ok(served)
}
