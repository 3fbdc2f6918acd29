//! Correlation tokens
//!
//! A token is a fixed-width 4-byte value that ties a requester to its handshake.
//! The coordinator forwards it byte-for-byte and never reinterprets it. The
//! configured [`ByteOrder`] only matters when a token is rendered as an integer
//! (event text, bundled clients).

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Width of a correlation token on the wire
pub const TOKEN_WIDTH: usize = 4;

/// Canonical byte order used to interpret token bytes as an integer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ByteOrder {
    /// Network byte order
    #[default]
    Big,
    Little,
}

/// Opaque fixed-width token exchanged on the requester/holder path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationToken([u8; TOKEN_WIDTH]);

impl CorrelationToken {
    pub fn from_bytes(bytes: [u8; TOKEN_WIDTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_WIDTH] {
        &self.0
    }

    /// Encode an integer using the given byte order
    pub fn from_value(value: i32, order: ByteOrder) -> Self {
        match order {
            ByteOrder::Big => Self(value.to_be_bytes()),
            ByteOrder::Little => Self(value.to_le_bytes()),
        }
    }

    /// Token derived from a process id; ids beyond `i32::MAX` are masked into range
    pub fn from_pid(pid: u32, order: ByteOrder) -> Self {
        let value = i32::try_from(pid).unwrap_or((pid & i32::MAX as u32) as i32);
        Self::from_value(value, order)
    }

    /// Decode the token as an integer using the given byte order
    pub fn value(&self, order: ByteOrder) -> i32 {
        match order {
            ByteOrder::Big => i32::from_be_bytes(self.0),
            ByteOrder::Little => i32::from_le_bytes(self.0),
        }
    }

    /// Display adapter rendering the token as an integer
    pub fn display(&self, order: ByteOrder) -> TokenDisplay {
        TokenDisplay {
            token: *self,
            order,
        }
    }

    /// Read exactly one token; a short read surfaces as `UnexpectedEof`
    pub async fn read_from<R>(reader: &mut R) -> std::io::Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = [0u8; TOKEN_WIDTH];
        reader.read_exact(&mut buf).await?;
        debug!(bytes = ?buf, "CorrelationToken::read_from: read token");
        Ok(Self(buf))
    }

    /// Write the token bytes and flush
    pub async fn write_to<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        writer.write_all(&self.0).await?;
        writer.flush().await?;
        debug!(bytes = ?self.0, "CorrelationToken::write_to: wrote token");
        Ok(())
    }
}

/// See [`CorrelationToken::display`]
#[derive(Debug, Clone, Copy)]
pub struct TokenDisplay {
    token: CorrelationToken,
    order: ByteOrder,
}

impl fmt::Display for TokenDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token.value(self.order))
    }
}
