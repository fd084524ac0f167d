//! Length-prefixed wire protocol.
//!
//! Every frame is `[4-byte LE length][bincode message bytes]`. The length
//! limit is the endpoint's configured maximum packet size and is enforced on
//! both encode and decode.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Packet size applied when the configuration leaves `max-packet-size`
/// unset.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 256 * 1024 * 1024;

/// Errors raised while reading or writing frames.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("i/o failure on the wire: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[source] bincode::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[source] bincode::Error),

    #[error("message of {got} bytes exceeds the {limit} byte packet limit")]
    TooLarge { got: usize, limit: usize },
}

impl WireError {
    /// True when the error is an ordinary peer disconnect rather than a
    /// protocol or i/o fault.
    pub fn is_disconnect(&self) -> bool {
        match self {
            WireError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Messages exchanged between an rpclink client and server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireMessage {
    /// Ping message to check connection health
    Ping,
    /// Pong response to ping
    Pong,
    /// Request dispatched to a registered handler
    Request {
        /// Identifier echoed back in the response
        id: u32,
        /// Name of the registered handler
        method: String,
        /// Opaque request payload
        body: Vec<u8>,
    },
    /// Successful response to a request
    Response {
        /// Identifier matching the request
        id: u32,
        /// Opaque response payload
        body: Vec<u8>,
    },
    /// Error response to a request
    Error {
        /// Identifier matching the request
        id: u32,
        /// Error message describing what went wrong
        message: String,
    },
    /// Signal that the sender is done with the connection
    Shutdown,
}

/// Write one framed message.
pub async fn write_message<W>(
    writer: &mut W,
    msg: &WireMessage,
    limit: usize,
) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let data = bincode::serialize(msg).map_err(WireError::Encode)?;
    if data.len() > limit {
        return Err(WireError::TooLarge {
            got: data.len(),
            limit,
        });
    }

    writer.write_all(&(data.len() as u32).to_le_bytes()).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message.
pub async fn read_message<R>(reader: &mut R, limit: usize) -> Result<WireMessage, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;

    if len > limit {
        return Err(WireError::TooLarge { got: len, limit });
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    bincode::deserialize(&data).map_err(WireError::Decode)
}
