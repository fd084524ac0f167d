use std::{
    sync::atomic::{AtomicU32, Ordering},
    sync::Arc,
    time::Duration,
};

use rustls::pki_types::ServerName;
use thiserror::Error;
use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    sync::Mutex,
};
use tokio_rustls::TlsConnector;

use rpclink_common::{
    credentials::CredentialError,
    wire::{read_message, write_message, WireError, WireMessage},
    Credentials,
};

/// Errors raised by the outbound connection.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS handshake with {addr} failed: {source}")]
    Handshake {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot derive a TLS server name from address {addr:?}")]
    ServerName { addr: String },

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("connection already closed")]
    Closed,

    #[error("server reported an error for request {id}: {message}")]
    Remote { id: u32, message: String },

    #[error("unexpected message in response to request {id}")]
    UnexpectedResponse { id: u32 },
}

enum ClientStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    Closed,
}

async fn send(stream: &mut ClientStream, msg: &WireMessage, limit: usize) -> Result<(), ClientError> {
    match stream {
        ClientStream::Plain(s) => write_message(s, msg, limit).await?,
        ClientStream::Tls(s) => write_message(s.as_mut(), msg, limit).await?,
        ClientStream::Closed => return Err(ClientError::Closed),
    }
    Ok(())
}

async fn recv(stream: &mut ClientStream, limit: usize) -> Result<WireMessage, ClientError> {
    let msg = match stream {
        ClientStream::Plain(s) => read_message(s, limit).await?,
        ClientStream::Tls(s) => read_message(s.as_mut(), limit).await?,
        ClientStream::Closed => return Err(ClientError::Closed),
    };
    Ok(msg)
}

struct Inner {
    addr: String,
    max_packet_size: usize,
    next_id: AtomicU32,
    stream: Mutex<ClientStream>,
}

/// A handle on one outbound connection. Cheap to clone; all clones share the
/// underlying stream and calls are serialized on it.
#[derive(Clone)]
pub struct ClientConn {
    inner: Arc<Inner>,
}

impl ClientConn {
    /// Establish the connection: TCP connect bounded by `timeout`, then the
    /// TLS handshake when the credentials call for one.
    pub async fn dial(
        addr: &str,
        credentials: &Credentials,
        timeout: Duration,
        max_packet_size: usize,
    ) -> Result<Self, ClientError> {
        // Credentials are materialized before any connection attempt, so a
        // credential problem never reaches the network.
        let tls_config = credentials.client_config()?;

        let tcp = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::ConnectTimeout {
                addr: addr.to_string(),
                timeout,
            })?
            .map_err(|source| ClientError::Connect {
                addr: addr.to_string(),
                source,
            })?;

        let stream = match tls_config {
            Some(config) => {
                let server_name = server_name_for(addr)?;
                let connector = TlsConnector::from(Arc::new(config));
                let tls = connector.connect(server_name, tcp).await.map_err(|source| {
                    ClientError::Handshake {
                        addr: addr.to_string(),
                        source,
                    }
                })?;
                tracing::debug!("TLS session established with {addr}");
                ClientStream::Tls(Box::new(tls))
            }
            None => ClientStream::Plain(tcp),
        };

        tracing::info!("connected to {addr}");

        Ok(Self {
            inner: Arc::new(Inner {
                addr: addr.to_string(),
                max_packet_size,
                next_id: AtomicU32::new(0),
                stream: Mutex::new(stream),
            }),
        })
    }

    /// The address this connection was dialed against.
    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    /// Send a request to a named handler and wait for its reply.
    pub async fn call(&self, method: &str, body: Vec<u8>) -> Result<Vec<u8>, ClientError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let limit = self.inner.max_packet_size;

        let mut stream = self.inner.stream.lock().await;

        send(
            &mut stream,
            &WireMessage::Request {
                id,
                method: method.to_string(),
                body,
            },
            limit,
        )
        .await?;

        match recv(&mut stream, limit).await? {
            WireMessage::Response { id: got, body } if got == id => Ok(body),
            WireMessage::Error { id: got, message } if got == id => {
                Err(ClientError::Remote { id, message })
            }
            _ => Err(ClientError::UnexpectedResponse { id }),
        }
    }

    /// Health check: send a ping and expect a pong.
    pub async fn ping(&self) -> Result<(), ClientError> {
        let limit = self.inner.max_packet_size;
        let mut stream = self.inner.stream.lock().await;

        send(&mut stream, &WireMessage::Ping, limit).await?;

        match recv(&mut stream, limit).await? {
            WireMessage::Pong => Ok(()),
            _ => Err(ClientError::UnexpectedResponse { id: 0 }),
        }
    }

    /// True once `close` has completed (or another clone closed the
    /// connection).
    pub async fn is_closed(&self) -> bool {
        matches!(*self.inner.stream.lock().await, ClientStream::Closed)
    }

    /// Close the connection. A best-effort shutdown notice is sent first;
    /// closing an already-closed connection is a no-op.
    pub async fn close(&self) -> Result<(), ClientError> {
        let limit = self.inner.max_packet_size;
        let mut stream = self.inner.stream.lock().await;

        match std::mem::replace(&mut *stream, ClientStream::Closed) {
            ClientStream::Plain(mut s) => {
                let _ = write_message(&mut s, &WireMessage::Shutdown, limit).await;
                s.shutdown().await.map_err(WireError::Io)?;
            }
            ClientStream::Tls(mut s) => {
                let _ = write_message(s.as_mut(), &WireMessage::Shutdown, limit).await;
                s.shutdown().await.map_err(WireError::Io)?;
            }
            ClientStream::Closed => {}
        }

        tracing::info!("closed connection to {}", self.inner.addr);
        Ok(())
    }
}

/// Derive the SNI name from a `host:port` address. IP literals are valid
/// server names under rustls, so both DNS names and raw addresses work.
fn server_name_for(addr: &str) -> Result<ServerName<'static>, ClientError> {
    let host = addr
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(addr)
        .trim_start_matches('[')
        .trim_end_matches(']');

    ServerName::try_from(host.to_string()).map_err(|_| ClientError::ServerName {
        addr: addr.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_name_from_host_port() {
        let name = server_name_for("example.com:443").unwrap();
        assert!(matches!(name, ServerName::DnsName(_)));
    }

    #[test]
    fn server_name_from_ip_port() {
        let name = server_name_for("127.0.0.1:9999").unwrap();
        assert!(matches!(name, ServerName::IpAddress(_)));
    }

    #[test]
    fn server_name_from_bracketed_ipv6() {
        let name = server_name_for("[::1]:9999").unwrap();
        assert!(matches!(name, ServerName::IpAddress(_)));
    }

    #[test]
    fn empty_host_is_rejected() {
        assert!(matches!(
            server_name_for(":9999"),
            Err(ClientError::ServerName { .. })
        ));
    }
}
