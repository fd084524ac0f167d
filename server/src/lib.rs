//! rpclink Server Library
//!
//! The listening half of an rpclink endpoint: a registry of named request
//! handlers plus the accept/serve loop that dispatches framed requests to
//! them. The server is constructed and populated with handlers before the
//! listener exists; binding and running the loop belong to the endpoint's
//! lifecycle layer.
//!
//! Per-connection failures (a bad TLS handshake, a malformed frame, a
//! handler error) are logged and end that connection only. The serve loop
//! itself fails only when accepting stops working, and returns cleanly when
//! the shutdown signal arrives.

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    sync::watch,
};
use tokio_rustls::TlsAcceptor;

use rpclink_common::{
    credentials::CredentialError,
    wire::{read_message, write_message, WireError, WireMessage},
    Credentials,
};

/// A request handler: opaque request bytes in, opaque response bytes out.
pub type Handler = Arc<dyn Fn(Vec<u8>) -> anyhow::Result<Vec<u8>> + Send + Sync>;

/// Errors raised while constructing or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("a handler is already registered for method {0:?}")]
    DuplicateHandler(String),

    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),
}

/// A server instance: the handler registry, the packet size limits, and the
/// optional TLS acceptor, all fixed before the listener is bound.
pub struct RpcServer {
    handlers: HashMap<String, Handler>,
    max_packet_size: usize,
    acceptor: Option<TlsAcceptor>,
}

impl RpcServer {
    /// Construct a server instance from the shared credential descriptor.
    pub fn new(credentials: &Credentials, max_packet_size: usize) -> Result<Self, ServerError> {
        let acceptor = credentials
            .server_config()?
            .map(|config| TlsAcceptor::from(Arc::new(config)));

        Ok(Self {
            handlers: HashMap::new(),
            max_packet_size,
            acceptor,
        })
    }

    /// Attach a handler under a method name. Duplicate names are refused.
    pub fn register<F>(&mut self, method: impl Into<String>, handler: F) -> Result<(), ServerError>
    where
        F: Fn(Vec<u8>) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
    {
        let method = method.into();
        if self.handlers.contains_key(&method) {
            return Err(ServerError::DuplicateHandler(method));
        }
        self.handlers.insert(method, Arc::new(handler));
        Ok(())
    }

    /// Names of the registered handlers, mainly for logging.
    pub fn methods(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Run the accept loop until `shutdown` is signalled or accepting fails.
    /// Each accepted connection is served on its own task; the listener is
    /// dropped (and so closed) when this returns.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ServerError> {
        let server = Arc::new(self);

        loop {
            tokio::select! {
                // A stop that landed between bind and this point is still
                // observed: the receiver remembers the version it last saw.
                _ = shutdown.changed() => {
                    tracing::info!("serve loop stopping");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = accepted.map_err(ServerError::Accept)?;
                    let server = server.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, peer).await {
                            tracing::warn!("connection from {peer} failed: {e:#}");
                        }
                    });
                }
            }
        }
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> anyhow::Result<()> {
        tracing::debug!("new connection from {peer}");

        match &self.acceptor {
            Some(acceptor) => {
                let tls = acceptor.accept(stream).await?;
                tracing::debug!("TLS session established with {peer}");
                self.connection_loop(tls, peer).await
            }
            None => self.connection_loop(stream, peer).await,
        }
    }

    /// Read/dispatch/respond until the peer disconnects or says Shutdown.
    async fn connection_loop<S>(&self, mut stream: S, peer: SocketAddr) -> anyhow::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let msg = match read_message(&mut stream, self.max_packet_size).await {
                Ok(msg) => msg,
                Err(e) if e.is_disconnect() => {
                    tracing::debug!("{peer} disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            match msg {
                WireMessage::Ping => {
                    self.write(&mut stream, &WireMessage::Pong).await?;
                }
                WireMessage::Request { id, method, body } => {
                    let reply = self.dispatch(id, &method, body);
                    self.write(&mut stream, &reply).await?;
                }
                WireMessage::Shutdown => {
                    tracing::debug!("{peer} closed the connection");
                    return Ok(());
                }
                other => {
                    tracing::debug!("ignoring unexpected message from {peer}: {other:?}");
                }
            }
        }
    }

    fn dispatch(&self, id: u32, method: &str, body: Vec<u8>) -> WireMessage {
        let Some(handler) = self.handlers.get(method) else {
            return WireMessage::Error {
                id,
                message: format!("unknown method {method:?}"),
            };
        };

        match handler(body) {
            Ok(body) => WireMessage::Response { id, body },
            Err(e) => {
                tracing::warn!("handler {method:?} failed for request {id}: {e:#}");
                WireMessage::Error {
                    id,
                    message: e.to_string(),
                }
            }
        }
    }

    async fn write<S>(&self, stream: &mut S, msg: &WireMessage) -> Result<(), WireError>
    where
        S: AsyncWrite + Unpin,
    {
        write_message(stream, msg, self.max_packet_size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_handler_is_refused() {
        let credentials = Credentials::build(false, None, false).unwrap();
        let mut server = RpcServer::new(&credentials, 1024).unwrap();

        server.register("process", |body| Ok(body)).unwrap();
        let err = server.register("process", |body| Ok(body)).unwrap_err();
        assert!(matches!(err, ServerError::DuplicateHandler(_)));
        assert_eq!(server.methods(), vec!["process"]);
    }

    #[test]
    fn unknown_method_yields_error_reply() {
        let credentials = Credentials::build(false, None, false).unwrap();
        let server = RpcServer::new(&credentials, 1024).unwrap();

        match server.dispatch(3, "nope", vec![]) {
            WireMessage::Error { id, message } => {
                assert_eq!(id, 3);
                assert!(message.contains("nope"));
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn handler_failure_yields_error_reply() {
        let credentials = Credentials::build(false, None, false).unwrap();
        let mut server = RpcServer::new(&credentials, 1024).unwrap();
        server
            .register("explode", |_| anyhow::bail!("boom"))
            .unwrap();

        match server.dispatch(9, "explode", vec![]) {
            WireMessage::Error { id, message } => {
                assert_eq!(id, 9);
                assert_eq!(message, "boom");
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }
}
