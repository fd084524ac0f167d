//! The role guard and both activation lifecycles.
//!
//! All role state is one tagged variant behind one lock: a configuration is
//! idle, a client, or a server, and the transitions are decided while the
//! lock is held. The server's bind phase runs locked; the serve loop runs
//! with the lock released, which is what keeps `stop_server` and the client
//! accessors callable while a server is up.

use tokio::{net::TcpListener, sync::watch};

use crate::config::EndpointConfig;
use crate::error::{EndpointError, Role};
use rpclink_client::{ClientConn, ClientError};
use rpclink_common::Credentials;
use rpclink_server::RpcServer;

/// At most one role is ever active; both handles living in one variant
/// makes the "never both" invariant structural.
#[derive(Default)]
pub(crate) enum RoleState {
    #[default]
    Idle,
    Client(ClientConn),
    Server {
        shutdown: watch::Sender<bool>,
        /// Which activation installed this slot; the post-serve cleanup
        /// only clears its own.
        generation: u64,
    },
}

impl EndpointConfig {
    fn credentials(&self) -> Result<Credentials, EndpointError> {
        Ok(Credentials::build(
            self.use_ssl,
            self.ssl_combined_pem.as_deref(),
            self.skip_tls_verification,
        )?)
    }

    /// Activate the client role: build credentials, dial, store the handle.
    ///
    /// Fails if the address is empty, the server role is active, or a
    /// client is already initialized. On a dial failure the client slot is
    /// left untouched.
    pub async fn init_client(&self) -> Result<(), EndpointError> {
        let mut state = self.state.lock().await;

        if self.addr.is_empty() {
            return Err(EndpointError::Config(
                "client address is undefined".to_string(),
            ));
        }

        match &*state {
            RoleState::Server { .. } => return Err(EndpointError::RoleConflict(Role::Server)),
            RoleState::Client(_) => return Err(EndpointError::AlreadyInitialized),
            RoleState::Idle => {}
        }

        let credentials = self.credentials()?;
        let conn =
            ClientConn::dial(&self.addr, &credentials, self.timeout, self.max_packet_size)
                .await
                .map_err(|e| match e {
                    // A credential problem is a load failure, not a dial
                    // failure, wherever it is raised.
                    ClientError::Credentials(e) => EndpointError::CredentialLoad(e),
                    other => EndpointError::Connection(other),
                })?;

        tracing::info!("endpoint {} initialized as client", self.addr);
        *state = RoleState::Client(conn);
        Ok(())
    }

    /// The current client handle, if the client role is active.
    pub async fn client(&self) -> Option<ClientConn> {
        match &*self.state.lock().await {
            RoleState::Client(conn) => Some(conn.clone()),
            _ => None,
        }
    }

    /// Close and clear the client handle. A no-op when no client is active;
    /// the slot is cleared even when the close itself reports an error.
    pub async fn close_client(&self) -> Result<(), EndpointError> {
        let mut state = self.state.lock().await;

        match std::mem::take(&mut *state) {
            RoleState::Client(conn) => {
                tracing::info!("endpoint {} client closed", self.addr);
                conn.close().await.map_err(EndpointError::Close)
            }
            other => {
                // Not ours to clear: an active server slot stays put.
                *state = other;
                Ok(())
            }
        }
    }

    /// Activate the server role and run it to completion.
    ///
    /// Under the lock: role checks, credential build, server construction,
    /// handler registration through `registrator`, and the bind. Any
    /// failure there aborts with no listener and no state change (the
    /// constructed-but-unbound server instance is discarded with it).
    ///
    /// With the lock released: the accept/serve loop, which occupies the
    /// calling task until `stop_server` is called or accepting fails. On
    /// return this activation's server slot is cleared; a newer activation
    /// installed after a stop is left alone.
    pub async fn start_server<F>(&self, registrator: F) -> Result<(), EndpointError>
    where
        F: FnOnce(&mut RpcServer) -> anyhow::Result<()>,
    {
        let (server, listener, shutdown_rx, generation) = {
            let mut state = self.state.lock().await;

            if self.addr.is_empty() {
                return Err(EndpointError::Config(
                    "server address is undefined".to_string(),
                ));
            }

            match &*state {
                RoleState::Client(_) => return Err(EndpointError::RoleConflict(Role::Client)),
                RoleState::Server { .. } => return Err(EndpointError::AlreadyStarted),
                RoleState::Idle => {}
            }

            let credentials = self.credentials()?;
            let mut server = RpcServer::new(&credentials, self.max_packet_size)
                .map_err(|e| match e {
                    rpclink_server::ServerError::Credentials(e) => EndpointError::CredentialLoad(e),
                    other => EndpointError::Serve(other),
                })?;

            registrator(&mut server).map_err(EndpointError::Registration)?;

            let listener =
                TcpListener::bind(self.addr.as_str())
                    .await
                    .map_err(|source| EndpointError::Bind {
                        addr: self.addr.clone(),
                        source,
                    })?;

            tracing::info!(
                "endpoint {} serving methods {:?}",
                self.addr,
                server.methods()
            );

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let generation = self
                .server_generation
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            *state = RoleState::Server {
                shutdown: shutdown_tx,
                generation,
            };

            (server, listener, shutdown_rx, generation)
        };

        // Lock released: the serve loop may block for the server's lifetime.
        let result = server.serve(listener, shutdown_rx).await;

        self.clear_server(generation).await;

        result.map_err(EndpointError::Serve)
    }

    /// Signal the running serve loop to stop and clear the server slot.
    /// Safe from any task, and a no-op when no server is active.
    pub async fn stop_server(&self) -> Result<(), EndpointError> {
        let mut state = self.state.lock().await;

        if let RoleState::Server { shutdown, .. } = &*state {
            // The receiver is gone if the serve loop already exited.
            let _ = shutdown.send(true);
            *state = RoleState::Idle;
            tracing::info!("endpoint {} server stopped", self.addr);
        }

        Ok(())
    }

    /// True strictly between a successful bind and stop / serve-loop exit.
    pub async fn server_started(&self) -> bool {
        matches!(*self.state.lock().await, RoleState::Server { .. })
    }

    /// Clear the server slot, but only if it still belongs to the
    /// activation that is unwinding; a stop followed by a quick restart
    /// may have installed a newer one.
    async fn clear_server(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if matches!(&*state, RoleState::Server { generation: g, .. } if *g == generation) {
            *state = RoleState::Idle;
        }
    }
}
