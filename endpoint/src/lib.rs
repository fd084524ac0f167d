//! rpclink Endpoint
//!
//! One configuration value describes one RPC endpoint, and can be activated
//! as either an outbound client or a listening server — never both at once.
//! This crate owns that mutual-exclusion state machine: validation of the
//! declarative settings, the role guard, and the client and server
//! lifecycles built on [`rpclink_client`] and [`rpclink_server`].
//!
//! All role state lives behind one lock. The lock is held around
//! bookkeeping and the bounded dial/bind steps, never around the blocking
//! serve loop, so `stop_server`, `server_started`, and the client accessors
//! stay responsive while a server runs.
//!
//! # Example
//!
//! ```no_run
//! use rpclink_endpoint::EndpointConfig;
//!
//! # async fn run() -> Result<(), rpclink_endpoint::EndpointError> {
//! let mut cfg = EndpointConfig::default();
//! cfg.addr = "127.0.0.1:35819".to_string();
//! cfg.validate()?;
//!
//! cfg.init_client().await?;
//! if let Some(client) = cfg.client().await {
//!     client.ping().await?;
//! }
//! cfg.close_client().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod lifecycle;

pub use config::{EndpointConfig, DEFAULT_TIMEOUT};
pub use error::{EndpointError, Role};

// Re-export the handles a consumer interacts with.
pub use rpclink_client::{ClientConn, ClientError};
pub use rpclink_common::{Credentials, DEFAULT_MAX_PACKET_SIZE};
pub use rpclink_server::{RpcServer, ServerError};
