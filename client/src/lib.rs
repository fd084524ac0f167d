//! rpclink Client Library
//!
//! The outbound half of an rpclink endpoint: dial a server, hold the
//! connection, issue request/response calls over it, and close it. The
//! connection is established eagerly at dial time, so credential and
//! handshake problems surface there rather than on the first call.
//!
//! # Example
//!
//! ```no_run
//! use rpclink_client::ClientConn;
//! use rpclink_common::Credentials;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), rpclink_client::ClientError> {
//! let credentials = Credentials::build(false, None, false)?;
//! let conn = ClientConn::dial(
//!     "127.0.0.1:35819",
//!     &credentials,
//!     Duration::from_secs(30),
//!     1024 * 1024,
//! )
//! .await?;
//!
//! conn.ping().await?;
//! let reply = conn.call("process", vec![]).await?;
//! println!("{} byte reply", reply.len());
//!
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

mod client;

pub use client::{ClientConn, ClientError};
