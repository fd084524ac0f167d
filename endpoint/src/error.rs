use std::path::PathBuf;

use thiserror::Error;

use rpclink_client::ClientError;
use rpclink_common::CredentialError;
use rpclink_server::ServerError;

/// The mutually exclusive operating mode of a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

/// Everything a lifecycle operation can report. Ordinary misuse (wrong
/// role, duplicate activation) travels through here like any other failure;
/// nothing panics.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// Aggregate of every field-level problem found by `validate`.
    #[error("invalid endpoint configuration: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// A single static-field problem caught at activation time.
    #[error("{0}")]
    Config(String),

    #[error("cannot resolve {path:?} to an absolute path: {source}")]
    PathResolution {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("client already initialized")]
    AlreadyInitialized,

    #[error("server already started")]
    AlreadyStarted,

    #[error("already used as a {0}")]
    RoleConflict(Role),

    #[error("failed to load transport credentials: {0}")]
    CredentialLoad(#[from] CredentialError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("handler registration failed: {0}")]
    Registration(#[source] anyhow::Error),

    #[error("client connection failed: {0}")]
    Connection(#[from] ClientError),

    #[error("serve loop failed: {0}")]
    Serve(#[source] ServerError),

    #[error("failed to close connection: {0}")]
    Close(#[source] ClientError),
}
