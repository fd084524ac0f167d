//! rpclink Common Library
//!
//! This crate provides the pieces shared by the rpclink client and server:
//!
//! - The length-prefixed wire protocol and message types
//! - The role-agnostic TLS credential builder
//!
//! One credential descriptor is derived from three declarative settings
//! (`use_ssl`, a combined key+certificate PEM path, and a peer-verification
//! skip flag) and is interpreted per role: the server side decides whether a
//! client certificate is demanded, the client side decides whether the
//! server certificate is verified.

/// TLS credential derivation shared by both roles
pub mod credentials;

/// Wire framing and message types
pub mod wire;

// Re-export commonly used types for convenience
pub use credentials::{Credentials, CredentialError};
pub use wire::{WireError, WireMessage, DEFAULT_MAX_PACKET_SIZE};
