//! TLS credential derivation shared by the client and server roles.
//!
//! One descriptor is built from the declarative settings and interpreted per
//! role when it is turned into a rustls configuration. The same combined PEM
//! file supplies both the certificate chain and the private key, and its
//! certificates double as the trust roots when peer verification is on.

use std::{fs, path::Path, path::PathBuf, sync::Arc};

use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
    server::WebPkiClientVerifier,
    ClientConfig, RootCertStore, ServerConfig,
};
use thiserror::Error;

/// Errors raised while loading or materializing transport credentials.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("cannot read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid certificate material in {path:?}: {source}")]
    ParseCertificate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificate found in {path:?}")]
    NoCertificate { path: PathBuf },

    #[error("no private key found in {path:?}")]
    NoPrivateKey { path: PathBuf },

    #[error("server role requires a local certificate but no combined PEM is configured")]
    MissingServerIdentity,

    #[error("peer verification requested but no trust roots are configured")]
    NoTrustRoots,

    #[error("cannot build client certificate verifier: {0}")]
    ClientVerifier(#[from] rustls::server::VerifierBuilderError),

    #[error("invalid TLS configuration: {0}")]
    Tls(#[from] rustls::Error),
}

/// A local certificate chain with its private key, parsed from one combined
/// PEM file.
#[derive(Debug)]
pub struct Identity {
    cert_chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
}

/// The resolved transport-security material, or the explicit absence of it.
#[derive(Debug)]
pub enum Credentials {
    /// Plaintext transport, no certificate loading occurred
    Insecure,
    /// TLS transport
    Tls {
        /// Local identity from the combined PEM, if one was configured
        identity: Option<Identity>,
        /// Skip verification of the peer's certificate
        skip_peer_verification: bool,
    },
}

impl Credentials {
    /// Derive credentials from the declarative settings.
    ///
    /// With `use_ssl` off this never touches the filesystem. With it on, the
    /// combined PEM (when configured) must parse to at least one certificate
    /// and exactly one usable private key.
    pub fn build(
        use_ssl: bool,
        combined_pem: Option<&Path>,
        skip_peer_verification: bool,
    ) -> Result<Self, CredentialError> {
        if !use_ssl {
            return Ok(Credentials::Insecure);
        }

        let identity = match combined_pem {
            Some(path) => Some(load_identity(path)?),
            None => None,
        };

        Ok(Credentials::Tls {
            identity,
            skip_peer_verification,
        })
    }

    /// True when the descriptor carries TLS material.
    pub fn is_tls(&self) -> bool {
        matches!(self, Credentials::Tls { .. })
    }

    /// Materialize the server-side rustls configuration.
    ///
    /// Returns `None` for insecure transport. The server must present a
    /// certificate, so a missing identity is an error here. When peer
    /// verification is on, a client certificate is demanded and checked
    /// against the certificates from the combined PEM.
    pub fn server_config(&self) -> Result<Option<ServerConfig>, CredentialError> {
        let (identity, skip) = match self {
            Credentials::Insecure => return Ok(None),
            Credentials::Tls {
                identity,
                skip_peer_verification,
            } => (identity, *skip_peer_verification),
        };

        ensure_crypto_provider();

        let identity = identity
            .as_ref()
            .ok_or(CredentialError::MissingServerIdentity)?;

        let builder = if skip {
            ServerConfig::builder().with_no_client_auth()
        } else {
            let verifier = WebPkiClientVerifier::builder(Arc::new(trust_roots(identity))).build()?;
            ServerConfig::builder().with_client_cert_verifier(verifier)
        };

        let config = builder
            .with_single_cert(identity.cert_chain.clone(), identity.private_key.clone_key())?;

        Ok(Some(config))
    }

    /// Materialize the client-side rustls configuration.
    ///
    /// Returns `None` for insecure transport. When peer verification is
    /// skipped, any server certificate is accepted; otherwise the server is
    /// verified against the certificates from the combined PEM, and an
    /// endpoint with no PEM at all has no trust roots to verify against.
    /// The identity, when present, is offered as the client certificate.
    pub fn client_config(&self) -> Result<Option<ClientConfig>, CredentialError> {
        let (identity, skip) = match self {
            Credentials::Insecure => return Ok(None),
            Credentials::Tls {
                identity,
                skip_peer_verification,
            } => (identity, *skip_peer_verification),
        };

        ensure_crypto_provider();

        let builder = if skip {
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(InsecureServerVerifier))
        } else {
            let roots = identity
                .as_ref()
                .map(trust_roots)
                .filter(|r| !r.is_empty())
                .ok_or(CredentialError::NoTrustRoots)?;
            ClientConfig::builder().with_root_certificates(roots)
        };

        let config = match identity {
            Some(identity) => builder.with_client_auth_cert(
                identity.cert_chain.clone(),
                identity.private_key.clone_key(),
            )?,
            None => builder.with_no_client_auth(),
        };

        Ok(Some(config))
    }
}

fn load_identity(path: &Path) -> Result<Identity, CredentialError> {
    let pem = fs::read(path).map_err(|source| CredentialError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let cert_chain = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| CredentialError::ParseCertificate {
            path: path.to_path_buf(),
            source,
        })?;

    if cert_chain.is_empty() {
        return Err(CredentialError::NoCertificate {
            path: path.to_path_buf(),
        });
    }

    let private_key = rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|source| CredentialError::ParseCertificate {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| CredentialError::NoPrivateKey {
            path: path.to_path_buf(),
        })?;

    tracing::debug!("loaded identity with {} certificate(s) from {path:?}", cert_chain.len());

    Ok(Identity {
        cert_chain,
        private_key,
    })
}

fn trust_roots(identity: &Identity) -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.add_parsable_certificates(identity.cert_chain.iter().cloned());
    roots
}

fn ensure_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Certificate verifier that accepts any server certificate. Used only when
/// the configuration explicitly skips peer verification.
#[derive(Debug)]
struct InsecureServerVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureServerVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
