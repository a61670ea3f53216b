//! Error types for certificate acquisition, gate configuration and serving.

use std::path::PathBuf;

use thiserror::Error;

use crate::crypto::DecryptError;

/// The gate or server was configured in a way that must not be served.
///
/// Always fatal: the server refuses to start.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// No shared token was supplied, which would disable authorisation.
    #[error("microauth: token missing")]
    MissingToken,

    /// The configured token header name is not a valid HTTP header name.
    #[error("invalid token header name: {0:?}")]
    InvalidHeaderName(String),

    /// A TLS listener was requested from an instance without a certificate.
    #[error("TLS requested but no certificate is configured")]
    MissingCertificate,
}

/// A certificate chain and private key could not be combined into a usable pair.
#[derive(Debug, Error)]
pub enum KeyPairError {
    /// The certificate PEM data could not be parsed.
    #[error("failed to parse certificate chain: {0}")]
    MalformedCertificate(String),

    /// The certificate PEM data contained no `CERTIFICATE` blocks.
    #[error("no certificate found in PEM data")]
    NoCertificate,

    /// The private key PEM data could not be parsed.
    #[error("failed to parse private key: {0}")]
    MalformedKey(String),

    /// The private key PEM data contained no supported private key block.
    #[error("no private key found in PEM data")]
    NoPrivateKey,

    /// The private key does not belong to the leaf certificate.
    #[error("private key does not match certificate public key")]
    Mismatch,
}

/// Self-signed certificate generation failed. No certificate is produced.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The OS random number generator failed.
    #[error("random number generator failure: {0}")]
    Rng(String),

    /// The asymmetric key pair could not be generated or encoded.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// The certificate could not be built, signed or encoded.
    #[error("certificate encoding failed: {0}")]
    Encoding(String),

    /// The generated PEM pair could not be turned into a usable key pair.
    #[error(transparent)]
    KeyPair(#[from] KeyPairError),
}

/// Loading a certificate and key from disk failed. No certificate is produced.
#[derive(Debug, Error)]
pub enum LoadError {
    /// A certificate or key file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The key file contains no PEM block.
    #[error("no PEM block found in key file {}", path.display())]
    Pem { path: PathBuf },

    /// The key block could not be decrypted (wrong password, unsupported
    /// cipher, corrupt data).
    #[error(transparent)]
    Decrypt(#[from] DecryptError),

    /// The certificate and (decrypted) key do not form a usable pair.
    #[error(transparent)]
    KeyPair(#[from] KeyPairError),
}

/// Starting or running a listener failed.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The gate configuration is invalid; nothing was bound.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The default instance's certificate could not be generated.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// rustls rejected the certificate/key pair when building the server config.
    #[error("failed to build TLS server config: {0}")]
    Tls(#[from] rustls::Error),

    /// Binding or accepting on the listen address failed.
    #[error("listener I/O failure: {0}")]
    Io(#[from] std::io::Error),
}
