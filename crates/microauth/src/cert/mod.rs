//! Certificates served by the TLS listener.
//!
//! A [`Certificate`] is produced either by [`generate`] (fresh self-signed RSA
//! certificate) or by [`load`] (PEM files on disk, key optionally encrypted).
//! Both paths finish in [`Certificate::from_pem`], which refuses a key that
//! does not belong to the leaf certificate.

pub mod generate;
pub mod load;

pub use generate::{generate, DEFAULT_ORGANIZATION};
pub use load::load;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use time::OffsetDateTime;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};
use zeroize::Zeroizing;

use crate::error::KeyPairError;

/// An immutable certificate chain and matching private key, ready for rustls.
pub struct Certificate {
    cert_pem: Vec<u8>,
    key_pem: Zeroizing<Vec<u8>>,
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    subject: String,
    serial: Vec<u8>,
}

impl Certificate {
    /// Combine a PEM certificate chain and a PEM private key into a key pair.
    ///
    /// The first certificate in `cert_pem` is the leaf; its validity window,
    /// subject and serial number are recorded.
    ///
    /// # Errors
    ///
    /// Returns a [`KeyPairError`] if either input cannot be parsed or the key
    /// does not match the leaf certificate's public key.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, KeyPairError> {
        let chain = rustls_pemfile::certs(&mut std::io::BufReader::new(cert_pem))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| KeyPairError::MalformedCertificate(e.to_string()))?;
        if chain.is_empty() {
            return Err(KeyPairError::NoCertificate);
        }

        let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(key_pem))
            .map_err(|e| KeyPairError::MalformedKey(e.to_string()))?
            .ok_or(KeyPairError::NoPrivateKey)?;

        ensure_pair(&chain, &key)?;

        let (not_before, not_after, subject, serial) = {
            let (_, leaf) = X509Certificate::from_der(chain[0].as_ref())
                .map_err(|e| KeyPairError::MalformedCertificate(e.to_string()))?;
            (
                leaf.validity().not_before.to_datetime(),
                leaf.validity().not_after.to_datetime(),
                subject_identity(&leaf),
                strip_leading_zeros(leaf.raw_serial()).to_vec(),
            )
        };

        Ok(Self {
            cert_pem: cert_pem.to_vec(),
            key_pem: Zeroizing::new(key_pem.to_vec()),
            chain,
            key,
            not_before,
            not_after,
            subject,
            serial,
        })
    }

    /// PEM-encoded certificate chain.
    pub fn cert_pem(&self) -> &[u8] {
        &self.cert_pem
    }

    /// PEM-encoded (plaintext) private key.
    pub fn key_pem(&self) -> &[u8] {
        &self.key_pem
    }

    /// DER certificate chain, leaf first.
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// A fresh copy of the DER private key for handing to rustls.
    pub fn private_key(&self) -> PrivateKeyDer<'static> {
        self.key.clone_key()
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    /// The leaf's common name, or its first DNS name when it has no CN.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Leaf serial number as big-endian bytes without leading zeros.
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("serial", &hex::encode(&self.serial))
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("chain_len", &self.chain.len())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Compare the leaf's SubjectPublicKeyInfo against the private key's public half.
fn ensure_pair(
    chain: &[CertificateDer<'static>],
    key: &PrivateKeyDer<'static>,
) -> Result<(), KeyPairError> {
    let provider = rustls::crypto::ring::default_provider();
    let signing_key = provider
        .key_provider
        .load_private_key(key.clone_key())
        .map_err(|e| KeyPairError::MalformedKey(e.to_string()))?;

    match CertifiedKey::new(chain.to_vec(), signing_key).keys_match() {
        Ok(()) => Ok(()),
        Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::KeyMismatch)) => {
            Err(KeyPairError::Mismatch)
        }
        // Key types that cannot expose their public half are left to the handshake.
        Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::Unknown)) => Ok(()),
        Err(e) => Err(KeyPairError::MalformedCertificate(e.to_string())),
    }
}

fn subject_identity(leaf: &X509Certificate<'_>) -> String {
    if let Some(cn) = leaf
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
    {
        return cn.to_owned();
    }

    leaf.subject_alternative_name()
        .ok()
        .flatten()
        .and_then(|san| {
            san.value.general_names.iter().find_map(|name| match name {
                GeneralName::DNSName(dns) => Some((*dns).to_owned()),
                _ => None,
            })
        })
        .unwrap_or_default()
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}
