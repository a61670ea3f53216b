//! Self-signed certificate generation.

use rand::rngs::OsRng;
use rand::RngCore;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SerialNumber,
};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use time::{Duration, OffsetDateTime};
use tracing::info;

use super::Certificate;
use crate::error::GenerationError;

/// Organisation placed in the subject of every generated certificate.
pub const DEFAULT_ORGANIZATION: &str = "Microbox Acme Co";

const RSA_BITS: usize = 2048;

/// One hundred 365-day years.
const VALIDITY_DAYS: i64 = 365 * 100;

/// Serial numbers are drawn uniformly from `[0, 2^128)`.
const SERIAL_LEN: usize = 16;

/// Generate a self-signed RSA-2048 server certificate for `host`.
///
/// The certificate is its own issuer, valid from now for one hundred years,
/// carries `host` as both common name and subject alternative name, and has a
/// random 128-bit serial number.
///
/// # Errors
///
/// Returns a [`GenerationError`] if the RNG, key generation or certificate
/// encoding fails. No partial certificate is ever returned.
pub fn generate(host: &str) -> Result<Certificate, GenerationError> {
    let mut rng = OsRng;

    let private_key = RsaPrivateKey::new(&mut rng, RSA_BITS)
        .map_err(|e| GenerationError::KeyGeneration(e.to_string()))?;
    let key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| GenerationError::KeyGeneration(e.to_string()))?;
    let key_pair = KeyPair::from_pem_and_sign_algo(&key_pem, &rcgen::PKCS_RSA_SHA256)
        .map_err(|e| GenerationError::KeyGeneration(e.to_string()))?;

    let mut serial = [0u8; SERIAL_LEN];
    rng.try_fill_bytes(&mut serial)
        .map_err(|e| GenerationError::Rng(e.to_string()))?;

    let mut params = CertificateParams::new(vec![host.to_owned()])
        .map_err(|e| GenerationError::Encoding(e.to_string()))?;

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, host);
    distinguished_name.push(DnType::OrganizationName, DEFAULT_ORGANIZATION);
    params.distinguished_name = distinguished_name;

    params.serial_number = Some(SerialNumber::from_slice(&serial));
    params.not_before = OffsetDateTime::now_utc();
    params.not_after = params.not_before + Duration::days(VALIDITY_DAYS);
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| GenerationError::Encoding(e.to_string()))?;

    let certificate = Certificate::from_pem(cert.pem().as_bytes(), key_pem.as_bytes())?;
    info!(
        host,
        serial = %hex::encode(certificate.serial()),
        not_after = %certificate.not_after(),
        "generated self-signed certificate"
    );

    Ok(certificate)
}
