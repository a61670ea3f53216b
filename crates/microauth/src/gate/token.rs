//! Constant-time shared-token verification.
//!
//! The configured token and every candidate are MACed with HMAC-SHA256 under
//! a random per-verifier key, and the fixed-length tags are compared with
//! [`subtle::ConstantTimeEq`]. Run time depends on neither the position of the
//! first differing byte nor the candidate's length relative to the token.

use hmac::digest::{generic_array::GenericArray, KeyInit};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::ConfigurationError;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 keys are padded to the 64-byte block size anyway.
const KEY_LEN: usize = 64;

const TAG_LEN: usize = 32;

/// Verifies candidates against one configured token.
#[derive(Clone)]
pub struct TokenVerifier {
    mac: HmacSha256,
    expected: [u8; TAG_LEN],
}

impl TokenVerifier {
    /// Build a verifier for `token` with a fresh random MAC key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MissingToken`] if `token` is empty.
    pub fn new(token: &str) -> Result<Self, ConfigurationError> {
        if token.is_empty() {
            return Err(ConfigurationError::MissingToken);
        }

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(key.as_mut_slice());
        let mac = <HmacSha256 as KeyInit>::new(GenericArray::from_slice(key.as_slice()));

        let expected = tag(&mac, token.as_bytes());
        Ok(Self { mac, expected })
    }

    /// Returns `true` iff `candidate` equals the configured token.
    pub fn verify(&self, candidate: &[u8]) -> bool {
        let presented = tag(&self.mac, candidate);
        presented.as_slice().ct_eq(self.expected.as_slice()).into()
    }
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenVerifier([REDACTED])")
    }
}

fn tag(mac: &HmacSha256, message: &[u8]) -> [u8; TAG_LEN] {
    let mut mac = mac.clone();
    mac.update(message);
    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}
