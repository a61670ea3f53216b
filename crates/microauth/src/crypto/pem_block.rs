//! Decrypt a single PEM block into a plaintext PEM-encoded private key.

use aes::cipher::{block_padding::Pkcs7, BlockCipher, BlockDecryptMut, KeyInit, KeyIvInit};
use md5::{Digest, Md5};
use pem::Pem;
use pkcs8::{pkcs5, EncryptedPrivateKeyInfo, PrivateKeyInfo};
use thiserror::Error;
use zeroize::Zeroizing;

/// PEM tag of a PKCS#8 `EncryptedPrivateKeyInfo`.
pub const ENCRYPTED_PKCS8_TAG: &str = "ENCRYPTED PRIVATE KEY";

/// PEM tag of a plaintext PKCS#8 `PrivateKeyInfo`.
pub const PKCS8_TAG: &str = "PRIVATE KEY";

/// PEM tag of a PKCS#1 RSA private key.
const RSA_TAG: &str = "RSA PRIVATE KEY";

/// PEM tag of a SEC1 EC private key.
const EC_TAG: &str = "EC PRIVATE KEY";

/// The legacy key derivation salts with the first 8 bytes of the IV.
const LEGACY_SALT_LEN: usize = 8;

/// Why a PEM block could not be decrypted.
///
/// Callers distinguish the plaintext case by matching
/// [`DecryptError::NotEncrypted`]; every other variant is a real failure.
#[derive(Debug, Error)]
pub enum DecryptError {
    /// The block does not declare any encryption.
    #[error("PEM block is not encrypted")]
    NotEncrypted,

    /// The block is encrypted with a cipher or KDF this crate does not implement.
    #[error("unsupported PEM encryption: {0}")]
    UnsupportedCipher(String),

    /// Decryption produced invalid padding or an invalid key structure.
    #[error("failed to decrypt PEM block: incorrect password")]
    IncorrectPassword,

    /// The encryption headers or envelope are malformed.
    #[error("malformed encrypted PEM block: {0}")]
    Malformed(String),
}

/// Decrypt `block` with `password`, returning the plaintext key re-encoded as PEM.
///
/// # Errors
///
/// Returns [`DecryptError::NotEncrypted`] when the block carries no encryption
/// marker, and one of the other variants when decryption was attempted and failed.
pub fn decrypt_pem_block(block: &Pem, password: &[u8]) -> Result<Zeroizing<Vec<u8>>, DecryptError> {
    if block.tag() == ENCRYPTED_PKCS8_TAG {
        return decrypt_pkcs8(block, password);
    }

    match block.headers().get("Proc-Type") {
        Some(proc_type) if proc_type.trim().ends_with("ENCRYPTED") => {
            decrypt_legacy(block, password)
        }
        _ => Err(DecryptError::NotEncrypted),
    }
}

fn decrypt_pkcs8(block: &Pem, password: &[u8]) -> Result<Zeroizing<Vec<u8>>, DecryptError> {
    let info = EncryptedPrivateKeyInfo::try_from(block.contents())
        .map_err(|e| DecryptError::Malformed(e.to_string()))?;

    let document = info.decrypt(password).map_err(|e| match e {
        pkcs8::Error::EncryptedPrivateKey(pkcs5::Error::UnsupportedAlgorithm { .. }) => {
            DecryptError::UnsupportedCipher(e.to_string())
        }
        _ => DecryptError::IncorrectPassword,
    })?;

    // Padding can survive a wrong password by chance; the structure cannot.
    PrivateKeyInfo::try_from(document.as_bytes()).map_err(|_| DecryptError::IncorrectPassword)?;

    Ok(encode(PKCS8_TAG, document.as_bytes()))
}

/// Block ciphers accepted in a legacy `DEK-Info` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegacyCipher {
    DesCbc,
    DesEde3Cbc,
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
}

impl LegacyCipher {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "DES-CBC" => Some(Self::DesCbc),
            "DES-EDE3-CBC" => Some(Self::DesEde3Cbc),
            "AES-128-CBC" => Some(Self::Aes128Cbc),
            "AES-192-CBC" => Some(Self::Aes192Cbc),
            "AES-256-CBC" => Some(Self::Aes256Cbc),
            _ => None,
        }
    }

    fn key_len(self) -> usize {
        match self {
            Self::DesCbc => 8,
            Self::DesEde3Cbc => 24,
            Self::Aes128Cbc => 16,
            Self::Aes192Cbc => 24,
            Self::Aes256Cbc => 32,
        }
    }

    /// The IV is one cipher block.
    fn iv_len(self) -> usize {
        match self {
            Self::DesCbc | Self::DesEde3Cbc => 8,
            Self::Aes128Cbc | Self::Aes192Cbc | Self::Aes256Cbc => 16,
        }
    }

    fn decrypt(self, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, DecryptError> {
        match self {
            Self::DesCbc => cbc_decrypt::<des::Des>(key, iv, data),
            Self::DesEde3Cbc => cbc_decrypt::<des::TdesEde3>(key, iv, data),
            Self::Aes128Cbc => cbc_decrypt::<aes::Aes128>(key, iv, data),
            Self::Aes192Cbc => cbc_decrypt::<aes::Aes192>(key, iv, data),
            Self::Aes256Cbc => cbc_decrypt::<aes::Aes256>(key, iv, data),
        }
    }
}

fn decrypt_legacy(block: &Pem, password: &[u8]) -> Result<Zeroizing<Vec<u8>>, DecryptError> {
    let dek_info = block
        .headers()
        .get("DEK-Info")
        .ok_or_else(|| DecryptError::Malformed("missing DEK-Info header".into()))?;

    let (name, iv_hex) = dek_info
        .split_once(',')
        .ok_or_else(|| DecryptError::Malformed(format!("invalid DEK-Info header: {dek_info}")))?;

    let name = name.trim();
    let cipher = LegacyCipher::from_name(name)
        .ok_or_else(|| DecryptError::UnsupportedCipher(name.to_owned()))?;

    let iv = hex::decode(iv_hex.trim())
        .map_err(|e| DecryptError::Malformed(format!("invalid DEK-Info IV: {e}")))?;
    if iv.len() != cipher.iv_len() {
        return Err(DecryptError::Malformed(format!(
            "DEK-Info IV for {name} must be {} bytes, got {}",
            cipher.iv_len(),
            iv.len()
        )));
    }

    let key = evp_bytes_to_key(password, &iv[..LEGACY_SALT_LEN], cipher.key_len());
    let plaintext = Zeroizing::new(cipher.decrypt(&key, &iv, block.contents())?);

    // Padding can survive a wrong password by chance; the key structure cannot.
    if !is_legacy_key_der(block.tag(), &plaintext) {
        return Err(DecryptError::IncorrectPassword);
    }

    Ok(encode(block.tag(), &plaintext))
}

/// `true` when `der` parses as the private key structure named by `tag`.
fn is_legacy_key_der(tag: &str, der: &[u8]) -> bool {
    match tag {
        RSA_TAG => rsa::pkcs1::RsaPrivateKey::try_from(der).is_ok(),
        EC_TAG => sec1::EcPrivateKey::try_from(der).is_ok(),
        _ => pkcs8::der::Document::try_from(der).is_ok(),
    }
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, DecryptError>
where
    C: BlockCipher + BlockDecryptMut + KeyInit,
{
    cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| DecryptError::Malformed(e.to_string()))?
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|_| DecryptError::IncorrectPassword)
}

/// OpenSSL's `EVP_BytesToKey` with MD5 and a single iteration.
fn evp_bytes_to_key(password: &[u8], salt: &[u8], key_len: usize) -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(Vec::with_capacity(key_len + 16));
    let mut previous = Zeroizing::new(Vec::new());

    while key.len() < key_len {
        let mut hasher = Md5::new();
        hasher.update(previous.as_slice());
        hasher.update(password);
        hasher.update(salt);
        *previous = hasher.finalize().to_vec();
        key.extend_from_slice(&previous);
    }

    key.truncate(key_len);
    key
}

fn encode(tag: &str, der: &[u8]) -> Zeroizing<Vec<u8>> {
    let pem = Zeroizing::new(pem::encode(&Pem::new(tag, der.to_vec())));
    Zeroizing::new(pem.as_bytes().to_vec())
}
