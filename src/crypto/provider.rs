//! Crypto provider contract

use thiserror::Error;

use super::SecretBuffer;

/// Errors raised by crypto providers
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Wrong password (or tampered ciphertext); the caller may retry
    #[error("invalid password or corrupted data")]
    BadKeyOrPadding,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("crypto provider failure: {0}")]
    Provider(String),

    #[error("a crypto wrapper cannot wrap another wrapper")]
    NestedWrapper,
}

impl CryptoError {
    /// True when retrying with another password makes sense
    pub fn is_bad_key(&self) -> bool {
        matches!(self, CryptoError::BadKeyOrPadding)
    }
}

/// Direction of a [`CryptoProvider::derive_and_transform`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Symmetric cipher plus key derivation used to lock and unlock packages
///
/// The packer and the host must use the same provider with the same password
/// for a package to round-trip. `mutate_key` is applied once to the password
/// before any file of a package is transformed.
pub trait CryptoProvider: Send + Sync {
    /// Human readable name for logs
    fn name(&self) -> &str;

    /// Password mutation; identity unless overridden
    fn mutate_key(&self, key: &SecretBuffer) -> Result<SecretBuffer, CryptoError> {
        Ok(key.clone())
    }

    /// Derive key material from `key` and encrypt or decrypt `data`
    ///
    /// Decrypting with the wrong key must fail with
    /// [`CryptoError::BadKeyOrPadding`].
    fn derive_and_transform(
        &self,
        data: &[u8],
        key: &SecretBuffer,
        direction: Direction,
    ) -> Result<Vec<u8>, CryptoError>;

    fn encrypt(&self, data: &[u8], key: &SecretBuffer) -> Result<Vec<u8>, CryptoError> {
        self.derive_and_transform(data, key, Direction::Encrypt)
    }

    fn decrypt(&self, data: &[u8], key: &SecretBuffer) -> Result<Vec<u8>, CryptoError> {
        self.derive_and_transform(data, key, Direction::Decrypt)
    }

    /// Wrappers delegate to another provider and must not be nested
    fn is_wrapper(&self) -> bool {
        false
    }
}
