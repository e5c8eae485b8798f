//! Provider wrapper with string helpers

use super::{CryptoError, CryptoProvider, Direction, SecretBuffer};

/// Delegates to exactly one inner provider
///
/// Wrapping a wrapper is rejected, so at most one level of indirection ever
/// sits between the host and the real cipher.
pub struct CryptoWrapper {
    pub(super) inner: Box<dyn CryptoProvider>,
}

impl std::fmt::Debug for CryptoWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoWrapper")
            .field("inner", &self.inner.name())
            .finish()
    }
}

impl CryptoWrapper {
    pub fn new(inner: Box<dyn CryptoProvider>) -> Result<Self, CryptoError> {
        if inner.is_wrapper() {
            return Err(CryptoError::NestedWrapper);
        }
        Ok(Self { inner })
    }

    pub fn inner(&self) -> &dyn CryptoProvider {
        self.inner.as_ref()
    }

    /// Encrypt UTF-8 text
    pub fn encrypt_str(&self, data: &str, key: &SecretBuffer) -> Result<Vec<u8>, CryptoError> {
        self.inner.encrypt(data.as_bytes(), key)
    }

    /// Mutate a plain-text password; `None` for an empty one
    pub fn mutate_key_str(&self, key: &str) -> Result<Option<SecretBuffer>, CryptoError> {
        if key.is_empty() {
            return Ok(None);
        }
        let secret = SecretBuffer::from_str_copy(key);
        self.inner.mutate_key(&secret).map(Some)
    }
}

impl CryptoProvider for CryptoWrapper {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn mutate_key(&self, key: &SecretBuffer) -> Result<SecretBuffer, CryptoError> {
        self.inner.mutate_key(key)
    }

    fn derive_and_transform(
        &self,
        data: &[u8],
        key: &SecretBuffer,
        direction: Direction,
    ) -> Result<Vec<u8>, CryptoError> {
        self.inner.derive_and_transform(data, key, direction)
    }

    fn is_wrapper(&self) -> bool {
        true
    }
}
