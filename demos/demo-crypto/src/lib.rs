//! Demo custom crypto provider
//!
//! Same cipher as the built-in provider with its own salt, and a password
//! mutation that inverts every byte. Packages built with it ship the library
//! so the host can load it before decrypting.

use modhost::crypto::{AesCbcProvider, CryptoError, CryptoProvider, Direction, SecretBuffer};

const SALT: &[u8] = b"modhost-demo-crypto";
const ITERATIONS: u32 = 1_100_000;

pub struct InvertingProvider {
    cipher: AesCbcProvider,
}

impl Default for InvertingProvider {
    fn default() -> Self {
        Self {
            cipher: AesCbcProvider::with_salt(SALT, ITERATIONS),
        }
    }
}

impl CryptoProvider for InvertingProvider {
    fn name(&self) -> &str {
        "demo-inverting-aes"
    }

    fn mutate_key(&self, key: &SecretBuffer) -> Result<SecretBuffer, CryptoError> {
        if key.is_empty() {
            return Err(CryptoError::InvalidKey("empty password".to_string()));
        }
        Ok(SecretBuffer::from_bytes(
            key.expose().iter().map(|b| !b).collect(),
        ))
    }

    fn derive_and_transform(
        &self,
        data: &[u8],
        key: &SecretBuffer,
        direction: Direction,
    ) -> Result<Vec<u8>, CryptoError> {
        self.cipher.derive_and_transform(data, key, direction)
    }
}

modhost::declare_crypto_provider!(InvertingProvider::default());
