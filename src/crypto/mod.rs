//! Package cryptography
//!
//! A [`CryptoProvider`] turns a password into key material and encrypts or
//! decrypts package entries. The host ships [`AesCbcProvider`]; packages may
//! carry their own provider library instead.

pub mod aes;
pub mod custom;
pub mod provider;
pub mod secret;
pub mod wrapper;

pub use aes::AesCbcProvider;
pub use custom::{CryptoProviderDeclaration, LoadedProvider, CRYPTO_ABI_VERSION, CRYPTO_PROVIDER_SYMBOL};
pub use provider::{CryptoError, CryptoProvider, Direction};
pub use secret::SecretBuffer;
pub use wrapper::CryptoWrapper;
