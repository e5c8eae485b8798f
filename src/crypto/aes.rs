//! Built-in provider: AES-256-CBC keyed by PBKDF2-HMAC-SHA512
//!
//! Ciphertext layout is `CBC(PKCS7(plain)) || HMAC-SHA512(ciphertext)`. The
//! tag is checked before unpadding so a wrong password is always reported as
//! [`CryptoError::BadKeyOrPadding`], never as garbage plaintext.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use zeroize::Zeroizing;

use super::{CryptoError, CryptoProvider, Direction, SecretBuffer};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha512 = Hmac<Sha512>;

/// Default PBKDF2 round count
pub const DEFAULT_ITERATIONS: u32 = 1_234_567;

/// Lower bound for production use
pub const MIN_ITERATIONS: u32 = 1_000_000;

/// Default PBKDF2 salt
pub const DEFAULT_SALT: [u8; 13] = [49, 103, 216, 55, 237, 139, 38, 192, 142, 81, 178, 208, 84];

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const MAC_KEY_LEN: usize = 64;
const TAG_LEN: usize = 64;
const BLOCK_LEN: usize = 16;
const DERIVED_LEN: usize = KEY_LEN + IV_LEN + MAC_KEY_LEN;

/// AES-256-CBC provider
#[derive(Debug, Clone)]
pub struct AesCbcProvider {
    salt: Vec<u8>,
    iterations: u32,
}

impl Default for AesCbcProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AesCbcProvider {
    pub fn new() -> Self {
        Self {
            salt: DEFAULT_SALT.to_vec(),
            iterations: DEFAULT_ITERATIONS,
        }
    }

    /// Custom salt and round count (for custom providers built on this cipher)
    pub fn with_salt(salt: impl Into<Vec<u8>>, iterations: u32) -> Self {
        Self {
            salt: salt.into(),
            iterations: iterations.max(1),
        }
    }

    /// Default salt with a reduced round count
    ///
    /// Only meant for tests; packages built this way are not interchangeable
    /// with the default provider.
    pub fn with_iterations(iterations: u32) -> Self {
        Self::with_salt(DEFAULT_SALT.to_vec(), iterations)
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    fn derive(&self, key: &SecretBuffer) -> Zeroizing<[u8; DERIVED_LEN]> {
        let mut out = Zeroizing::new([0u8; DERIVED_LEN]);
        pbkdf2::pbkdf2_hmac::<Sha512>(key.expose(), &self.salt, self.iterations, &mut out[..]);
        out
    }

    fn mac(mac_key: &[u8]) -> Result<HmacSha512, CryptoError> {
        <HmacSha512 as Mac>::new_from_slice(mac_key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    fn encrypt_with(material: &[u8; DERIVED_LEN], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let (key, rest) = material.split_at(KEY_LEN);
        let (iv, mac_key) = rest.split_at(IV_LEN);
        let cipher = Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let mut out = cipher.encrypt_padded_vec_mut::<Pkcs7>(data);

        let mut mac = Self::mac(mac_key)?;
        mac.update(&out);
        out.extend_from_slice(&mac.finalize().into_bytes());
        Ok(out)
    }

    fn decrypt_with(material: &[u8; DERIVED_LEN], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < BLOCK_LEN + TAG_LEN || (data.len() - TAG_LEN) % BLOCK_LEN != 0 {
            return Err(CryptoError::BadKeyOrPadding);
        }
        let (key, rest) = material.split_at(KEY_LEN);
        let (iv, mac_key) = rest.split_at(IV_LEN);
        let (ciphertext, tag) = data.split_at(data.len() - TAG_LEN);

        let mut mac = Self::mac(mac_key)?;
        mac.update(ciphertext);
        mac.verify_slice(tag).map_err(|_| CryptoError::BadKeyOrPadding)?;

        let cipher = Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::BadKeyOrPadding)
    }
}

impl CryptoProvider for AesCbcProvider {
    fn name(&self) -> &str {
        "builtin-aes"
    }

    fn derive_and_transform(
        &self,
        data: &[u8],
        key: &SecretBuffer,
        direction: Direction,
    ) -> Result<Vec<u8>, CryptoError> {
        let material = self.derive(key);
        match direction {
            Direction::Encrypt => Self::encrypt_with(&material, data),
            Direction::Decrypt => Self::decrypt_with(&material, data),
        }
    }
}
