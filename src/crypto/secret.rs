//! Scoped secret buffer for passwords and mutated keys
//!
//! The bytes are zeroed when the buffer is dropped, and growth never leaves a
//! stale copy behind in freed memory.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

const INITIAL_CAPACITY: usize = 64;

/// Password material that is wiped on drop and never printed
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct SecretBuffer {
    bytes: Vec<u8>,
}

impl SecretBuffer {
    pub fn new() -> Self {
        Self {
            bytes: Vec::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Take ownership of already-collected secret bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Copy a password out of a string slice
    ///
    /// The caller still owns (and should wipe) the source string.
    pub fn from_str_copy(secret: &str) -> Self {
        let mut buffer = Self::new();
        for c in secret.chars() {
            buffer.push_char(c);
        }
        buffer
    }

    /// Append one character (UTF-8 encoded)
    pub fn push_char(&mut self, c: char) {
        let mut utf8 = [0u8; 4];
        let encoded = c.encode_utf8(&mut utf8);
        self.reserve(encoded.len());
        self.bytes.extend_from_slice(encoded.as_bytes());
        utf8.zeroize();
    }

    /// Remove the last character, if any
    pub fn pop_char(&mut self) -> bool {
        let Some(last) = std::str::from_utf8(&self.bytes)
            .ok()
            .and_then(|s| s.char_indices().last().map(|(i, _)| i))
        else {
            return self.bytes.pop().is_some();
        };
        for b in &mut self.bytes[last..] {
            *b = 0;
        }
        self.bytes.truncate(last);
        true
    }

    /// Grow by copying into a fresh allocation and wiping the old one
    fn reserve(&mut self, additional: usize) {
        if self.bytes.len() + additional <= self.bytes.capacity() {
            return;
        }
        let new_capacity = (self.bytes.capacity() * 2).max(self.bytes.len() + additional);
        let mut grown = Vec::with_capacity(new_capacity);
        grown.extend_from_slice(&self.bytes);
        self.bytes.zeroize();
        self.bytes = grown;
    }

    /// Borrow the raw secret bytes for the duration of a cryptographic call
    pub fn expose(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Wipe the content, keeping the buffer usable
    pub fn clear(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBuffer([REDACTED; {} bytes])", self.bytes.len())
    }
}

impl PartialEq for SecretBuffer {
    /// Constant-time once the lengths match
    fn eq(&self, other: &Self) -> bool {
        if self.bytes.len() != other.bytes.len() {
            return false;
        }
        self.bytes
            .iter()
            .zip(other.bytes.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl Eq for SecretBuffer {}
