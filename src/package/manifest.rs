//! Encrypted package manifest parsing and validation
//!
//! Every package carries a plain `locked-module.toml` entry describing how the
//! other entries were encrypted.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::PackageError;

/// Reserved entry name of the manifest inside a package
pub const MANIFEST_ENTRY: &str = "locked-module.toml";

/// Which provider encrypted the package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncryptionKind {
    /// Built-in AES-256-CBC provider
    BuiltinAes,
    /// Provider library shipped in the package
    Custom,
}

/// Package manifest (locked-module.toml structure)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub encryption: EncryptionKind,
    /// Entry holding the (unencrypted) provider library; required for `custom`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_provider_file: Option<String>,
    /// Encrypted data files handed to the module
    #[serde(default)]
    pub payload_files: Vec<String>,
    /// Encrypted module library
    pub module_file: String,
}

impl PackageManifest {
    /// Parse and validate manifest text
    pub fn parse(contents: &str) -> Result<Self, PackageError> {
        let manifest: PackageManifest = toml::from_str(contents)
            .map_err(|e| PackageError::Malformed(format!("failed to parse manifest: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn to_toml(&self) -> Result<String, PackageError> {
        toml::to_string_pretty(self)
            .map_err(|e| PackageError::Malformed(format!("failed to serialize manifest: {}", e)))
    }

    pub fn validate(&self) -> Result<(), PackageError> {
        if self.module_file.trim().is_empty() {
            return Err(PackageError::Malformed("module_file cannot be empty".to_string()));
        }
        match (&self.encryption, &self.crypto_provider_file) {
            (EncryptionKind::Custom, None) => {
                return Err(PackageError::Malformed(
                    "custom encryption requires crypto_provider_file".to_string(),
                ))
            }
            (_, Some(name)) if name.trim().is_empty() => {
                return Err(PackageError::Malformed(
                    "crypto_provider_file cannot be empty".to_string(),
                ))
            }
            _ => {}
        }

        let mut seen = HashSet::new();
        let reserved = [Some(MANIFEST_ENTRY), self.crypto_provider_file.as_deref()];
        for name in self.encrypted_files() {
            if reserved.contains(&Some(name)) {
                return Err(PackageError::Malformed(format!(
                    "entry '{}' cannot be both encrypted and reserved",
                    name
                )));
            }
            if !seen.insert(name) {
                return Err(PackageError::Malformed(format!("entry '{}' listed twice", name)));
            }
        }
        Ok(())
    }

    /// Payload files followed by the module file
    pub fn encrypted_files(&self) -> impl Iterator<Item = &str> {
        self.payload_files
            .iter()
            .map(|s| s.as_str())
            .chain(std::iter::once(self.module_file.as_str()))
    }
}
