//! Building encrypted packages

use std::io::{Seek, Write};
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::manifest::{EncryptionKind, PackageManifest, MANIFEST_ENTRY};
use super::PackageError;
use crate::crypto::{CryptoProvider, SecretBuffer};

/// Collects the files of a package before encrypting them
pub struct PackageBuilder {
    module_file: (String, Vec<u8>),
    payload_files: Vec<(String, Vec<u8>)>,
    crypto_provider: Option<(String, Vec<u8>)>,
}

impl PackageBuilder {
    pub fn new(module_name: impl Into<String>, module_bytes: Vec<u8>) -> Self {
        Self {
            module_file: (module_name.into(), module_bytes),
            payload_files: Vec::new(),
            crypto_provider: None,
        }
    }

    pub fn payload(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.payload_files.push((name.into(), bytes));
        self
    }

    /// Ship a custom provider library; switches the package to `custom`
    pub fn crypto_provider(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.crypto_provider = Some((name.into(), bytes));
        self
    }

    pub fn manifest(&self) -> PackageManifest {
        PackageManifest {
            encryption: if self.crypto_provider.is_some() {
                EncryptionKind::Custom
            } else {
                EncryptionKind::BuiltinAes
            },
            crypto_provider_file: self.crypto_provider.as_ref().map(|(name, _)| name.clone()),
            payload_files: self.payload_files.iter().map(|(name, _)| name.clone()).collect(),
            module_file: self.module_file.0.clone(),
        }
    }

    /// Encrypt every file with `provider` and write the archive to `out`
    ///
    /// The password is mutated once by the provider before use, matching what
    /// the host does on load. `provider` must be the provider the manifest
    /// names (the built-in one, or the shipped custom one).
    pub fn write<W: Write + Seek>(
        self,
        out: W,
        provider: &dyn CryptoProvider,
        password: &SecretBuffer,
    ) -> Result<W, PackageError> {
        if password.is_empty() {
            return Err(PackageError::Malformed("password cannot be empty".to_string()));
        }
        let manifest = self.manifest();
        manifest.validate()?;
        let key = provider.mutate_key(password)?;

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let mut zip = ZipWriter::new(out);

        zip.start_file(MANIFEST_ENTRY, options)?;
        zip.write_all(manifest.to_toml()?.as_bytes())?;

        if let Some((name, bytes)) = &self.crypto_provider {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }

        for (name, bytes) in self.payload_files.iter().chain(std::iter::once(&self.module_file)) {
            let encrypted = provider.encrypt(bytes, &key)?;
            zip.start_file(name.as_str(), options)?;
            zip.write_all(&encrypted)?;
        }

        let out = zip.finish()?;
        info!(
            "Wrote package for {} ({} payload files, {:?})",
            manifest.module_file,
            manifest.payload_files.len(),
            manifest.encryption
        );
        Ok(out)
    }
}
