//! Decryption of encrypted packages
//!
//! A [`DecryptionSession`] holds the encrypted entries of one package and the
//! provider that locks them. Each password attempt decrypts every entry; the
//! plaintext only becomes visible once all of them succeeded.

use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::crypto::{CryptoError, CryptoProvider, LoadedProvider, SecretBuffer};
use crate::module::traits::{LoadError, PayloadFiles};
use crate::package::{PackageError, PackageReader, RawFiles};
use crate::prompt::SecretPrompt;
use crate::utils::error::panic_message;

/// Result of one password attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptOutcome {
    Decrypted,
    /// Wrong password; another attempt may succeed
    WrongPassword,
    /// The provider failed for a reason a new password cannot fix
    Failed(String),
}

/// Fully decrypted package content
pub struct DecryptedPackage {
    pub module_file: String,
    pub module_bytes: Zeroizing<Vec<u8>>,
    /// Every decrypted entry except the module file
    pub payload_files: PayloadFiles,
}

/// Decryption state for one package
pub struct DecryptionSession {
    provider: LoadedProvider,
    module_file: String,
    raw_files: RawFiles,
    plain_files: PayloadFiles,
    succeeded: bool,
}

impl DecryptionSession {
    pub fn new(provider: LoadedProvider, raw_files: RawFiles, module_file: impl Into<String>) -> Self {
        Self {
            provider,
            module_file: module_file.into(),
            raw_files,
            plain_files: PayloadFiles::new(),
            succeeded: false,
        }
    }

    /// Read the encrypted entries and the provider of an opened package
    pub fn from_package<R: std::io::Read + std::io::Seek>(
        reader: &mut PackageReader<R>,
        staging_dir: &std::path::Path,
    ) -> Result<Self, PackageError> {
        let provider = reader.crypto_provider(staging_dir)?;
        let raw_files = reader.read_encrypted_files()?;
        let module_file = reader.manifest().module_file.clone();
        Ok(Self::new(provider, raw_files, module_file))
    }

    /// Try one password against every entry
    ///
    /// On failure the partially decrypted files are wiped and the session can
    /// be retried.
    pub fn attempt(&mut self, password: &SecretBuffer) -> DecryptOutcome {
        self.plain_files.clear();
        self.succeeded = false;

        let provider = self.provider.provider();
        let raw_files = &self.raw_files;
        let result = catch_unwind(AssertUnwindSafe(|| -> Result<PayloadFiles, CryptoError> {
            let key = provider.mutate_key(password)?;
            let mut plain = PayloadFiles::new();
            for (name, bytes) in raw_files {
                let decrypted = provider.decrypt(bytes, &key)?;
                debug!("Decrypted entry '{}' ({} bytes)", name, decrypted.len());
                plain.insert(name.clone(), Zeroizing::new(decrypted));
            }
            Ok(plain)
        }));

        match result {
            Ok(Ok(plain)) => {
                self.plain_files = plain;
                self.succeeded = true;
                DecryptOutcome::Decrypted
            }
            Ok(Err(e)) if e.is_bad_key() => DecryptOutcome::WrongPassword,
            Ok(Err(e)) => DecryptOutcome::Failed(e.to_string()),
            Err(payload) => DecryptOutcome::Failed(format!(
                "crypto provider panicked: {}",
                panic_message(payload.as_ref())
            )),
        }
    }

    /// Try one password; true on success
    pub fn decrypt_all(&mut self, password: &SecretBuffer) -> bool {
        self.attempt(password) == DecryptOutcome::Decrypted
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    /// Decrypted files, only after a successful attempt
    pub fn plain_files(&self) -> Option<&PayloadFiles> {
        self.succeeded.then_some(&self.plain_files)
    }

    /// Hand over the plaintext; `None` unless an attempt succeeded
    pub fn into_decrypted(mut self) -> Option<DecryptedPackage> {
        if !self.succeeded {
            return None;
        }
        let module_bytes = self.plain_files.remove(&self.module_file)?;
        Some(DecryptedPackage {
            module_file: self.module_file,
            module_bytes,
            payload_files: self.plain_files,
        })
    }
}

/// Prompt for passwords until the session decrypts or the user gives up
///
/// An empty password asks whether to abort; a wrong one asks whether to try
/// again. Prompt I/O failures abandon the package.
pub fn unlock_with_prompt(
    session: &mut DecryptionSession,
    label: &str,
    prompt: &mut dyn SecretPrompt,
) -> Result<(), LoadError> {
    let prompt_failed = |e: std::io::Error| LoadError::DecryptionFailed(format!("prompt failed: {}", e));
    loop {
        let password = prompt
            .prompt_password(&format!("Password for {}: ", label))
            .map_err(prompt_failed)?;

        if password.is_empty() {
            if prompt
                .confirm(&format!("Do you want to abort decrypting {}?", label))
                .map_err(prompt_failed)?
            {
                info!("Decryption of {} aborted", label);
                return Err(LoadError::DecryptionAborted);
            }
            continue;
        }

        match session.attempt(&password) {
            DecryptOutcome::Decrypted => {
                info!("Decrypted {}", label);
                return Ok(());
            }
            DecryptOutcome::WrongPassword => {
                warn!("Invalid password for {}", label);
                if !prompt
                    .confirm("Invalid password. Try again?")
                    .map_err(prompt_failed)?
                {
                    return Err(LoadError::DecryptionAborted);
                }
            }
            DecryptOutcome::Failed(reason) => return Err(LoadError::DecryptionFailed(reason)),
        }
    }
}
