//! Module discovery
//!
//! Finds plain module libraries and encrypted packages, unlocks the packages
//! and turns both into module descriptors.

use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::composer::LoadFailure;
use super::descriptor::ModuleDescriptor;
use crate::config::{HostConfig, LOCKED_MODULE_EXTENSION};
use crate::module::decryptor::{unlock_with_prompt, DecryptionSession};
use crate::module::loader::{is_dynamic_lib, ModuleLoader};
use crate::module::traits::{LoadError, ModuleSource};
use crate::package::PackageReader;
use crate::prompt::SecretPrompt;
use crate::utils::error::panic_message;

/// Descriptors found by a discovery run plus what failed on the way
#[derive(Debug, Default)]
pub struct Discovered {
    pub descriptors: Vec<ModuleDescriptor>,
    pub failures: Vec<LoadFailure>,
}

/// Module discovery scanner
pub struct ModuleDiscovery {
    config: Arc<HostConfig>,
}

impl ModuleDiscovery {
    pub fn new(config: Arc<HostConfig>) -> Self {
        Self { config }
    }

    /// Unlock every package, then load every plain library
    ///
    /// Packages prompt for their password one at a time through `prompt`.
    pub fn discover(&self, prompt: &mut dyn SecretPrompt) -> Discovered {
        let mut discovered = Discovered::default();
        self.ensure_modules_dir();

        for path in self.package_paths() {
            let unlocked = catch_unwind(AssertUnwindSafe(|| self.unlock_package(&path, prompt)))
                .unwrap_or_else(|p| Err(contained_panic("package", p)));
            match unlocked {
                Ok(descriptor) => discovered.descriptors.push(descriptor),
                Err(error) => {
                    warn!("Skipping package {}: {}", path.display(), error);
                    discovered.failures.push(LoadFailure {
                        source: path.display().to_string(),
                        error,
                    });
                }
            }
        }

        for path in self.library_paths() {
            let loaded = catch_unwind(AssertUnwindSafe(|| self.load_library(&path)))
                .unwrap_or_else(|p| Err(contained_panic("library", p)));
            match loaded {
                Ok(descriptor) => discovered.descriptors.push(descriptor),
                Err(error) => {
                    warn!("Skipping module library {}: {}", path.display(), error);
                    discovered.failures.push(LoadFailure {
                        source: path.display().to_string(),
                        error,
                    });
                }
            }
        }

        info!(
            "Discovered {} modules ({} failed)",
            discovered.descriptors.len(),
            discovered.failures.len()
        );
        discovered
    }

    fn ensure_modules_dir(&self) {
        let dir = self.config.modules_dir();
        if !dir.exists() {
            debug!("Modules directory does not exist, creating: {:?}", dir);
            if let Err(e) = fs::create_dir_all(&dir) {
                warn!("Failed to create modules directory {}: {}", dir.display(), e);
            }
        }
    }

    /// Encrypted packages: the configured list, or every `.locked-module` file
    pub fn package_paths(&self) -> Vec<PathBuf> {
        if !self.config.modules.packages.is_empty() {
            return self.resolve_all(&self.config.modules.packages);
        }
        self.scan(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case(LOCKED_MODULE_EXTENSION))
                .unwrap_or(false)
        })
    }

    /// Plain module libraries: the configured list, or every platform library
    pub fn library_paths(&self) -> Vec<PathBuf> {
        if !self.config.modules.libraries.is_empty() {
            return self.resolve_all(&self.config.modules.libraries);
        }
        self.scan(is_dynamic_lib)
    }

    /// Relative entries are taken relative to the modules directory
    fn resolve_all(&self, entries: &[String]) -> Vec<PathBuf> {
        let base = self.config.modules_dir();
        entries
            .iter()
            .map(|entry| {
                let path = PathBuf::from(entry);
                if path.is_absolute() {
                    path
                } else {
                    base.join(path)
                }
            })
            .collect()
    }

    /// Files in the modules directory matching `predicate`, sorted by name
    fn scan(&self, predicate: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
        let dir = self.config.modules_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read modules directory {}: {}", dir.display(), e);
                return Vec::new();
            }
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && predicate(path.as_path()))
            .collect();
        paths.sort();
        paths
    }

    /// Load a plain module library
    pub fn load_library(&self, path: &Path) -> Result<ModuleDescriptor, LoadError> {
        Ok(ModuleLoader::load_library(path)?)
    }

    /// Open, decrypt (prompting for the password) and load a package
    pub fn unlock_package(
        &self,
        path: &Path,
        prompt: &mut dyn SecretPrompt,
    ) -> Result<ModuleDescriptor, LoadError> {
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let staging_dir = self.config.unpack_dir();

        let mut reader = PackageReader::open(path)?;
        let mut session = DecryptionSession::from_package(&mut reader, &staging_dir)?;
        drop(reader);

        unlock_with_prompt(&mut session, &label, prompt)?;
        let package = session
            .into_decrypted()
            .ok_or_else(|| LoadError::DecryptionFailed(format!("{} yielded no module file", label)))?;

        let descriptor = ModuleLoader::load_decrypted(
            &package.module_bytes,
            &package.module_file,
            &staging_dir,
            ModuleSource::Package(path.to_path_buf()),
            package.payload_files,
        )?;
        Ok(descriptor)
    }
}

fn contained_panic(what: &str, payload: Box<dyn std::any::Any + Send>) -> LoadError {
    LoadError::Panicked(format!("loading {} panicked: {}", what, panic_message(payload.as_ref())))
}
