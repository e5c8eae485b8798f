//! Module descriptors
//!
//! A descriptor is everything needed to create (and re-create) a module
//! instance: its metadata, a factory, the payload files of its package and,
//! for dynamically loaded modules, the library the factory lives in.

use std::sync::Arc;

use crate::module::loader::LoadedLibrary;
use crate::module::traits::{LoadError, ModuleSource, PayloadFiles, ServerModule};

/// Creates a fresh module instance
pub type ModuleFactory = Arc<dyn Fn() -> Box<dyn ServerModule> + Send + Sync>;

/// Name used in logs when a module does not declare one
pub const UNKNOWN_MODULE_NAME: &str = "unknown";

/// Recipe for a module instance
///
/// The library handle is the last field so it outlives the factory.
#[derive(Clone)]
pub struct ModuleDescriptor {
    pub name: String,
    pub base_path: String,
    pub source: ModuleSource,
    factory: ModuleFactory,
    payload_files: Arc<PayloadFiles>,
    library: Option<Arc<LoadedLibrary>>,
}

impl std::fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("base_path", &self.base_path)
            .field("source", &self.source)
            .field("payload_files", &self.payload_files.len())
            .finish()
    }
}

impl ModuleDescriptor {
    /// A module compiled into the host process
    pub fn builtin<F>(name: impl Into<String>, base_path: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn ServerModule> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            base_path: base_path.into(),
            source: ModuleSource::Builtin,
            factory: Arc::new(factory),
            payload_files: Arc::new(PayloadFiles::new()),
            library: None,
        }
    }

    /// Attach payload files handed to the module on init
    pub fn with_payload_files(mut self, payload_files: PayloadFiles) -> Self {
        self.payload_files = Arc::new(payload_files);
        self
    }

    pub(crate) fn from_library(
        name: String,
        base_path: String,
        source: ModuleSource,
        create: fn() -> Box<dyn ServerModule>,
        library: Arc<LoadedLibrary>,
        payload_files: Arc<PayloadFiles>,
    ) -> Self {
        Self {
            name,
            base_path,
            source,
            factory: Arc::new(move || create()),
            payload_files,
            library: Some(library),
        }
    }

    /// Name for logs; "unknown" when blank
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            UNKNOWN_MODULE_NAME
        } else {
            &self.name
        }
    }

    pub fn payload_files(&self) -> Arc<PayloadFiles> {
        Arc::clone(&self.payload_files)
    }

    pub fn is_dynamic(&self) -> bool {
        self.library.is_some()
    }

    pub(crate) fn create(&self) -> Box<dyn ServerModule> {
        (self.factory)()
    }

    /// Check the declared base path
    ///
    /// It must be non-empty, must not start or end with '/', and must not
    /// contain whitespace, '?' or '#'.
    pub fn validate(&self) -> Result<(), LoadError> {
        let base = &self.base_path;
        let invalid = |reason: &str| {
            Err(LoadError::InvalidMetadata(format!(
                "module '{}' base path '{}' {}",
                self.display_name(),
                base,
                reason
            )))
        };
        if base.is_empty() {
            return invalid("is empty");
        }
        if base.starts_with('/') || base.ends_with('/') {
            return invalid("must not start or end with '/'");
        }
        if base.contains(|c: char| c.is_whitespace() || c == '?' || c == '#') {
            return invalid("contains whitespace, '?' or '#'");
        }
        Ok(())
    }
}
