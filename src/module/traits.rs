//! Module system traits and interfaces
//!
//! Defines the contract between the host and server modules.

use http::StatusCode;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::http::{HandlerError, HttpRequest, ModuleResponse};
use crate::module::commands::ModuleCommand;
use crate::module::loader::LibraryError;
use crate::package::PackageError;

/// Decrypted package files, keyed by entry name
pub type PayloadFiles = BTreeMap<String, Zeroizing<Vec<u8>>>;

/// Request handler
///
/// Handlers are called concurrently from the blocking pool and must be
/// internally synchronised.
pub type Responder =
    Arc<dyn Fn(&HttpRequest) -> Result<ModuleResponse, HandlerError> + Send + Sync>;

/// Box a closure as a [`Responder`]
pub fn responder<F>(f: F) -> Responder
where
    F: Fn(&HttpRequest) -> Result<ModuleResponse, HandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// State of a loaded module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Serving requests
    Running,
    /// Being restarted; not routed
    Stopping,
}

/// Where a module came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    /// Compiled into the host process
    Builtin,
    /// Plain dynamic library
    Library(PathBuf),
    /// Encrypted package
    Package(PathBuf),
}

impl std::fmt::Display for ModuleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleSource::Builtin => write!(f, "builtin"),
            ModuleSource::Library(path) => write!(f, "library {}", path.display()),
            ModuleSource::Package(path) => write!(f, "package {}", path.display()),
        }
    }
}

/// Descriptive data about a loaded module
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    /// Unique id of this instance
    pub module_id: String,
    pub name: String,
    pub base_path: String,
    pub source: ModuleSource,
    /// Handler paths, sorted
    pub paths: Vec<String>,
    pub has_catchall: bool,
}

/// A server module
///
/// `init` runs once before the module is registered. Everything else may be
/// called from any thread, including concurrently with request handlers.
pub trait ServerModule: Send + Sync {
    /// Prepare the module; an error discards it
    fn init(&mut self, context: &ModuleContext) -> Result<(), ModuleError>;

    /// Subpath (no leading or trailing '/') to handler map; must not be empty
    fn paths_with_responders(&self) -> HashMap<String, Responder>;

    /// Handler for subpaths without their own entry
    fn catchall(&self) -> Option<Responder> {
        None
    }

    /// Module-specific error page; `None` falls back to the host's page
    fn error_page(&self, _status: StatusCode, _message: &str) -> Option<String> {
        None
    }

    /// Release resources; called exactly once during shutdown or unload
    fn stop(&self) -> Result<(), ModuleError>;

    /// Operator commands offered by this module
    fn available_commands(&self) -> Vec<ModuleCommand> {
        Vec::new()
    }
}

/// Context handed to [`ServerModule::init`]
#[derive(Clone)]
pub struct ModuleContext {
    /// Module ID (unique identifier for this module instance)
    pub module_id: String,
    pub name: String,
    pub base_path: String,
    /// Public URL of the module (`{scheme}://{domain}:{port}/{base_path}/`)
    pub public_url: String,
    /// Module configuration (key-value pairs from the host config)
    pub config: HashMap<String, String>,
    payload_files: Arc<PayloadFiles>,
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module_id", &self.module_id)
            .field("name", &self.name)
            .field("base_path", &self.base_path)
            .field("public_url", &self.public_url)
            .field("config", &self.config)
            .field("payload_files", &self.payload_files.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModuleContext {
    pub fn new(
        name: impl Into<String>,
        base_path: impl Into<String>,
        public_url: impl Into<String>,
        config: HashMap<String, String>,
        payload_files: Arc<PayloadFiles>,
    ) -> Self {
        Self {
            module_id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            base_path: base_path.into(),
            public_url: public_url.into(),
            config,
            payload_files,
        }
    }

    /// Get a configuration value
    pub fn get_config(&self, key: &str) -> Option<&String> {
        self.config.get(key)
    }

    /// Get a configuration value with default
    pub fn get_config_or(&self, key: &str, default: &str) -> String {
        self.config
            .get(key)
            .map(|s| s.as_str())
            .unwrap_or(default)
            .to_string()
    }

    /// Decrypted payload file shipped in the module's package
    pub fn payload(&self, name: &str) -> Option<&[u8]> {
        self.payload_files.get(name).map(|bytes| bytes.as_slice())
    }

    pub fn payload_names(&self) -> impl Iterator<Item = &str> {
        self.payload_files.keys().map(|k| k.as_str())
    }
}

/// Errors returned by module code
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Module initialization failed: {0}")]
    InitializationError(String),

    #[error("Module operation failed: {0}")]
    OperationError(String),

    #[error("Invalid module configuration: {0}")]
    InvalidConfig(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Unknown command: {0}")]
    CommandNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<anyhow::Error> for ModuleError {
    fn from(e: anyhow::Error) -> Self {
        ModuleError::OperationError(e.to_string())
    }
}

/// Why a module or package did not make it into the route table
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("malformed package: {0}")]
    MalformedPackage(String),

    #[error("package could not be read: {0}")]
    Io(#[source] std::io::Error),

    #[error("decryption aborted by user")]
    DecryptionAborted,

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("crypto provider could not be loaded: {0}")]
    ProviderLoad(LibraryError),

    #[error("module library could not be loaded: {0}")]
    Library(#[from] LibraryError),

    #[error("invalid module metadata: {0}")]
    InvalidMetadata(String),

    #[error("module '{name}' failed to initialize: {reason}")]
    InitFailed { name: String, reason: String },

    #[error("module '{0}' declares no paths")]
    NoHandlers(String),

    #[error("base path '{base_path}' is already taken, module '{name}' rejected")]
    DuplicateBasePath { base_path: String, name: String },

    #[error("no module registered at '{0}'")]
    NotFound(String),

    #[error("{0}")]
    Panicked(String),
}

impl From<PackageError> for LoadError {
    fn from(e: PackageError) -> Self {
        match e {
            PackageError::ProviderLoad(inner) => LoadError::ProviderLoad(inner),
            PackageError::Crypto(inner) => LoadError::DecryptionFailed(inner.to_string()),
            PackageError::Io(inner) | PackageError::Archive(zip::result::ZipError::Io(inner)) => {
                LoadError::Io(inner)
            }
            other => LoadError::MalformedPackage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ModuleContext {
        let mut payloads = PayloadFiles::new();
        payloads.insert("a.txt".to_string(), Zeroizing::new(b"hello".to_vec()));
        ModuleContext::new(
            "Demo",
            "Demo",
            "http://localhost:50001/Demo/",
            HashMap::from([("greeting".to_string(), "hi".to_string())]),
            Arc::new(payloads),
        )
    }

    #[test]
    fn test_package_errors_keep_their_class() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(LoadError::from(PackageError::Io(io)), LoadError::Io(_)));

        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let archive = PackageError::Archive(zip::result::ZipError::Io(io));
        assert!(matches!(LoadError::from(archive), LoadError::Io(_)));

        let missing = PackageError::MissingModuleEntry("module.so".to_string());
        assert!(matches!(LoadError::from(missing), LoadError::MalformedPackage(_)));
    }

    #[test]
    fn test_context_config() {
        let ctx = context();
        assert_eq!(ctx.get_config("greeting").map(|s| s.as_str()), Some("hi"));
        assert_eq!(ctx.get_config_or("missing", "fallback"), "fallback");
    }

    #[test]
    fn test_context_payloads() {
        let ctx = context();
        assert_eq!(ctx.payload("a.txt"), Some(&b"hello"[..]));
        assert!(ctx.payload("b.txt").is_none());
        assert_eq!(ctx.payload_names().collect::<Vec<_>>(), vec!["a.txt"]);
        assert!(!format!("{:?}", ctx).contains("hello"));
    }

    #[test]
    fn test_unique_module_ids() {
        assert_ne!(context().module_id, context().module_id);
    }

    #[test]
    fn test_package_error_mapping() {
        let err: LoadError = PackageError::Malformed("no manifest".into()).into();
        assert!(matches!(err, LoadError::MalformedPackage(_)));
        let err: LoadError = PackageError::ProviderLoad(LibraryError::Invalid("x".into())).into();
        assert!(matches!(err, LoadError::ProviderLoad(_)));
    }

    #[test]
    fn test_module_source_display() {
        assert_eq!(ModuleSource::Builtin.to_string(), "builtin");
        assert_eq!(
            ModuleSource::Package(PathBuf::from("Servers/a.locked-module")).to_string(),
            "package Servers/a.locked-module"
        );
    }
}
