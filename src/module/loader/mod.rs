//! Module loading system
//!
//! Handles dynamic library loading for modules and custom crypto providers.

pub mod library;
pub mod loader;

pub use library::{check_versions, is_dynamic_lib, LibraryError, LoadedLibrary};
pub use loader::{ModuleDeclaration, ModuleLoader, MODULE_ABI_VERSION, MODULE_DECLARATION_SYMBOL};
