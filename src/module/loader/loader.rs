//! Module library loading
//!
//! A module library exports a `MODHOST_MODULE_DECLARATION` static produced by
//! [`declare_module!`](crate::declare_module). Loading opens the library,
//! checks the declaration and turns it into a [`ModuleDescriptor`].

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::library::{check_versions, LibraryError, LoadedLibrary};
use crate::module::registry::ModuleDescriptor;
use crate::module::traits::{ModuleSource, PayloadFiles, ServerModule};

/// Version of the module declaration layout
pub const MODULE_ABI_VERSION: u32 = 1;

/// Exported symbol name of the module declaration
pub const MODULE_DECLARATION_SYMBOL: &[u8] = b"MODHOST_MODULE_DECLARATION\0";

/// Static exported by a module library
pub struct ModuleDeclaration {
    pub abi_version: u32,
    pub core_version: &'static str,
    pub name: &'static str,
    pub base_path: &'static str,
    pub create: fn() -> Box<dyn ServerModule>,
}

/// Export a module from a `cdylib`
///
/// ```ignore
/// modhost::declare_module!("DemoServer", "Demo", DemoServer::default());
/// ```
#[macro_export]
macro_rules! declare_module {
    ($name:expr, $base_path:expr, $ctor:expr) => {
        #[no_mangle]
        pub static MODHOST_MODULE_DECLARATION: $crate::module::ModuleDeclaration =
            $crate::module::ModuleDeclaration {
                abi_version: $crate::module::MODULE_ABI_VERSION,
                core_version: $crate::CORE_VERSION,
                name: $name,
                base_path: $base_path,
                create: {
                    fn __modhost_create_module() -> ::std::boxed::Box<dyn $crate::module::ServerModule> {
                        ::std::boxed::Box::new($ctor)
                    }
                    __modhost_create_module
                },
            };
    };
}

/// Module loader for plain and decrypted module libraries
pub struct ModuleLoader;

impl ModuleLoader {
    /// Load a plain module library in place
    pub fn load_library(path: &Path) -> Result<ModuleDescriptor, LibraryError> {
        let library = LoadedLibrary::open(path)?;
        Self::describe(
            library,
            ModuleSource::Library(path.to_path_buf()),
            Arc::new(PayloadFiles::new()),
        )
    }

    /// Stage decrypted module bytes and load them
    pub fn load_decrypted(
        bytes: &[u8],
        label: &str,
        staging_dir: &Path,
        source: ModuleSource,
        payload_files: PayloadFiles,
    ) -> Result<ModuleDescriptor, LibraryError> {
        let library = LoadedLibrary::stage(bytes, staging_dir, label)?;
        Self::describe(library, source, Arc::new(payload_files))
    }

    fn describe(
        library: Arc<LoadedLibrary>,
        source: ModuleSource,
        payload_files: Arc<PayloadFiles>,
    ) -> Result<ModuleDescriptor, LibraryError> {
        // SAFETY: the symbol is produced by `declare_module!`
        let declaration =
            unsafe { library.declaration::<ModuleDeclaration>(MODULE_DECLARATION_SYMBOL)? };
        check_versions(MODULE_ABI_VERSION, declaration.abi_version, declaration.core_version)?;

        let name = declaration.name.to_string();
        let base_path = declaration.base_path.to_string();
        let create = declaration.create;
        info!("Found module {} ({}) in {}", name, base_path, source);

        Ok(ModuleDescriptor::from_library(
            name,
            base_path,
            source,
            create,
            library,
            payload_files,
        ))
    }
}
