//! Custom crypto providers shipped inside a package
//!
//! A provider library exports a `MODHOST_CRYPTO_PROVIDER` static (see
//! [`declare_crypto_provider!`](crate::declare_crypto_provider)). The library
//! bytes are staged to disk, opened, version checked, and the provider it
//! creates is wrapped in a [`CryptoWrapper`].

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::{AesCbcProvider, CryptoProvider, CryptoWrapper};
use crate::module::loader::{check_versions, LibraryError, LoadedLibrary};

/// Version of the crypto provider declaration layout
pub const CRYPTO_ABI_VERSION: u32 = 1;

/// Exported symbol name of the provider declaration
pub const CRYPTO_PROVIDER_SYMBOL: &[u8] = b"MODHOST_CRYPTO_PROVIDER\0";

/// Static exported by a provider library
pub struct CryptoProviderDeclaration {
    pub abi_version: u32,
    pub core_version: &'static str,
    pub create: fn() -> Box<dyn CryptoProvider>,
}

/// Export a crypto provider from a `cdylib`
///
/// ```ignore
/// modhost::declare_crypto_provider!(MyProvider::new());
/// ```
#[macro_export]
macro_rules! declare_crypto_provider {
    ($ctor:expr) => {
        #[no_mangle]
        pub static MODHOST_CRYPTO_PROVIDER: $crate::crypto::CryptoProviderDeclaration =
            $crate::crypto::CryptoProviderDeclaration {
                abi_version: $crate::crypto::CRYPTO_ABI_VERSION,
                core_version: $crate::CORE_VERSION,
                create: {
                    fn __modhost_create_provider() -> ::std::boxed::Box<dyn $crate::crypto::CryptoProvider> {
                        ::std::boxed::Box::new($ctor)
                    }
                    __modhost_create_provider
                },
            };
    };
}

/// The provider used to decrypt one package
///
/// Keeps the provider library mapped while the provider is alive. Field order
/// matters: the provider is dropped before its library.
pub struct LoadedProvider {
    provider: CryptoWrapper,
    _library: Option<Arc<LoadedLibrary>>,
}

impl std::fmt::Debug for LoadedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedProvider")
            .field("provider", &self.provider.name())
            .field("custom", &self._library.is_some())
            .finish()
    }
}

impl LoadedProvider {
    /// The built-in AES provider
    pub fn builtin() -> Self {
        Self {
            provider: CryptoWrapper {
                inner: Box::new(AesCbcProvider::new()),
            },
            _library: None,
        }
    }

    /// Wrap an in-process provider
    pub fn from_provider(provider: Box<dyn CryptoProvider>) -> Result<Self, LibraryError> {
        let provider =
            CryptoWrapper::new(provider).map_err(|e| LibraryError::Invalid(e.to_string()))?;
        Ok(Self {
            provider,
            _library: None,
        })
    }

    /// Stage provider library bytes into `staging_dir` and load them
    pub fn load_custom(
        bytes: &[u8],
        entry_name: &str,
        staging_dir: &Path,
    ) -> Result<Self, LibraryError> {
        let library = LoadedLibrary::stage(bytes, staging_dir, entry_name)?;
        // SAFETY: the symbol is produced by `declare_crypto_provider!`
        let declaration =
            unsafe { library.declaration::<CryptoProviderDeclaration>(CRYPTO_PROVIDER_SYMBOL)? };
        check_versions(
            CRYPTO_ABI_VERSION,
            declaration.abi_version,
            declaration.core_version,
        )?;

        let create = declaration.create;
        let inner = std::panic::catch_unwind(create)
            .map_err(|_| LibraryError::Invalid(format!("provider '{}' panicked on creation", entry_name)))?;
        debug!("Custom crypto provider '{}' created from {}", inner.name(), entry_name);

        let provider = CryptoWrapper::new(inner).map_err(|e| LibraryError::Invalid(e.to_string()))?;
        info!("Loaded custom crypto provider {}", provider.name());
        Ok(Self {
            provider,
            _library: Some(library),
        })
    }

    pub fn provider(&self) -> &CryptoWrapper {
        &self.provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_is_aes() {
        let loaded = LoadedProvider::builtin();
        assert_eq!(loaded.provider().name(), "builtin-aes");
    }

    #[test]
    fn test_garbage_library_is_rejected() {
        let dir = TempDir::new().unwrap();
        let err = LoadedProvider::load_custom(b"not a library", "crypto.so", dir.path())
            .unwrap_err();
        assert!(matches!(err, LibraryError::Open { .. }));
    }

    #[test]
    fn test_from_provider_rejects_wrapper() {
        let wrapper = CryptoWrapper::new(Box::new(AesCbcProvider::with_iterations(10))).unwrap();
        assert!(LoadedProvider::from_provider(Box::new(wrapper)).is_err());
    }
}
