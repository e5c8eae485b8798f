//! Dynamic library handling shared by module and crypto provider loading
//!
//! Loads platform libraries at runtime: .so (Linux), .dylib (macOS), .dll (Windows).
//! Decrypted libraries are first written to a staging file that is removed
//! once the library is unloaded.

use libloading::Library;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use thiserror::Error;
use tracing::debug;

use crate::CORE_VERSION;

/// Library loading errors
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("failed to stage library: {0}")]
    Stage(#[from] std::io::Error),

    #[error("failed to open library {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("library {path} does not export {symbol}")]
    MissingSymbol { path: PathBuf, symbol: String },

    #[error("ABI version mismatch (expected {expected}, found {found})")]
    AbiMismatch { expected: u32, found: u32 },

    #[error("built against modhost {found}, host is {expected}")]
    CoreMismatch { expected: String, found: String },

    #[error("invalid library: {0}")]
    Invalid(String),
}

/// True if `path` has the platform's dynamic library extension
pub fn is_dynamic_lib(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(std::env::consts::DLL_EXTENSION))
        .unwrap_or(false)
}

/// Reject declarations built for another ABI or another host version
///
/// Objects cross the library boundary as Rust trait objects, so the library
/// must be built against the exact same host crate.
pub fn check_versions(expected_abi: u32, abi: u32, core_version: &str) -> Result<(), LibraryError> {
    if abi != expected_abi {
        return Err(LibraryError::AbiMismatch {
            expected: expected_abi,
            found: abi,
        });
    }
    if core_version != CORE_VERSION {
        return Err(LibraryError::CoreMismatch {
            expected: CORE_VERSION.to_string(),
            found: core_version.to_string(),
        });
    }
    Ok(())
}

/// An opened library, optionally backed by a staging file
///
/// Field order matters: the library is unloaded before the staging file is
/// removed.
pub struct LoadedLibrary {
    library: Library,
    path: PathBuf,
    _staged: Option<TempPath>,
}

impl std::fmt::Debug for LoadedLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedLibrary")
            .field("path", &self.path)
            .field("staged", &self._staged.is_some())
            .finish()
    }
}

impl LoadedLibrary {
    /// Open a library file in place
    pub fn open(path: &Path) -> Result<Arc<Self>, LibraryError> {
        let library = Self::open_raw(path)?;
        Ok(Arc::new(Self {
            library,
            path: path.to_path_buf(),
            _staged: None,
        }))
    }

    /// Write `bytes` to a fresh file in `staging_dir` and open it
    pub fn stage(bytes: &[u8], staging_dir: &Path, label: &str) -> Result<Arc<Self>, LibraryError> {
        std::fs::create_dir_all(staging_dir)?;
        let stem: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .take(32)
            .collect();
        let mut file = tempfile::Builder::new()
            .prefix(&format!("modhost-{}-", stem))
            .suffix(std::env::consts::DLL_SUFFIX)
            .tempfile_in(staging_dir)?;
        file.write_all(bytes)?;
        file.flush()?;
        let staged = file.into_temp_path();
        debug!("Staged {} ({} bytes) at {}", label, bytes.len(), staged.display());

        let library = Self::open_raw(&staged)?;
        Ok(Arc::new(Self {
            library,
            path: staged.to_path_buf(),
            _staged: Some(staged),
        }))
    }

    fn open_raw(path: &Path) -> Result<Library, LibraryError> {
        // SAFETY: library initialisers run here; module libraries are trusted code
        unsafe { Library::new(path) }.map_err(|e| LibraryError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Borrow an exported static
    ///
    /// # Safety
    /// The symbol must be a static of type `T`.
    pub unsafe fn declaration<T>(&self, symbol: &[u8]) -> Result<&T, LibraryError> {
        let name = String::from_utf8_lossy(symbol.strip_suffix(b"\0").unwrap_or(symbol)).into_owned();
        let sym = self
            .library
            .get::<*const T>(symbol)
            .map_err(|_| LibraryError::MissingSymbol {
                path: self.path.clone(),
                symbol: name.clone(),
            })?;
        let ptr: *const T = *sym;
        ptr.as_ref().ok_or(LibraryError::MissingSymbol {
            path: self.path.clone(),
            symbol: name,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_dynamic_lib() {
        let ext = std::env::consts::DLL_EXTENSION;
        assert!(is_dynamic_lib(Path::new(&format!("mod.{}", ext))));
        assert!(!is_dynamic_lib(Path::new("mod.locked-module")));
        assert!(!is_dynamic_lib(Path::new("mod")));
    }

    #[test]
    fn test_check_versions() {
        assert!(check_versions(1, 1, CORE_VERSION).is_ok());
        assert!(matches!(
            check_versions(1, 2, CORE_VERSION),
            Err(LibraryError::AbiMismatch { expected: 1, found: 2 })
        ));
        assert!(matches!(
            check_versions(1, 1, "0.0.0-other"),
            Err(LibraryError::CoreMismatch { .. })
        ));
    }

    #[test]
    fn test_stage_rejects_garbage_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let err = LoadedLibrary::stage(&[0u8; 12], dir.path(), "demo").unwrap_err();
        assert!(matches!(err, LibraryError::Open { .. }));
        // The staging file is removed when opening fails
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
