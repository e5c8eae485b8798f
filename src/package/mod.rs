//! Encrypted module packages (`.locked-module`)
//!
//! A package bundles an encrypted module library, encrypted payload files and
//! optionally an unencrypted custom crypto provider library, described by a
//! plain manifest entry.

pub mod manifest;
pub mod reader;
pub mod writer;

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::module::loader::LibraryError;

pub use manifest::{EncryptionKind, PackageManifest, MANIFEST_ENTRY};
pub use reader::{PackageReader, RawFiles};
pub use writer::PackageBuilder;

/// Package errors
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("malformed package: {0}")]
    Malformed(String),

    #[error("module entry '{0}' missing from package")]
    MissingModuleEntry(String),

    #[error("crypto provider could not be loaded: {0}")]
    ProviderLoad(LibraryError),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
