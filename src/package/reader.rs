//! Reading encrypted packages
//!
//! A package is a zip archive. Entries are read on demand; only the manifest
//! is parsed up front.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use tracing::{debug, warn};
use zip::result::ZipError;
use zip::ZipArchive;

use super::manifest::{EncryptionKind, PackageManifest, MANIFEST_ENTRY};
use super::PackageError;
use crate::crypto::LoadedProvider;

/// Largest entry a package may carry
///
/// Modules are small; anything bigger is treated as a malformed package.
pub const MAX_ENTRY_SIZE: u64 = 256 * 1024 * 1024;

/// Encrypted entry bytes keyed by entry name
pub type RawFiles = BTreeMap<String, Vec<u8>>;

/// An opened package
pub struct PackageReader<R: Read + Seek> {
    archive: ZipArchive<R>,
    manifest: PackageManifest,
    source: String,
}

impl PackageReader<BufReader<File>> {
    /// Open the package file at `path`
    pub fn open(path: &Path) -> Result<Self, PackageError> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file), path.display().to_string())
    }
}

impl<R: Read + Seek> PackageReader<R> {
    /// Open a package from any seekable reader; `source` names it in logs
    pub fn new(reader: R, source: impl Into<String>) -> Result<Self, PackageError> {
        let source = source.into();
        let mut archive = ZipArchive::new(reader).map_err(|e| match e {
            ZipError::Io(io) => PackageError::Io(io),
            other => PackageError::Malformed(format!("{} is not a package: {}", source, other)),
        })?;
        let manifest_bytes = read_entry(&mut archive, MANIFEST_ENTRY)?.ok_or_else(|| {
            PackageError::Malformed(format!("{} has no {} entry", source, MANIFEST_ENTRY))
        })?;
        let text = String::from_utf8(manifest_bytes)
            .map_err(|_| PackageError::Malformed(format!("{} manifest is not UTF-8", source)))?;
        let manifest = PackageManifest::parse(&text)?;
        debug!("Opened package {} ({:?})", source, manifest.encryption);
        Ok(Self {
            archive,
            manifest,
            source,
        })
    }

    pub fn manifest(&self) -> &PackageManifest {
        &self.manifest
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Read one entry; `None` if it does not exist
    pub fn read_entry(&mut self, name: &str) -> Result<Option<Vec<u8>>, PackageError> {
        read_entry(&mut self.archive, name)
    }

    /// Read every encrypted entry named by the manifest
    ///
    /// Missing payload entries are logged and skipped; a missing module entry
    /// fails the package.
    pub fn read_encrypted_files(&mut self) -> Result<RawFiles, PackageError> {
        let mut files = RawFiles::new();
        let payloads = self.manifest.payload_files.clone();
        for name in payloads {
            match self.read_entry(&name)? {
                Some(bytes) => {
                    files.insert(name, bytes);
                }
                None => warn!("Package {} is missing payload entry '{}', skipping", self.source, name),
            }
        }

        let module_file = self.manifest.module_file.clone();
        let module = self
            .read_entry(&module_file)?
            .ok_or_else(|| PackageError::MissingModuleEntry(module_file.clone()))?;
        files.insert(module_file, module);
        Ok(files)
    }

    /// Provider named by the manifest, loading a custom one from the package
    pub fn crypto_provider(&mut self, staging_dir: &Path) -> Result<LoadedProvider, PackageError> {
        match self.manifest.encryption {
            EncryptionKind::BuiltinAes => Ok(LoadedProvider::builtin()),
            EncryptionKind::Custom => {
                let name = self.manifest.crypto_provider_file.clone().ok_or_else(|| {
                    PackageError::Malformed("custom encryption requires crypto_provider_file".to_string())
                })?;
                let bytes = self.read_entry(&name)?.ok_or_else(|| {
                    PackageError::Malformed(format!(
                        "{} is missing crypto provider entry '{}'",
                        self.source, name
                    ))
                })?;
                LoadedProvider::load_custom(&bytes, &name, staging_dir)
                    .map_err(PackageError::ProviderLoad)
            }
        }
    }
}

fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>, PackageError> {
    read_entry_limited(archive, name, MAX_ENTRY_SIZE)
}

/// Read an entry of at most `limit` bytes
///
/// The declared size comes from the archive and is only trusted to reject
/// early; the read itself stops after `limit + 1` bytes.
fn read_entry_limited<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    limit: u64,
) -> Result<Option<Vec<u8>>, PackageError> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let too_large = || {
        PackageError::Malformed(format!("entry '{}' is larger than {} bytes", name, limit))
    };
    if entry.size() > limit {
        return Err(too_large());
    }
    let mut bytes = Vec::new();
    entry.take(limit + 1).read_to_end(&mut bytes)?;
    if bytes.len() as u64 > limit {
        return Err(too_large());
    }
    Ok(Some(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    fn manifest(payloads: &[&str], module: &str) -> PackageManifest {
        PackageManifest {
            encryption: EncryptionKind::BuiltinAes,
            crypto_provider_file: None,
            payload_files: payloads.iter().map(|p| p.to_string()).collect(),
            module_file: module.to_string(),
        }
    }

    fn archive(entries: &[(&str, &[u8])]) -> Cursor<Vec<u8>> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(bytes).unwrap();
        }
        let mut out = zip.finish().unwrap();
        out.set_position(0);
        out
    }

    #[test]
    fn test_missing_manifest_is_malformed() {
        let bytes = archive(&[("module.so", b"ciphertext")]);
        let err = PackageReader::new(bytes, "no-manifest").err().unwrap();
        assert!(matches!(err, PackageError::Malformed(ref m) if m.contains(MANIFEST_ENTRY)));
    }

    #[test]
    fn test_missing_module_entry_fails_package() {
        let toml = manifest(&["a.txt"], "module.so").to_toml().unwrap();
        let bytes = archive(&[(MANIFEST_ENTRY, toml.as_bytes()), ("a.txt", b"payload")]);
        let mut reader = PackageReader::new(bytes, "no-module").unwrap();
        let err = reader.read_encrypted_files().unwrap_err();
        assert!(matches!(err, PackageError::MissingModuleEntry(ref name) if name == "module.so"));
    }

    #[test]
    fn test_missing_payload_is_skipped() {
        let toml = manifest(&["a.txt", "gone.txt"], "module.so").to_toml().unwrap();
        let bytes = archive(&[
            (MANIFEST_ENTRY, toml.as_bytes()),
            ("a.txt", b"payload"),
            ("module.so", b"module"),
        ]);
        let mut reader = PackageReader::new(bytes, "partial").unwrap();
        let files = reader.read_encrypted_files().unwrap();
        assert_eq!(files.keys().collect::<Vec<_>>(), vec!["a.txt", "module.so"]);
        assert_eq!(files["module.so"], b"module");
    }

    #[test]
    fn test_oversized_entry_is_malformed() {
        let mut bytes = archive(&[("big.bin", &[1u8; 64]), ("small.bin", &[2u8; 16])]);
        let mut zip = ZipArchive::new(&mut bytes).unwrap();
        let err = read_entry_limited(&mut zip, "big.bin", 32).unwrap_err();
        assert!(matches!(err, PackageError::Malformed(ref m) if m.contains("big.bin")));
        assert_eq!(read_entry_limited(&mut zip, "small.bin", 32).unwrap().unwrap(), vec![2u8; 16]);
    }

    #[test]
    fn test_forged_entry_size_is_rejected() {
        let toml = manifest(&[], "module.so").to_toml().unwrap();
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file(MANIFEST_ENTRY, options).unwrap();
        zip.write_all(toml.as_bytes()).unwrap();
        zip.start_file("module.so", options.large_file(true)).unwrap();
        zip.write_all(&[0u8; 32]).unwrap();
        let mut raw = zip.finish().unwrap().into_inner();

        // Zip64 extended information: tag 0x0001, then the uncompressed size
        let mut patched = 0;
        let mut at = 0;
        while at + 12 <= raw.len() {
            if raw[at..at + 2] == [0x01, 0x00] && raw[at + 2..at + 4] == [0x10, 0x00] {
                raw[at + 4..at + 12].copy_from_slice(&u64::MAX.to_le_bytes());
                patched += 1;
                at += 12;
            } else {
                at += 1;
            }
        }
        assert!(patched > 0);

        let result = PackageReader::new(Cursor::new(raw), "forged")
            .and_then(|mut reader| reader.read_encrypted_files());
        assert!(result.is_err());
    }
}
