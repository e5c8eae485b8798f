//! Encrypted package discovery and unlocking
//!
//! Packages here use the built-in provider with its production round count,
//! so each test keeps the number of key derivations small.

mod support;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use modhost::crypto::{AesCbcProvider, SecretBuffer};
use modhost::module::loader::LibraryError;
use modhost::module::ModuleDiscovery;
use modhost::package::{EncryptionKind, PackageBuilder, PackageManifest, MANIFEST_ENTRY};
use modhost::{Host, HostError, LoadError, ScriptedPrompt};
use support::{test_config, Probe, StubModule};

/// Bytes that decrypt fine but are not a loadable library
const FAKE_MODULE: [u8; 12] = [7; 12];

fn write_package(dir: &Path, name: &str, builder: PackageBuilder, password: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    builder
        .write(
            File::create(&path).unwrap(),
            &AesCbcProvider::new(),
            &SecretBuffer::from_str_copy(password),
        )
        .unwrap();
    path
}

fn demo_package() -> PackageBuilder {
    PackageBuilder::new("demo.so", FAKE_MODULE.to_vec()).payload("a.txt", b"hello".to_vec())
}

#[test]
fn test_wrong_then_right_password() {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(test_config(dir.path()));
    let path = write_package(&config.modules_dir(), "demo.locked-module", demo_package(), "pw1");

    let mut prompt = ScriptedPrompt::new(["wrong", "pw1"], [true]);
    let err = ModuleDiscovery::new(Arc::clone(&config))
        .unlock_package(&path, &mut prompt)
        .unwrap_err();

    // Decryption succeeded; the decrypted bytes are not a real library
    assert!(matches!(err, LoadError::Library(LibraryError::Open { .. })));
    assert_eq!(
        prompt.messages,
        vec![
            "Password for demo.locked-module: ",
            "Invalid password. Try again?",
            "Password for demo.locked-module: ",
        ]
    );

    // The staged copy is cleaned up again
    let leftovers = std::fs::read_dir(config.unpack_dir()).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[test]
fn test_empty_password_aborts() {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(test_config(dir.path()));
    let path = write_package(&config.modules_dir(), "demo.locked-module", demo_package(), "pw1");

    let mut prompt = ScriptedPrompt::new([""], [true]);
    let err = ModuleDiscovery::new(config)
        .unlock_package(&path, &mut prompt)
        .unwrap_err();
    assert!(matches!(err, LoadError::DecryptionAborted));
    assert_eq!(prompt.messages[1], "Do you want to abort decrypting demo.locked-module?");
}

#[test]
fn test_declining_retry_aborts() {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(test_config(dir.path()));
    let path = write_package(&config.modules_dir(), "demo.locked-module", demo_package(), "pw1");

    let mut prompt = ScriptedPrompt::new(["nope"], [false]);
    let err = ModuleDiscovery::new(config)
        .unlock_package(&path, &mut prompt)
        .unwrap_err();
    assert!(matches!(err, LoadError::DecryptionAborted));
}

#[test]
fn test_not_a_package() {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(test_config(dir.path()));
    std::fs::create_dir_all(config.modules_dir()).unwrap();
    let path = config.modules_dir().join("junk.locked-module");
    std::fs::write(&path, b"definitely not a zip archive").unwrap();

    let mut prompt = ScriptedPrompt::new(Vec::<String>::new(), []);
    let err = ModuleDiscovery::new(config)
        .unlock_package(&path, &mut prompt)
        .unwrap_err();
    assert!(matches!(err, LoadError::MalformedPackage(_)));
    assert!(prompt.messages.is_empty());
}

#[test]
fn test_broken_custom_provider() {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(test_config(dir.path()));
    let builder = demo_package().crypto_provider("crypto.so", b"not a library".to_vec());
    // Encrypted with the built-in cipher; the host never gets that far
    let path = write_package(&config.modules_dir(), "custom.locked-module", builder, "pw1");

    let mut prompt = ScriptedPrompt::new(Vec::<String>::new(), []);
    let err = ModuleDiscovery::new(config)
        .unlock_package(&path, &mut prompt)
        .unwrap_err();
    assert!(matches!(err, LoadError::ProviderLoad(LibraryError::Open { .. })));
    assert!(prompt.messages.is_empty());
}

#[tokio::test]
async fn test_failed_package_does_not_stop_host() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    write_package(&config.modules_dir(), "demo.locked-module", demo_package(), "pw1");

    let probe = Probe::new();
    let mut host = Host::new(config);
    host.register_builtin(StubModule::new(probe.clone()).descriptor("Builtin", "Builtin"));

    let prompt = ScriptedPrompt::new([""], [true]);
    let serving = host.start(Box::new(prompt)).await.unwrap();
    let report = serving.report();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert!(matches!(report.failures[0].error, LoadError::DecryptionAborted));
    assert!(report.failures[0].source.ends_with("demo.locked-module"));

    serving.shutdown().await;
    assert_eq!(probe.stops(), 1);
}

#[tokio::test]
async fn test_only_failed_packages_is_fatal() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    write_package(&config.modules_dir(), "demo.locked-module", demo_package(), "pw1");

    let host = Host::new(config);
    let prompt = ScriptedPrompt::new([""], [true]);
    let err = host.start(Box::new(prompt)).await.err().unwrap();
    assert!(matches!(err, HostError::NoModulesLoaded { failed: 1 }));
}

#[test]
fn test_explicit_package_list() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.modules.packages = vec!["chosen.locked-module".to_string()];
    std::fs::create_dir_all(config.modules_dir()).unwrap();
    std::fs::write(config.modules_dir().join("ignored.locked-module"), b"x").unwrap();

    let discovery = ModuleDiscovery::new(Arc::new(config.clone()));
    assert_eq!(
        discovery.package_paths(),
        vec![config.modules_dir().join("chosen.locked-module")]
    );
}

#[tokio::test]
async fn test_package_without_module_entry_fails_alone() {
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    std::fs::create_dir_all(config.modules_dir()).unwrap();
    let manifest = PackageManifest {
        encryption: EncryptionKind::BuiltinAes,
        crypto_provider_file: None,
        payload_files: vec!["a.txt".to_string()],
        module_file: "demo.so".to_string(),
    };
    let path = config.modules_dir().join("hollow.locked-module");
    let mut zip = ZipWriter::new(File::create(&path).unwrap());
    zip.start_file(MANIFEST_ENTRY, SimpleFileOptions::default()).unwrap();
    zip.write_all(manifest.to_toml().unwrap().as_bytes()).unwrap();
    zip.start_file("a.txt", SimpleFileOptions::default()).unwrap();
    zip.write_all(b"ciphertext").unwrap();
    zip.finish().unwrap();

    let probe = Probe::new();
    let mut host = Host::new(config);
    host.register_builtin(StubModule::new(probe.clone()).descriptor("Builtin", "Builtin"));

    let prompt = ScriptedPrompt::new(Vec::<String>::new(), []);
    let serving = host.start(Box::new(prompt)).await.unwrap();
    let report = serving.report();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert!(matches!(
        report.failures[0].error,
        LoadError::MalformedPackage(ref m) if m.contains("demo.so")
    ));

    serving.shutdown().await;
    assert_eq!(probe.stops(), 1);
}
