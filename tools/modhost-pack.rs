//! Build an encrypted `.locked-module` package
//!
//! Usage:
//!   modhost-pack <module library> [--payload FILE]... [--crypto-provider LIB] [-o OUT]
//!
//! The password is read twice from the console. Without `--crypto-provider`
//! the built-in AES provider is used.

use anyhow::{bail, Context};
use clap::Parser;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;

use modhost::config::LOCKED_MODULE_EXTENSION;
use modhost::crypto::LoadedProvider;
use modhost::package::PackageBuilder;
use modhost::utils::init_logging;
use modhost::{ConsolePrompt, SecretPrompt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Encrypted module packager")]
struct Args {
    /// Module library to package
    module: PathBuf,

    /// Payload file shipped (encrypted) alongside the module; repeatable
    #[arg(short, long = "payload")]
    payloads: Vec<PathBuf>,

    /// Custom crypto provider library shipped in the package
    #[arg(long)]
    crypto_provider: Option<PathBuf>,

    /// Output path (default: module name with the .locked-module extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Overwrite an existing output file
    #[arg(short, long)]
    force: bool,
}

fn main() -> anyhow::Result<()> {
    init_logging(None);
    let args = Args::parse();

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.module.with_extension(LOCKED_MODULE_EXTENSION));
    if output.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", output.display());
    }

    let module_bytes = std::fs::read(&args.module)
        .with_context(|| format!("reading module {}", args.module.display()))?;
    let mut builder = PackageBuilder::new(entry_name(&args.module)?, module_bytes);
    for payload in &args.payloads {
        let bytes = std::fs::read(payload)
            .with_context(|| format!("reading payload {}", payload.display()))?;
        builder = builder.payload(entry_name(payload)?, bytes);
    }

    // The staging dir must outlive the provider loaded from it
    let staging = tempfile::tempdir().context("creating staging directory")?;
    let provider = match &args.crypto_provider {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("reading crypto provider {}", path.display()))?;
            let name = entry_name(path)?;
            let provider = LoadedProvider::load_custom(&bytes, &name, staging.path())
                .with_context(|| format!("loading crypto provider {}", path.display()))?;
            builder = builder.crypto_provider(name, bytes);
            provider
        }
        None => LoadedProvider::builtin(),
    };

    let mut prompt = ConsolePrompt;
    let password = prompt.prompt_password("Package password: ")?;
    if password.is_empty() {
        bail!("password cannot be empty");
    }
    let repeated = prompt.prompt_password("Repeat password: ")?;
    if password != repeated {
        bail!("passwords do not match");
    }

    let file = File::create(&output).with_context(|| format!("creating {}", output.display()))?;
    builder
        .write(BufWriter::new(file), provider.provider(), &password)
        .with_context(|| format!("writing {}", output.display()))?;
    info!("Package written to {}", output.display());
    Ok(())
}

/// Archive entry name for a file: its file name
fn entry_name(path: &Path) -> anyhow::Result<String> {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => Ok(name.to_string()),
        None => bail!("{} has no usable file name", path.display()),
    }
}
