//! Configuration management for the module host
//!
//! Handles configuration loading (TOML or JSON), environment overrides and
//! validation. The config is built once at startup and shared by reference.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::utils::env::{env_bool, env_opt, env_parse};
use crate::utils::timeout::DEFAULT_MODULE_STOP_TIMEOUT;

/// Default listening port
pub const DEFAULT_PORT: u16 = 50001;

/// File extension of encrypted module packages
pub const LOCKED_MODULE_EXTENSION: &str = "locked-module";

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    /// TCP port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address to bind (all interfaces by default)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Domain that generated module URLs point to
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Generate `https://` URLs (TLS is terminated in front of the host)
    #[serde(default)]
    pub use_https: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_domain() -> String {
    "localhost".to_string()
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: default_bind_address(),
            domain: default_domain(),
            use_https: false,
        }
    }
}

/// Module system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Directory containing module libraries and encrypted packages
    #[serde(default = "default_modules_dir")]
    pub modules_dir: String,

    /// Explicit list of module libraries (empty = scan `modules_dir`)
    #[serde(default)]
    pub libraries: Vec<String>,

    /// Explicit list of encrypted packages (empty = scan `modules_dir`)
    #[serde(default)]
    pub packages: Vec<String>,

    /// Where decrypted module libraries are staged (None = system temp dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unpack_dir: Option<String>,

    /// Module-specific configuration, keyed by base path
    #[serde(default)]
    pub module_configs: HashMap<String, HashMap<String, String>>,
}

fn default_modules_dir() -> String {
    "Servers".to_string()
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            modules_dir: default_modules_dir(),
            libraries: Vec::new(),
            packages: Vec::new(),
            unpack_dir: None,
            module_configs: HashMap::new(),
        }
    }
}

impl ModuleConfig {
    /// Config map handed to the module registered at `base_path`
    pub fn config_for(&self, base_path: &str) -> HashMap<String, String> {
        self.module_configs.get(base_path).cloned().unwrap_or_default()
    }
}

/// Shutdown behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// How long to wait for all modules' `stop()` before giving up on stragglers
    #[serde(default = "default_module_stop_timeout")]
    pub module_stop_timeout_secs: u64,
}

fn default_module_stop_timeout() -> u64 {
    DEFAULT_MODULE_STOP_TIMEOUT.as_secs()
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            module_stop_timeout_secs: default_module_stop_timeout(),
        }
    }
}

impl ShutdownConfig {
    pub fn module_stop_timeout(&self) -> Duration {
        Duration::from_secs(self.module_stop_timeout_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (e.g. "info", "modhost=debug"); RUST_LOG takes precedence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Emit JSON lines (requires the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

/// Host configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub listen: ListenConfig,

    #[serde(default)]
    pub modules: ModuleConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HostConfig {
    /// Load configuration from a TOML or JSON file (chosen by extension)
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = if is_json(path) {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };
        Ok(config)
    }

    /// Save configuration to a TOML or JSON file (chosen by extension)
    pub fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            toml::to_string_pretty(self)?
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load the config at `path`, or write and return defaults if it does not exist
    ///
    /// A file that exists but fails to parse or validate is an error.
    pub fn load_or_create(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            info!("Loading config from {}", path.display());
            Self::from_file(path)?
        } else {
            info!("No config at {}, writing defaults", path.display());
            let config = Self::default();
            if let Err(e) = config.to_file(path) {
                warn!("Failed to write default config to {}: {}", path.display(), e);
            }
            config
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply MODHOST_PORT, MODHOST_DOMAIN, MODHOST_USE_HTTPS and MODHOST_MODULES_DIR
    pub fn apply_env_overrides(&mut self) {
        if let Some(port) = env_parse::<u16>("MODHOST_PORT") {
            self.listen.port = port;
        }
        if let Some(domain) = env_opt("MODHOST_DOMAIN") {
            self.listen.domain = domain;
        }
        if env_opt("MODHOST_USE_HTTPS").is_some() {
            self.listen.use_https = env_bool("MODHOST_USE_HTTPS");
        }
        if let Some(dir) = env_opt("MODHOST_MODULES_DIR") {
            self.modules.modules_dir = dir;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !is_valid_domain(&self.listen.domain) {
            return Err(anyhow::anyhow!(
                "domain '{}' is not a valid host name",
                self.listen.domain
            ));
        }
        if self.shutdown.module_stop_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "module_stop_timeout_secs must be greater than 0"
            ));
        }
        if self.modules.modules_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("modules_dir cannot be empty"));
        }
        Ok(())
    }

    /// Socket address the listener binds to
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen.bind_address, self.listen.port)
    }

    /// Public URL of the module served under `base_path`
    pub fn module_url(&self, base_path: &str) -> String {
        let scheme = if self.listen.use_https { "https" } else { "http" };
        format!(
            "{}://{}:{}/{}/",
            scheme, self.listen.domain, self.listen.port, base_path
        )
    }

    pub fn modules_dir(&self) -> PathBuf {
        PathBuf::from(&self.modules.modules_dir)
    }

    /// Staging directory for decrypted module libraries
    pub fn unpack_dir(&self) -> PathBuf {
        self.modules
            .unpack_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Host name check: dot-separated labels of alphanumerics, '-' and '_'
fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > 253 {
        return false;
    }
    domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}
