//! modhost - modular HTTP host
//!
//! Loads server modules (compiled in, plain dynamic libraries, or encrypted
//! `.locked-module` packages), routes HTTP requests to them by base path and
//! coordinates their start/stop lifecycle.
//!
//! ## Design Principles
//!
//! 1. **Failure isolation**: a broken module or package is logged and skipped
//! 2. **Secrets stay scoped**: passwords live in zeroizing buffers and are
//!    never persisted
//! 3. **Immutable routing**: the route table is rebuilt and swapped, never
//!    mutated in place
//! 4. **Every request is answered**: handler errors and panics become error
//!    pages

pub mod config;
pub mod crypto;
pub mod host;
pub mod http;
pub mod module;
pub mod package;
pub mod prompt;
pub mod utils;

/// Host version; dynamically loaded modules must be built against the same one
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub use config::HostConfig;
pub use crypto::{AesCbcProvider, CryptoError, CryptoProvider, SecretBuffer};
pub use host::{Host, HostError, HostState, ServingHost};
pub use http::{HandlerError, HttpRequest, ModuleResponse};
pub use module::{
    responder, LoadError, ModuleCommand, ModuleContext, ModuleDescriptor, ModuleError,
    Responder, ServerModule,
};
pub use prompt::{ConsolePrompt, ScriptedPrompt, SecretPrompt};
