//! Module system
//!
//! Server modules are compiled into the host (builtin), loaded from plain
//! dynamic libraries, or unpacked from encrypted packages. Each module serves
//! the URL subtree under its base path.
//!
//! ## Architecture
//!
//! - **Discovery**: finds libraries and packages, unlocks packages
//! - **Composition**: instantiates and initialises modules, isolating failures
//! - **Manager**: owns loaded modules and publishes the route table
//! - **Commands**: operator verbs offered by modules

pub mod commands;
pub mod decryptor;
pub mod loader;
pub mod manager;
pub mod registry;
pub mod traits;

pub use commands::{CommandRegistry, ModuleCommand};
pub use decryptor::{DecryptOutcome, DecryptedPackage, DecryptionSession};
pub use loader::{ModuleDeclaration, ModuleLoader, MODULE_ABI_VERSION};
pub use manager::{ModuleManager, RouteTableHandle, StopReport};
pub use registry::{
    Composer, Composition, CompositionReport, LoadFailure, ModuleDescriptor, ModuleDiscovery,
    ModuleRecord, RouteTable,
};
pub use traits::{
    responder, LoadError, ModuleContext, ModuleError, ModuleInfo, ModuleSource, ModuleState,
    PayloadFiles, Responder, ServerModule,
};
