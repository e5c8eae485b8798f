//! Module registry
//!
//! Discovery of module libraries and packages, composition into records and
//! the route table.

pub mod composer;
pub mod descriptor;
pub mod discovery;
pub mod routes;

pub use composer::{Composer, Composition, CompositionReport, LoadFailure};
pub use descriptor::{ModuleDescriptor, ModuleFactory, UNKNOWN_MODULE_NAME};
pub use discovery::{Discovered, ModuleDiscovery};
pub use routes::{ModuleRecord, RouteTable};
