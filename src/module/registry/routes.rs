//! Loaded modules and the route table built from them
//!
//! The route table is immutable once built. Changes produce a new table that
//! replaces the old one as a whole.

use http::StatusCode;
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

use super::descriptor::ModuleDescriptor;
use crate::http::errors::default_error_page;
use crate::module::commands::ModuleCommand;
use crate::module::traits::{ModuleError, ModuleInfo, Responder, ServerModule};
use crate::utils::error::panic_message;

/// An initialised module with its handlers
///
/// Field order matters: everything created by module code is dropped before
/// the descriptor, which may hold the module's library.
pub struct ModuleRecord {
    instance: Arc<dyn ServerModule>,
    handlers: HashMap<String, Responder>,
    catchall: Option<Responder>,
    commands: Vec<ModuleCommand>,
    info: ModuleInfo,
    descriptor: ModuleDescriptor,
}

impl std::fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRecord").field("info", &self.info).finish()
    }
}

impl ModuleRecord {
    pub(crate) fn new(
        instance: Arc<dyn ServerModule>,
        handlers: HashMap<String, Responder>,
        catchall: Option<Responder>,
        commands: Vec<ModuleCommand>,
        info: ModuleInfo,
        descriptor: ModuleDescriptor,
    ) -> Self {
        Self {
            instance,
            handlers,
            catchall,
            commands,
            info,
            descriptor,
        }
    }

    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn base_path(&self) -> &str {
        &self.info.base_path
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// Handler registered for an exact subpath
    pub fn handler(&self, subpath: &str) -> Option<Responder> {
        self.handlers.get(subpath).cloned()
    }

    pub fn catchall(&self) -> Option<Responder> {
        self.catchall.clone()
    }

    pub fn commands(&self) -> Vec<ModuleCommand> {
        self.commands.clone()
    }

    /// The module's error page, or the host's if it has none (or panics)
    pub fn render_error_page(&self, status: StatusCode, message: &str) -> String {
        match catch_unwind(AssertUnwindSafe(|| self.instance.error_page(status, message))) {
            Ok(Some(page)) => page,
            Ok(None) => default_error_page(status, message),
            Err(payload) => {
                warn!(
                    "Error page of module {} panicked: {}",
                    self.name(),
                    panic_message(payload.as_ref())
                );
                default_error_page(status, message)
            }
        }
    }

    /// Call the module's `stop`; a panic is reported as an error
    pub(crate) fn stop(&self) -> Result<(), ModuleError> {
        match catch_unwind(AssertUnwindSafe(|| self.instance.stop())) {
            Ok(result) => result,
            Err(payload) => Err(ModuleError::OperationError(format!(
                "stop panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }
}

/// Base path to module mapping
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    modules: BTreeMap<String, Arc<ModuleRecord>>,
}

impl RouteTable {
    /// Build a table; the first record for a base path wins
    pub fn new(records: impl IntoIterator<Item = Arc<ModuleRecord>>) -> Self {
        let mut modules = BTreeMap::new();
        for record in records {
            let base = record.base_path().to_string();
            if modules.contains_key(&base) {
                warn!("Base path {} registered twice, keeping the first module", base);
                continue;
            }
            modules.insert(base, record);
        }
        Self { modules }
    }

    pub fn get(&self, base_path: &str) -> Option<&Arc<ModuleRecord>> {
        self.modules.get(base_path)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn base_paths(&self) -> Vec<&str> {
        self.modules.keys().map(|k| k.as_str()).collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &Arc<ModuleRecord>> {
        self.modules.values()
    }
}
