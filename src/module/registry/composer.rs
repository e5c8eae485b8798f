//! Composition of modules into route table records
//!
//! Each descriptor is instantiated and initialised in turn. Failures are
//! contained per module: the module is logged and skipped, the rest still
//! load.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::descriptor::ModuleDescriptor;
use super::routes::ModuleRecord;
use crate::config::HostConfig;
use crate::module::traits::{LoadError, ModuleContext, ModuleInfo, Responder, ServerModule};
use crate::utils::error::panic_message;

/// A module or package that failed to load
#[derive(Debug)]
pub struct LoadFailure {
    /// Package path or module name
    pub source: String,
    pub error: LoadError,
}

/// Counts of a composition run
#[derive(Debug, Default)]
pub struct CompositionReport {
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<LoadFailure>,
}

impl CompositionReport {
    fn record_failure(&mut self, failure: LoadFailure) {
        error!("Failed to load {}: {}", failure.source, failure.error);
        self.failed += 1;
        self.failures.push(failure);
    }
}

/// Successfully initialised modules plus the report
#[derive(Debug)]
pub struct Composition {
    pub records: Vec<ModuleRecord>,
    pub report: CompositionReport,
}

/// Instantiates module descriptors
pub struct Composer {
    config: Arc<HostConfig>,
}

impl Composer {
    pub fn new(config: Arc<HostConfig>) -> Self {
        Self { config }
    }

    /// Instantiate every descriptor in order
    ///
    /// `earlier_failures` (from discovery) are carried into the report. When
    /// two modules claim the same base path the first one wins.
    pub fn compose(
        &self,
        descriptors: Vec<ModuleDescriptor>,
        earlier_failures: Vec<LoadFailure>,
    ) -> Composition {
        let mut report = CompositionReport::default();
        for failure in earlier_failures {
            report.failed += 1;
            report.failures.push(failure);
        }

        let mut taken = HashSet::new();
        let mut records = Vec::new();
        for descriptor in descriptors {
            if taken.contains(&descriptor.base_path) {
                report.record_failure(LoadFailure {
                    source: descriptor.display_name().to_string(),
                    error: LoadError::DuplicateBasePath {
                        base_path: descriptor.base_path.clone(),
                        name: descriptor.display_name().to_string(),
                    },
                });
                continue;
            }
            match self.instantiate(&descriptor) {
                Ok(record) => {
                    info!(
                        "Loaded module {} at /{}/ ({})",
                        record.name(),
                        record.base_path(),
                        descriptor.source
                    );
                    taken.insert(descriptor.base_path.clone());
                    records.push(record);
                    report.succeeded += 1;
                }
                Err(error) => report.record_failure(LoadFailure {
                    source: descriptor.display_name().to_string(),
                    error,
                }),
            }
        }

        info!(
            "Module composition finished: {} loaded, {} failed",
            report.succeeded, report.failed
        );
        Composition { records, report }
    }

    /// Create, initialise and collect the handlers of one module
    pub fn instantiate(&self, descriptor: &ModuleDescriptor) -> Result<ModuleRecord, LoadError> {
        descriptor.validate()?;
        let name = descriptor.display_name().to_string();
        let base_path = descriptor.base_path.clone();
        let init_failed = |reason: String| LoadError::InitFailed {
            name: name.clone(),
            reason,
        };

        let mut module = catch_unwind(AssertUnwindSafe(|| descriptor.create()))
            .map_err(|p| init_failed(format!("constructor panicked: {}", panic_message(p.as_ref()))))?;

        let context = ModuleContext::new(
            name.clone(),
            base_path.clone(),
            self.config.module_url(&base_path),
            self.config.modules.config_for(&base_path),
            descriptor.payload_files(),
        );
        let module_id = context.module_id.clone();

        match catch_unwind(AssertUnwindSafe(|| module.init(&context))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(init_failed(e.to_string())),
            Err(p) => return Err(init_failed(format!("init panicked: {}", panic_message(p.as_ref())))),
        }

        let collected = catch_unwind(AssertUnwindSafe(|| {
            (
                module.paths_with_responders(),
                module.catchall(),
                module.available_commands(),
            )
        }));
        let (handlers, catchall, commands) = match collected {
            Ok(collected) => collected,
            Err(p) => {
                // init already ran, give the module a chance to clean up
                stop_rejected(&name, module.as_ref());
                return Err(init_failed(format!(
                    "handler registration panicked: {}",
                    panic_message(p.as_ref())
                )));
            }
        };

        let handlers = normalize_paths(&name, handlers);
        if handlers.is_empty() {
            stop_rejected(&name, module.as_ref());
            return Err(LoadError::NoHandlers(name));
        }

        let mut paths: Vec<String> = handlers.keys().cloned().collect();
        paths.sort();
        let info = ModuleInfo {
            module_id,
            name,
            base_path,
            source: descriptor.source.clone(),
            paths,
            has_catchall: catchall.is_some(),
        };
        Ok(ModuleRecord::new(
            Arc::from(module),
            handlers,
            catchall,
            commands,
            info,
            descriptor.clone(),
        ))
    }
}

/// Stop a module that initialised but was rejected afterwards
fn stop_rejected(name: &str, module: &dyn ServerModule) {
    match catch_unwind(AssertUnwindSafe(|| module.stop())) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Module {} failed to stop after being rejected: {}", name, e),
        Err(p) => error!(
            "Module {} panicked while stopping after being rejected: {}",
            name,
            panic_message(p.as_ref())
        ),
    }
}

/// Strip leading and trailing '/' from handler paths
///
/// If two declared paths collapse to the same key the first one (in sorted
/// order of the declared paths) is kept.
fn normalize_paths(name: &str, handlers: HashMap<String, Responder>) -> HashMap<String, Responder> {
    let mut declared: Vec<(String, Responder)> = handlers.into_iter().collect();
    declared.sort_by(|a, b| a.0.cmp(&b.0));

    let mut normalized = HashMap::with_capacity(declared.len());
    for (path, responder) in declared {
        let key = path.trim_matches('/').to_string();
        if normalized.contains_key(&key) {
            warn!("Module {} declares path '{}' twice, keeping the first", name, key);
            continue;
        }
        normalized.insert(key, responder);
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ModuleResponse;
    use crate::module::traits::{responder, ModuleError};

    struct Paths(Vec<&'static str>);

    impl ServerModule for Paths {
        fn init(&mut self, _context: &ModuleContext) -> Result<(), ModuleError> {
            Ok(())
        }

        fn paths_with_responders(&self) -> HashMap<String, Responder> {
            self.0
                .iter()
                .map(|p| (p.to_string(), responder(|_| Ok(ModuleResponse::text("ok")))))
                .collect()
        }

        fn stop(&self) -> Result<(), ModuleError> {
            Ok(())
        }
    }

    #[test]
    fn test_paths_are_normalized() {
        let composer = Composer::new(Arc::new(HostConfig::default()));
        let descriptor = ModuleDescriptor::builtin("P", "P", || Box::new(Paths(vec!["/a/", "b", ""])));
        let record = composer.instantiate(&descriptor).unwrap();
        assert_eq!(record.info().paths, vec!["", "a", "b"]);
        assert!(record.handler("a").is_some());
        assert!(record.handler("/a/").is_none());
    }

    #[test]
    fn test_colliding_paths_keep_one() {
        let composer = Composer::new(Arc::new(HostConfig::default()));
        let descriptor = ModuleDescriptor::builtin("P", "P", || Box::new(Paths(vec!["x", "/x"])));
        let record = composer.instantiate(&descriptor).unwrap();
        assert_eq!(record.info().paths, vec!["x"]);
    }

    #[test]
    fn test_context_gets_public_url_and_config() {
        struct Capture;
        impl ServerModule for Capture {
            fn init(&mut self, context: &ModuleContext) -> Result<(), ModuleError> {
                if context.public_url != "http://localhost:50001/Cap/" {
                    return Err(ModuleError::InvalidConfig(context.public_url.clone()));
                }
                if context.get_config("k").map(|s| s.as_str()) != Some("v") {
                    return Err(ModuleError::InvalidConfig("missing k".into()));
                }
                Ok(())
            }
            fn paths_with_responders(&self) -> HashMap<String, Responder> {
                HashMap::from([(String::new(), responder(|_| Ok(ModuleResponse::text("ok"))))])
            }
            fn stop(&self) -> Result<(), ModuleError> {
                Ok(())
            }
        }

        let mut config = HostConfig::default();
        config
            .modules
            .module_configs
            .insert("Cap".to_string(), HashMap::from([("k".to_string(), "v".to_string())]));
        let composer = Composer::new(Arc::new(config));
        let record = composer
            .instantiate(&ModuleDescriptor::builtin("Capture", "Cap", || Box::new(Capture)))
            .unwrap();
        assert_eq!(record.base_path(), "Cap");
    }

    #[test]
    fn test_rejected_module_is_stopped_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static STOPS: AtomicUsize = AtomicUsize::new(0);
        struct Pathless;
        impl ServerModule for Pathless {
            fn init(&mut self, _context: &ModuleContext) -> Result<(), ModuleError> {
                Ok(())
            }
            fn paths_with_responders(&self) -> HashMap<String, Responder> {
                HashMap::new()
            }
            fn stop(&self) -> Result<(), ModuleError> {
                STOPS.fetch_add(1, Ordering::SeqCst);
                Err(ModuleError::OperationError("socket already closed".into()))
            }
        }

        let composer = Composer::new(Arc::new(HostConfig::default()));
        let err = composer
            .instantiate(&ModuleDescriptor::builtin("Pathless", "None", || Box::new(Pathless)))
            .unwrap_err();
        assert!(matches!(err, LoadError::NoHandlers(ref name) if name == "Pathless"));
        assert_eq!(STOPS.load(Ordering::SeqCst), 1);
    }
}
