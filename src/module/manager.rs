//! Module manager for orchestrating all loaded modules
//!
//! Owns the arena of loaded modules, publishes the route table built from it,
//! and handles runtime unloading/restarting, operator commands and the stop
//! fan-out at shutdown.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::HostConfig;
use crate::module::commands::{CommandRegistry, RegisteredCommand};
use crate::module::registry::{Composer, ModuleRecord, RouteTable};
use crate::module::traits::{LoadError, ModuleError, ModuleInfo, ModuleState};
use crate::utils::timeout::with_custom_timeout;

/// Read side of the published route table
#[derive(Clone)]
pub struct RouteTableHandle {
    rx: watch::Receiver<Arc<RouteTable>>,
}

impl RouteTableHandle {
    /// Snapshot of the current table
    pub fn current(&self) -> Arc<RouteTable> {
        Arc::clone(&self.rx.borrow())
    }
}

/// Outcome of stopping modules
#[derive(Debug, Default)]
pub struct StopReport {
    pub stopped: usize,
    /// Base path and error of modules whose `stop` failed
    pub failed: Vec<(String, String)>,
    /// Base paths of modules still stopping when the timeout expired
    pub timed_out: Vec<String>,
}

/// Managed module instance
struct ManagedModule {
    record: Arc<ModuleRecord>,
    state: ModuleState,
}

/// Module manager coordinates all loaded modules
pub struct ModuleManager {
    config: Arc<HostConfig>,
    composer: Composer,
    /// Active modules (base path -> module)
    modules: Mutex<BTreeMap<String, ManagedModule>>,
    commands: Mutex<CommandRegistry>,
    routes_tx: watch::Sender<Arc<RouteTable>>,
}

impl ModuleManager {
    pub fn new(config: Arc<HostConfig>) -> Self {
        let (routes_tx, _) = watch::channel(Arc::new(RouteTable::default()));
        Self {
            composer: Composer::new(Arc::clone(&config)),
            config,
            modules: Mutex::new(BTreeMap::new()),
            commands: Mutex::new(CommandRegistry::new()),
            routes_tx,
        }
    }

    /// Handle for readers of the route table
    pub fn routes(&self) -> RouteTableHandle {
        RouteTableHandle {
            rx: self.routes_tx.subscribe(),
        }
    }

    /// Add initialised modules and publish the new route table
    ///
    /// Returns how many were added. A record whose base path is already taken
    /// is stopped and dropped.
    pub async fn install(&self, records: Vec<ModuleRecord>) -> usize {
        let mut modules = self.modules.lock().await;
        let mut commands = self.commands.lock().await;
        let mut rejected = Vec::new();
        let mut added = 0;

        for record in records {
            let base = record.base_path().to_string();
            if modules.contains_key(&base) {
                warn!("Base path {} is already served, dropping module {}", base, record.name());
                rejected.push(Arc::new(record));
                continue;
            }
            let registered = commands.register_module(&base, record.commands());
            debug!("Registered {} commands for {}", registered, base);
            modules.insert(
                base,
                ManagedModule {
                    record: Arc::new(record),
                    state: ModuleState::Running,
                },
            );
            added += 1;
        }
        self.publish(&modules);
        drop(commands);
        drop(modules);

        for record in rejected {
            let _ = self.stop_record(record).await;
        }
        added
    }

    fn publish(&self, modules: &BTreeMap<String, ManagedModule>) {
        let table = RouteTable::new(
            modules
                .values()
                .filter(|m| m.state == ModuleState::Running)
                .map(|m| Arc::clone(&m.record)),
        );
        debug!("Publishing route table with {} modules", table.len());
        self.routes_tx.send_replace(Arc::new(table));
    }

    /// Info about every loaded module, sorted by base path
    pub async fn list_modules(&self) -> Vec<ModuleInfo> {
        let modules = self.modules.lock().await;
        modules.values().map(|m| m.record.info().clone()).collect()
    }

    pub async fn module_state(&self, base_path: &str) -> Option<ModuleState> {
        let modules = self.modules.lock().await;
        modules.get(base_path).map(|m| m.state)
    }

    /// Stop a module and remove it from the route table
    pub async fn unload_module(&self, base_path: &str) -> Result<(), LoadError> {
        info!("Unloading module at {}", base_path);
        let managed = {
            let mut modules = self.modules.lock().await;
            let managed = modules
                .remove(base_path)
                .ok_or_else(|| LoadError::NotFound(base_path.to_string()))?;
            self.publish(&modules);
            managed
        };
        self.commands.lock().await.unregister_module(base_path);

        if let Err(e) = self.stop_record(managed.record).await {
            warn!("Module at {} did not stop cleanly: {}", base_path, e);
        }
        info!("Module at {} unloaded", base_path);
        Ok(())
    }

    /// Stop a module, create a fresh instance from the same descriptor and
    /// publish it in place of the old one
    ///
    /// The restart runs as its own task; dropping the returned future does not
    /// interrupt it.
    pub async fn restart_module(self: &Arc<Self>, base_path: &str) -> Result<(), LoadError> {
        let manager = Arc::clone(self);
        let base = base_path.to_string();
        tokio::spawn(async move { manager.restart_in_place(&base).await })
            .await
            .map_err(|e| LoadError::InitFailed {
                name: base_path.to_string(),
                reason: format!("restart task failed: {}", e),
            })?
    }

    async fn restart_in_place(&self, base_path: &str) -> Result<(), LoadError> {
        info!("Restarting module at {}", base_path);
        let mut modules = self.modules.lock().await;
        let old = {
            let managed = modules
                .get_mut(base_path)
                .ok_or_else(|| LoadError::NotFound(base_path.to_string()))?;
            managed.state = ModuleState::Stopping;
            Arc::clone(&managed.record)
        };
        self.publish(&modules);
        self.commands.lock().await.unregister_module(base_path);

        let descriptor = old.descriptor().clone();
        if let Err(e) = self.stop_record(old).await {
            warn!("Module at {} did not stop cleanly: {}", base_path, e);
        }

        let config = Arc::clone(&self.config);
        let created = tokio::task::spawn_blocking(move || Composer::new(config).instantiate(&descriptor))
            .await
            .map_err(|e| LoadError::InitFailed {
                name: base_path.to_string(),
                reason: e.to_string(),
            })
            .and_then(|r| r);

        match created {
            Ok(record) => {
                let registered = self
                    .commands
                    .lock()
                    .await
                    .register_module(base_path, record.commands());
                debug!("Registered {} commands for {}", registered, base_path);
                modules.insert(
                    base_path.to_string(),
                    ManagedModule {
                        record: Arc::new(record),
                        state: ModuleState::Running,
                    },
                );
                self.publish(&modules);
                info!("Module at {} restarted", base_path);
                Ok(())
            }
            Err(e) => {
                error!("Failed to restart module at {}: {}", base_path, e);
                modules.remove(base_path);
                self.publish(&modules);
                Err(e)
            }
        }
    }

    /// Run one module's `stop` on the blocking pool, bounded by the
    /// configured stop timeout
    async fn stop_record(&self, record: Arc<ModuleRecord>) -> Result<(), ModuleError> {
        let base = record.base_path().to_string();
        let handle = tokio::task::spawn_blocking(move || record.stop());
        match with_custom_timeout(handle, self.config.shutdown.module_stop_timeout()).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ModuleError::OperationError(e.to_string())),
            Err(_) => Err(ModuleError::OperationError(format!(
                "stop of {} timed out",
                base
            ))),
        }
    }

    /// Stop every module exactly once, concurrently, and empty the arena
    ///
    /// Modules still stopping after `timeout` are logged and left behind.
    pub async fn stop_all(&self, timeout: Duration) -> StopReport {
        let drained: Vec<(String, ManagedModule)> = {
            let mut modules = self.modules.lock().await;
            let drained = std::mem::take(&mut *modules).into_iter().collect();
            self.publish(&modules);
            drained
        };
        *self.commands.lock().await = CommandRegistry::new();
        info!("Stopping {} modules", drained.len());

        let deadline = tokio::time::Instant::now() + timeout;
        let stops = drained.into_iter().map(|(base, managed)| {
            let record = managed.record;
            let name = record.name().to_string();
            let handle = tokio::task::spawn_blocking(move || record.stop());
            async move {
                let outcome = tokio::time::timeout_at(deadline, handle).await;
                (base, name, outcome)
            }
        });

        let mut report = StopReport::default();
        for (base, name, outcome) in join_all(stops).await {
            match outcome {
                Ok(Ok(Ok(()))) => {
                    debug!("Module {} stopped", name);
                    report.stopped += 1;
                }
                Ok(Ok(Err(e))) => {
                    error!("Module {} failed to stop: {}", name, e);
                    report.failed.push((base, e.to_string()));
                }
                Ok(Err(e)) => {
                    error!("Module {} stop task failed: {}", name, e);
                    report.failed.push((base, e.to_string()));
                }
                Err(_) => {
                    warn!("Module {} did not stop within {:?}", name, timeout);
                    report.timed_out.push(base);
                }
            }
        }
        info!(
            "Modules stopped: {} ok, {} failed, {} timed out",
            report.stopped,
            report.failed.len(),
            report.timed_out.len()
        );
        report
    }

    /// Registered command names, sorted
    pub async fn commands(&self) -> Vec<String> {
        self.commands.lock().await.names()
    }

    pub async fn command_help(&self, name: &str) -> Option<String> {
        self.commands.lock().await.help(name).map(|h| h.to_string())
    }

    /// Run a command on the blocking pool
    ///
    /// The module stays loaded until the action returns, even if the caller
    /// stops waiting or the module is unloaded meanwhile.
    pub async fn execute_command(&self, name: &str, args: Vec<String>) -> Result<(), ModuleError> {
        let not_found = || ModuleError::CommandNotFound(name.to_string());
        let command = self.commands.lock().await.get(name).ok_or_else(not_found)?;
        let record = self
            .modules
            .lock()
            .await
            .get(&command.base_path)
            .map(|m| Arc::clone(&m.record))
            .ok_or_else(not_found)?;

        let invocation = CommandInvocation {
            command,
            _record: record,
        };
        tokio::task::spawn_blocking(move || {
            let invocation = invocation;
            invocation.command.execute(&args)
        })
        .await
        .map_err(|e| ModuleError::OperationError(e.to_string()))?
    }
}

/// A command call in flight
///
/// The action is dropped before the record, which keeps the module's
/// library loaded.
struct CommandInvocation {
    command: RegisteredCommand,
    _record: Arc<ModuleRecord>,
}
