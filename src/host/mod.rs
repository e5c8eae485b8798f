//! Host lifecycle coordination
//!
//! `Idle -> Loading -> Serving -> Stopping -> Stopped`. Loading with zero
//! usable modules, or failing to bind, goes straight to `Stopped`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::HostConfig;
use crate::http::{Dispatcher, HttpServer};
use crate::module::manager::{ModuleManager, StopReport};
use crate::module::registry::{Composer, CompositionReport, ModuleDescriptor, ModuleDiscovery};
use crate::prompt::SecretPrompt;

/// Host lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Idle,
    Loading,
    Serving,
    Stopping,
    Stopped,
}

/// Host-fatal errors
#[derive(Debug, Error)]
pub enum HostError {
    #[error("no module could be loaded ({failed} failed)")]
    NoModulesLoaded { failed: usize },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("host task failed: {0}")]
    Task(String),
}

/// A host that has not started yet
pub struct Host {
    config: Arc<HostConfig>,
    builtins: Vec<ModuleDescriptor>,
    manager: Arc<ModuleManager>,
    state: watch::Sender<HostState>,
}

impl Host {
    pub fn new(config: HostConfig) -> Self {
        Self::with_config(Arc::new(config))
    }

    pub fn with_config(config: Arc<HostConfig>) -> Self {
        let (state, _) = watch::channel(HostState::Idle);
        Self {
            manager: Arc::new(ModuleManager::new(Arc::clone(&config))),
            config,
            builtins: Vec::new(),
            state,
        }
    }

    /// Register a module compiled into the host; builtins load first
    pub fn register_builtin(&mut self, descriptor: ModuleDescriptor) {
        self.builtins.push(descriptor);
    }

    pub fn state(&self) -> HostState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<HostState> {
        self.state.subscribe()
    }

    pub fn manager(&self) -> Arc<ModuleManager> {
        Arc::clone(&self.manager)
    }

    fn set_state(&self, state: HostState) {
        info!("Host state: {:?}", state);
        self.state.send_replace(state);
    }

    /// Discover, unlock and compose modules, then install them
    async fn load(&self, prompt: Box<dyn SecretPrompt>) -> Result<CompositionReport, HostError> {
        self.set_state(HostState::Loading);
        let config = Arc::clone(&self.config);
        let builtins = self.builtins.clone();

        let composition = tokio::task::spawn_blocking(move || {
            let mut prompt = prompt;
            let discovered = ModuleDiscovery::new(Arc::clone(&config)).discover(prompt.as_mut());
            let mut descriptors = builtins;
            descriptors.extend(discovered.descriptors);
            Composer::new(config).compose(descriptors, discovered.failures)
        })
        .await
        .map_err(|e| {
            self.set_state(HostState::Stopped);
            HostError::Task(e.to_string())
        })?;

        let report = composition.report;
        if report.succeeded == 0 {
            error!("No module could be loaded ({} failed)", report.failed);
            self.set_state(HostState::Stopped);
            return Err(HostError::NoModulesLoaded {
                failed: report.failed,
            });
        }
        self.manager.install(composition.records).await;
        Ok(report)
    }

    /// Load modules and start serving
    pub async fn start(self, prompt: Box<dyn SecretPrompt>) -> Result<ServingHost, HostError> {
        let report = self.load(prompt).await?;

        let addr = self.config.listen_addr();
        let dispatcher = Dispatcher::new(self.manager.routes());
        let server = match HttpServer::bind(addr, dispatcher).await {
            Ok(server) => server,
            Err(source) => {
                error!("Failed to bind {}: {}", addr, source);
                self.set_state(HostState::Stopping);
                self.manager
                    .stop_all(self.config.shutdown.module_stop_timeout())
                    .await;
                self.set_state(HostState::Stopped);
                return Err(HostError::Bind { addr, source });
            }
        };
        let local_addr = server.local_addr().unwrap_or(addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server_task = tokio::spawn(server.serve(shutdown_rx));
        self.set_state(HostState::Serving);
        info!("Serving {} modules on {}", report.succeeded, local_addr);

        Ok(ServingHost {
            config: self.config,
            manager: self.manager,
            state: self.state,
            local_addr,
            shutdown_tx,
            server_task,
            report,
        })
    }

    /// Start, serve until `shutdown` resolves, then stop
    pub async fn run<F>(self, prompt: Box<dyn SecretPrompt>, shutdown: F) -> Result<StopReport, HostError>
    where
        F: Future<Output = ()>,
    {
        let serving = self.start(prompt).await?;
        shutdown.await;
        Ok(serving.shutdown().await)
    }
}

/// A host that is serving requests
pub struct ServingHost {
    config: Arc<HostConfig>,
    manager: Arc<ModuleManager>,
    state: watch::Sender<HostState>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    server_task: JoinHandle<()>,
    report: CompositionReport,
}

impl ServingHost {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn manager(&self) -> Arc<ModuleManager> {
        Arc::clone(&self.manager)
    }

    pub fn state(&self) -> HostState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<HostState> {
        self.state.subscribe()
    }

    /// Result of module composition at startup
    pub fn report(&self) -> &CompositionReport {
        &self.report
    }

    /// Stop accepting connections, then stop every module
    ///
    /// Waits at most the configured stop timeout for modules; stragglers are
    /// logged and reported.
    pub async fn shutdown(self) -> StopReport {
        info!("Shutting down host");
        self.state.send_replace(HostState::Stopping);
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.server_task.await {
            warn!("HTTP server task ended abnormally: {}", e);
        }

        let report = self
            .manager
            .stop_all(self.config.shutdown.module_stop_timeout())
            .await;
        self.state.send_replace(HostState::Stopped);
        info!("Host stopped");
        report
    }
}
