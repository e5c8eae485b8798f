//! Shared fixtures for integration tests
#![allow(dead_code)]

use http::StatusCode;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use modhost::{
    responder, HandlerError, HostConfig, ModuleCommand, ModuleContext, ModuleDescriptor,
    ModuleError, ModuleResponse, Responder, ServerModule,
};

/// Config bound to an ephemeral localhost port with modules under `dir`
pub fn test_config(dir: &Path) -> HostConfig {
    let mut config = HostConfig::default();
    config.listen.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.listen.port = 0;
    config.modules.modules_dir = dir.join("modules").display().to_string();
    config.modules.unpack_dir = Some(dir.join("unpack").display().to_string());
    config.shutdown.module_stop_timeout_secs = 2;
    config
}

/// Counters shared between a test and the module instances it creates
#[derive(Debug, Default)]
pub struct Probe {
    pub inits: AtomicUsize,
    pub stops: AtomicUsize,
    pub commands: AtomicUsize,
    /// Initialised instances that have been dropped
    pub drops: AtomicUsize,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }

    pub fn drops(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }
}

/// Counts a drop of the instance that owns it
pub struct DropCounter(Arc<Probe>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Configurable in-process module
#[derive(Clone)]
pub struct StubModule {
    pub probe: Arc<Probe>,
    pub paths: Vec<&'static str>,
    pub with_catchall: bool,
    pub with_error_page: bool,
    pub fail_init: bool,
    pub fail_stop: bool,
    pub stop_delay: Option<Duration>,
    pub command_delay: Option<Duration>,
    pub greeting: Arc<std::sync::Mutex<String>>,
    alive: Option<Arc<DropCounter>>,
}

impl StubModule {
    pub fn new(probe: Arc<Probe>) -> Self {
        Self {
            probe,
            paths: vec!["", "hello"],
            with_catchall: false,
            with_error_page: false,
            fail_init: false,
            fail_stop: false,
            stop_delay: None,
            command_delay: None,
            greeting: Arc::new(std::sync::Mutex::new(String::new())),
            alive: None,
        }
    }

    pub fn descriptor(self, name: &str, base_path: &str) -> ModuleDescriptor {
        ModuleDescriptor::builtin(name, base_path, move || Box::new(self.clone()))
    }
}

impl ServerModule for StubModule {
    fn init(&mut self, context: &ModuleContext) -> Result<(), ModuleError> {
        self.probe.inits.fetch_add(1, Ordering::SeqCst);
        self.alive = Some(Arc::new(DropCounter(Arc::clone(&self.probe))));
        if self.fail_init {
            return Err(ModuleError::InitializationError("refusing to start".to_string()));
        }
        if let Ok(mut greeting) = self.greeting.lock() {
            *greeting = context.get_config_or("greeting", "hello");
        }
        Ok(())
    }

    fn paths_with_responders(&self) -> HashMap<String, Responder> {
        let mut handlers = HashMap::new();
        for path in &self.paths {
            let path = path.to_string();
            let label = path.clone();
            let greeting = Arc::clone(&self.greeting);
            let handler = match path.as_str() {
                "boom" => responder(|_| panic!("handler exploded")),
                "broken" => responder(|_| Err(HandlerError::new("database unavailable"))),
                "teapot" => responder(|_| {
                    Err(HandlerError::with_status(StatusCode::IM_A_TEAPOT, "short and stout"))
                }),
                "slow" => responder(|_| {
                    std::thread::sleep(Duration::from_millis(300));
                    Ok(ModuleResponse::text("finally"))
                }),
                "echo" => responder(|request| {
                    Ok(ModuleResponse::text(format!(
                        "{} {}",
                        request.query_param("q").unwrap_or_default(),
                        request.body_text()
                    )))
                }),
                _ => responder(move |_| {
                    let greeting = greeting.lock().map(|g| g.clone()).unwrap_or_default();
                    Ok(ModuleResponse::text(format!("{} from '{}'", greeting, label)))
                }),
            };
            handlers.insert(path, handler);
        }
        handlers
    }

    fn catchall(&self) -> Option<Responder> {
        self.with_catchall.then(|| {
            responder(|request| Ok(ModuleResponse::text(format!("catchall {}", request.path()))))
        })
    }

    fn error_page(&self, status: StatusCode, message: &str) -> Option<String> {
        self.with_error_page
            .then(|| format!("stub error {} [{}]", status.as_u16(), message))
    }

    fn stop(&self) -> Result<(), ModuleError> {
        if let Some(delay) = self.stop_delay {
            std::thread::sleep(delay);
        }
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            return Err(ModuleError::OperationError("stop failed".to_string()));
        }
        Ok(())
    }

    fn available_commands(&self) -> Vec<ModuleCommand> {
        let probe = Arc::clone(&self.probe);
        let delay = self.command_delay;
        vec![
            ModuleCommand::new("Bump Counter", "Count a command call", move |args| {
                if let Some(delay) = delay {
                    std::thread::sleep(delay);
                }
                probe.commands.fetch_add(1 + args.len(), Ordering::SeqCst);
                Ok(())
            }),
            ModuleCommand::new("  ", "blank verbs are not registered", |_| Ok(())),
        ]
    }
}

/// Send one HTTP/1.1 request and return (status, body)
pub async fn http_request(addr: SocketAddr, method: &str, target: &str, body: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "{} {} HTTP/1.1\r\nHost: localhost\r\nUser-Agent: modhost-tests\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        method,
        target,
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let raw = String::from_utf8_lossy(&raw).into_owned();

    let status = raw
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    let body = raw
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    (status, body)
}

pub async fn http_get(addr: SocketAddr, target: &str) -> (u16, String) {
    http_request(addr, "GET", target, "").await
}
