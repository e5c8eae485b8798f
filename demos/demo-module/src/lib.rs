//! Demo server module
//!
//! Serves a greeting page, a hit counter and the names of the payload files
//! shipped with its package under `/Demo/`. Build it as a `cdylib` and drop
//! the library (or a package made with `modhost-pack`) into the modules dir.

use http::StatusCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

use modhost::http::HandlerError;
use modhost::{
    responder, ModuleCommand, ModuleContext, ModuleError, ModuleResponse, Responder, ServerModule,
};

#[derive(Default)]
struct DemoState {
    greeting: String,
    public_url: String,
    payload_names: Vec<String>,
}

#[derive(Default)]
pub struct DemoServer {
    state: Arc<Mutex<DemoState>>,
    hits: Arc<AtomicU64>,
}

impl ServerModule for DemoServer {
    fn init(&mut self, context: &ModuleContext) -> Result<(), ModuleError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ModuleError::InitializationError("state poisoned".to_string()))?;
        state.greeting = context.get_config_or("greeting", "Hello from the demo module");
        state.public_url = context.public_url.clone();
        state.payload_names = context.payload_names().map(str::to_string).collect();
        info!("Demo module {} ready at {}", context.module_id, context.public_url);
        Ok(())
    }

    fn paths_with_responders(&self) -> HashMap<String, Responder> {
        let mut paths = HashMap::new();

        let state = Arc::clone(&self.state);
        let hits = Arc::clone(&self.hits);
        paths.insert(
            String::new(),
            responder(move |request| {
                hits.fetch_add(1, Ordering::Relaxed);
                let state = state
                    .lock()
                    .map_err(|_| HandlerError::new("state poisoned"))?;
                let name = request.query_param("name").unwrap_or_else(|| "stranger".to_string());
                Ok(ModuleResponse::html(format!(
                    "<h1>{}, {}!</h1><p>Served from {}</p>",
                    state.greeting, name, state.public_url
                )))
            }),
        );

        let hits = Arc::clone(&self.hits);
        paths.insert(
            "count".to_string(),
            responder(move |_| Ok(ModuleResponse::text(hits.load(Ordering::Relaxed).to_string()))),
        );

        let state = Arc::clone(&self.state);
        paths.insert(
            "payloads".to_string(),
            responder(move |_| {
                let state = state
                    .lock()
                    .map_err(|_| HandlerError::new("state poisoned"))?;
                Ok(ModuleResponse::text(state.payload_names.join("\n")))
            }),
        );

        paths.insert(
            "fail".to_string(),
            responder(|_| {
                Err(HandlerError::with_status(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "the demo failure page",
                ))
            }),
        );

        paths
    }

    fn catchall(&self) -> Option<Responder> {
        Some(responder(|request| {
            Ok(ModuleResponse::html(format!(
                "<p>No page at {}, try the index.</p>",
                request.path()
            ))
            .with_status(StatusCode::NOT_FOUND))
        }))
    }

    fn error_page(&self, status: StatusCode, message: &str) -> Option<String> {
        Some(format!(
            "<html><body><h1>Demo error {}</h1><p>{}</p></body></html>",
            status.as_u16(),
            modhost::http::escape_html(message)
        ))
    }

    fn stop(&self) -> Result<(), ModuleError> {
        info!(
            "Demo module stopping after {} hits",
            self.hits.load(Ordering::Relaxed)
        );
        Ok(())
    }

    fn available_commands(&self) -> Vec<ModuleCommand> {
        let hits = Arc::clone(&self.hits);
        let reset = ModuleCommand::new("reset", "Reset the hit counter", move |_| {
            hits.store(0, Ordering::Relaxed);
            Ok(())
        });
        let hits = Arc::clone(&self.hits);
        let show = ModuleCommand::new("hits", "Print the hit counter", move |_| {
            println!("{}", hits.load(Ordering::Relaxed));
            Ok(())
        });
        vec![reset, show]
    }
}

modhost::declare_module!("DemoServer", "Demo", DemoServer::default());
