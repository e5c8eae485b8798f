//! HTTP front end
//!
//! Converts wire requests into [`HttpRequest`]s, routes them to module
//! handlers and renders fallbacks.

pub mod dispatcher;
pub mod errors;
pub mod server;
pub mod types;

pub use dispatcher::{resolve, split_path, Dispatcher, Route};
pub use errors::{default_error_page, error_response, escape_html};
pub use server::HttpServer;
pub use types::{HandlerError, HttpRequest, ModuleResponse};
