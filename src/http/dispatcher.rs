//! Request dispatch
//!
//! The base path of a request is everything between the leading '/' and the
//! last '/' of the URL path (the whole path if it has no further '/'). The
//! rest, without surrounding '/', is the subpath looked up in the module's
//! handlers. Lookup order: exact handler, catchall, module error page (404),
//! host error page (404).

use http::StatusCode;
use std::sync::Arc;
use tracing::{debug, warn};

use super::errors::{default_error_page, error_response};
use super::types::{HttpRequest, ModuleResponse};
use crate::module::manager::RouteTableHandle;
use crate::module::registry::{ModuleRecord, RouteTable};
use crate::module::traits::Responder;
use crate::utils::error::panic_message;

/// Split a URL path into base path and subpath
///
/// `/Demo/` and `/Demo` give `("Demo", "")`, `/Demo/x` gives `("Demo", "x")`,
/// `/a/b/c` gives `("a/b", "c")`.
pub fn split_path(path: &str) -> (&str, &str) {
    let trimmed = path.trim_start_matches('/');
    match trimmed.rfind('/') {
        Some(n) if n > 0 => (&trimmed[..n], trimmed[n..].trim_matches('/')),
        _ => (trimmed.trim_end_matches('/'), ""),
    }
}

/// Where a request goes
#[derive(Clone)]
pub enum Route {
    Handler {
        record: Arc<ModuleRecord>,
        responder: Responder,
    },
    Catchall {
        record: Arc<ModuleRecord>,
        responder: Responder,
    },
    /// Module found, nothing handles the subpath
    NotFound { record: Arc<ModuleRecord> },
    /// No module serves the base path
    NoModule,
}

impl Route {
    pub fn base_path(&self) -> Option<&str> {
        match self {
            Route::Handler { record, .. }
            | Route::Catchall { record, .. }
            | Route::NotFound { record } => Some(record.base_path()),
            Route::NoModule => None,
        }
    }

    pub fn is_handler(&self) -> bool {
        matches!(self, Route::Handler { .. })
    }

    pub fn is_catchall(&self) -> bool {
        matches!(self, Route::Catchall { .. })
    }
}

/// Resolve a URL path against a route table
pub fn resolve(table: &RouteTable, path: &str) -> Route {
    let (base, subpath) = split_path(path);
    let Some(record) = table.get(base) else {
        return Route::NoModule;
    };
    let record = Arc::clone(record);
    if let Some(responder) = record.handler(subpath) {
        return Route::Handler { record, responder };
    }
    if let Some(responder) = record.catchall() {
        return Route::Catchall { record, responder };
    }
    Route::NotFound { record }
}

/// A handler call in flight
///
/// The responder is dropped before the record, which keeps the module's
/// library loaded.
struct Invocation {
    responder: Responder,
    _record: Arc<ModuleRecord>,
}

/// Routes requests to module handlers
#[derive(Clone)]
pub struct Dispatcher {
    routes: RouteTableHandle,
}

impl Dispatcher {
    pub fn new(routes: RouteTableHandle) -> Self {
        Self { routes }
    }

    pub fn route(&self, path: &str) -> Route {
        resolve(&self.routes.current(), path)
    }

    /// Produce the response for a request
    ///
    /// Never fails: handler errors and panics become error pages.
    pub async fn dispatch(&self, request: HttpRequest) -> ModuleResponse {
        let route = self.route(request.path());
        let (record, responder) = match route {
            Route::Handler { record, responder } | Route::Catchall { record, responder } => {
                (record, responder)
            }
            Route::NotFound { record } => {
                debug!(
                    "{} {} -> 404 (no handler in {})",
                    request.method,
                    request.path(),
                    record.base_path()
                );
                let page = record.render_error_page(StatusCode::NOT_FOUND, "");
                return error_response(StatusCode::NOT_FOUND, page);
            }
            Route::NoModule => {
                debug!("{} {} -> 404 (no module)", request.method, request.path());
                return error_response(
                    StatusCode::NOT_FOUND,
                    default_error_page(StatusCode::NOT_FOUND, ""),
                );
            }
        };

        let method = request.method.clone();
        let path = request.path().to_string();
        let invocation = Invocation {
            responder,
            _record: Arc::clone(&record),
        };
        let outcome = tokio::task::spawn_blocking(move || {
            let invocation = invocation;
            (invocation.responder)(&request)
        })
        .await;

        let (status, message) = match outcome {
            Ok(Ok(response)) => return response,
            Ok(Err(e)) => (e.status(), e.message().to_string()),
            Err(e) if e.is_panic() => (
                StatusCode::INTERNAL_SERVER_ERROR,
                panic_message(e.into_panic().as_ref()),
            ),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        warn!(
            "{} {} -> {} in module {}: {}",
            method,
            path,
            status.as_u16(),
            record.name(),
            message
        );
        error_response(status, record.render_error_page(status, &message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("/Demo/"), ("Demo", ""));
        assert_eq!(split_path("/Demo"), ("Demo", ""));
        assert_eq!(split_path("/Demo/x"), ("Demo", "x"));
        assert_eq!(split_path("/Unknown/x"), ("Unknown", "x"));
        assert_eq!(split_path("/a/b/c"), ("a/b", "c"));
        assert_eq!(split_path("/Demo/x/"), ("Demo/x", ""));
        assert_eq!(split_path("/"), ("", ""));
        assert_eq!(split_path(""), ("", ""));
        assert_eq!(split_path("//Demo/x"), ("Demo", "x"));
    }
}
