//! Request and response types handed to module handlers
//!
//! Handlers see a fully buffered request and return a fully buffered
//! response; the server owns the connection and always finishes the response.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, Method, StatusCode, Uri};
use std::net::SocketAddr;
use thiserror::Error;

/// An incoming request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub remote_addr: Option<SocketAddr>,
}

impl HttpRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: None,
        }
    }

    /// GET request for a path (and optional query); unparsable input maps to "/"
    pub fn get(path_and_query: &str) -> Self {
        let uri = path_and_query.parse().unwrap_or_else(|_| Uri::from_static("/"));
        Self::new(Method::GET, uri)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Query string split into key/value pairs (no percent-decoding)
    ///
    /// A key without `=` gets an empty value.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query()
            .map(|q| {
                q.split('&')
                    .filter(|part| !part.is_empty())
                    .map(|part| match part.split_once('=') {
                        Some((k, v)) => (k.to_string(), v.to_string()),
                        None => (part.to_string(), String::new()),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn query_param(&self, key: &str) -> Option<String> {
        self.query_pairs()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.headers.get(USER_AGENT).and_then(|v| v.to_str().ok())
    }

    /// Body as text, lossy for invalid UTF-8
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A response produced by a handler or by the host's fallbacks
#[derive(Debug, Clone)]
pub struct ModuleResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ModuleResponse {
    /// 200 with an HTML body
    pub fn html(body: impl Into<String>) -> Self {
        Self::with_content_type(body.into(), "text/html; charset=utf-8")
    }

    /// 200 with a plain text body
    pub fn text(body: impl Into<String>) -> Self {
        Self::with_content_type(body.into(), "text/plain; charset=utf-8")
    }

    /// 200 with raw bytes
    pub fn bytes(body: impl Into<Bytes>, content_type: &'static str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self {
            status: StatusCode::OK,
            headers,
            body: body.into(),
        }
    }

    fn with_content_type(body: String, content_type: &'static str) -> Self {
        Self::bytes(Bytes::from(body), content_type)
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl From<String> for ModuleResponse {
    fn from(body: String) -> Self {
        Self::html(body)
    }
}

impl From<&str> for ModuleResponse {
    fn from(body: &str) -> Self {
        Self::html(body)
    }
}

/// Error returned by a request handler
///
/// The message ends up on the error page sent to the client.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Message(String),

    #[error("{status}: {message}")]
    Status { status: StatusCode, message: String },
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError::Message(message.into())
    }

    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        HandlerError::Status {
            status,
            message: message.into(),
        }
    }

    /// Status for the error page (500 unless the handler chose one)
    pub fn status(&self) -> StatusCode {
        match self {
            HandlerError::Message(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HandlerError::Status { status, .. } => *status,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            HandlerError::Message(message) => message,
            HandlerError::Status { message, .. } => message,
        }
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(e: std::io::Error) -> Self {
        HandlerError::Message(e.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::Message(message)
    }
}
