//! HTTP/1.1 listener
//!
//! Accepts connections until the shutdown signal flips, serving each one on
//! its own task. Every request gets exactly one complete response.

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::dispatcher::Dispatcher;
use super::errors::{default_error_page, error_response};
use super::types::{HttpRequest, ModuleResponse};

/// HTTP server
pub struct HttpServer {
    listener: TcpListener,
    dispatcher: Dispatcher,
}

impl HttpServer {
    /// Bind the listener
    pub async fn bind(addr: SocketAddr, dispatcher: Dispatcher) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            dispatcher,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` becomes true (or its sender is gone)
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        match self.local_addr() {
            Ok(addr) => info!("HTTP server listening on {}", addr),
            Err(_) => info!("HTTP server listening"),
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("New connection from {}", peer);
                        tokio::spawn(serve_connection(
                            stream,
                            peer,
                            self.dispatcher.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("HTTP server stopped accepting connections");
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    mut shutdown: watch::Receiver<bool>,
) {
    let service = service_fn(move |request| {
        let dispatcher = dispatcher.clone();
        async move { Ok::<_, Infallible>(handle_request(dispatcher, request, peer).await) }
    });
    let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    tokio::select! {
        result = connection.as_mut() => {
            if let Err(e) = result {
                debug!("Connection from {} ended with error: {}", peer, e);
            }
        }
        _ = shutdown.changed() => {
            connection.as_mut().graceful_shutdown();
            if let Err(e) = connection.await {
                debug!("Connection from {} ended during shutdown: {}", peer, e);
            }
        }
    }
}

async fn handle_request(
    dispatcher: Dispatcher,
    request: Request<Incoming>,
    peer: SocketAddr,
) -> Response<Full<Bytes>> {
    let (parts, body) = request.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Failed to read request body from {}: {}", peer, e);
            return into_response(error_response(
                StatusCode::BAD_REQUEST,
                default_error_page(StatusCode::BAD_REQUEST, "could not read request body"),
            ));
        }
    };

    let request = HttpRequest {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body,
        remote_addr: Some(peer),
    };
    into_response(dispatcher.dispatch(request).await)
}

fn into_response(response: ModuleResponse) -> Response<Full<Bytes>> {
    let mut out = Response::new(Full::new(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = response.headers;
    out
}
