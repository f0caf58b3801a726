//! The man-in-the-middle HTTP/HTTPS forward proxy.
//!
//! Built directly on `hyper` rather than through `axum::Router`: `CONNECT`
//! requests carry an authority-form target (`host:port`), not a routable
//! path, and must be inspected before any router dispatch. Both branches
//! (`CONNECT` tunnel, plain-HTTP forward) live in the same
//! `hyper::service::Service`, dispatched on `req.method()`.

mod body;
mod connect;
mod forward;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::WrapError;
use crate::events::Event;

pub type ProxyBody = http_body_util::combinators::BoxBody<Bytes, Infallible>;

pub fn full_body(bytes: Vec<u8>) -> ProxyBody {
    Full::new(Bytes::from(bytes))
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> ProxyBody {
    full_body(Vec::new())
}

/// Per-connection configuration, cheap to clone into every spawned task.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub session_id: String,
    pub include_all: bool,
    pub max_body_size: usize,
}

#[derive(Clone)]
pub(crate) struct SharedState {
    config: Arc<ProxyConfig>,
    client: reqwest::Client,
    events: tokio::sync::mpsc::Sender<Event>,
}

/// A running proxy listener. Dropping this does not stop the proxy — call
/// `stop()` to close the listener and drain in flight requests.
pub struct ProxyHandle {
    pub host: String,
    pub port: u16,
    cancel: CancellationToken,
    accept_task: tokio::task::JoinHandle<()>,
}

impl ProxyHandle {
    /// Close the listener and wait (up to a 5s grace period) for in-flight
    /// connections to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.accept_task).await;
    }

    /// Environment variables to inject into the wrapped binary so its
    /// network calls traverse this proxy.
    pub fn env(&self) -> Vec<(String, String)> {
        let url = format!("http://{}:{}", self.host, self.port);
        vec![
            ("HTTP_PROXY".to_string(), url.clone()),
            ("HTTPS_PROXY".to_string(), url.clone()),
            ("http_proxy".to_string(), url.clone()),
            ("https_proxy".to_string(), url),
        ]
    }
}

/// Start the proxy listener on `host:port` (port 0 lets the OS choose).
pub async fn start(
    host: &str,
    port: u16,
    config: ProxyConfig,
    events: tokio::sync::mpsc::Sender<Event>,
) -> Result<ProxyHandle, WrapError> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| WrapError::Configuration(format!("invalid bind address: {e}")))?;

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            WrapError::PortInUse(port)
        } else {
            WrapError::Io(e)
        }
    })?;
    let bound = listener.local_addr().map_err(WrapError::Io)?;

    let client = reqwest::Client::builder()
        // Some provider auth schemes behave unpredictably over an
        // ALPN-negotiated HTTP/2 connection through a forward proxy.
        .http1_only()
        .build()
        .map_err(|e| WrapError::Configuration(format!("could not build HTTP client: {e}")))?;

    let state = SharedState {
        config: Arc::new(config),
        client,
        events,
    };

    let cancel = CancellationToken::new();
    let accept_cancel = cancel.clone();

    let accept_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = accept_cancel.cancelled() => break,
                accepted = listener.accept() => {
                    let Ok((stream, _peer)) = accepted else { continue };
                    let io = TokioIo::new(stream);
                    let state = state.clone();
                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let state = state.clone();
                            async move { route(req, state).await }
                        });
                        if let Err(e) = http1::Builder::new()
                            .serve_connection(io, service)
                            .with_upgrades()
                            .await
                        {
                            tracing::debug!(error = %e, "proxy connection closed with error");
                        }
                    });
                }
            }
        }
    });

    Ok(ProxyHandle {
        host: bound.ip().to_string(),
        port: bound.port(),
        cancel,
        accept_task,
    })
}

async fn route(
    req: Request<Incoming>,
    state: SharedState,
) -> Result<Response<ProxyBody>, hyper::Error> {
    if req.method() == Method::CONNECT {
        connect::handle_connect(req, state).await
    } else {
        forward::handle_forward(req, state).await
    }
}
