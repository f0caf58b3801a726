//! `CONNECT` tunnel handling: the proxy terminates only at the CONNECT
//! layer and tunnels bytes opaquely afterward — no TLS decryption.

use std::time::Instant;

use hyper::body::Incoming;
use hyper::upgrade::Upgraded;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use crate::error::WrapError;
use crate::events::{Event, EventBody, Source};
use crate::provider;
use crate::util::random_hex_suffix;

use super::{full_body, ProxyBody, SharedState};

/// Handle a `CONNECT host:port` request: dial the target up front (so the
/// connect outcome is known before responding), then hand the connection
/// off to an upgraded byte pump once hyper completes the 101-equivalent
/// upgrade handshake.
pub async fn handle_connect(
    req: Request<Incoming>,
    state: SharedState,
) -> Result<Response<ProxyBody>, hyper::Error> {
    let Some(authority) = req.uri().authority().map(|a| a.to_string()) else {
        return Ok(bad_request("CONNECT request missing authority"));
    };
    let (host, port) = split_authority(&authority);
    let request_id = format!("connect-{}", random_hex_suffix(8));
    let detected_provider = provider::detect(&host);

    if let Err(e) = state.events.try_send(Event::new(
        state.config.session_id.clone(),
        Source::Proxy,
        EventBody::HttpsConnectStart {
            request_id: request_id.clone(),
            host: host.clone(),
            port,
            detected_provider,
        },
    )) {
        tracing::warn!(request_id = %request_id, error = %e, "dropping https_connect_start: aggregator channel full or closed");
    }

    let start = Instant::now();
    let target = format!("{host}:{port}");
    let server_stream = match TcpStream::connect(&target).await {
        Ok(stream) => stream,
        Err(e) => {
            let err = WrapError::UpstreamNetwork(e.to_string());
            tracing::warn!(target = %target, error = %err, "CONNECT dial failed");
            let request_id_for_log = request_id.clone();
            if let Err(e) = state.events.try_send(Event::new(
                state.config.session_id.clone(),
                Source::Proxy,
                EventBody::HttpsConnectComplete {
                    request_id,
                    host,
                    port,
                    detected_provider,
                    duration_ms: start.elapsed().as_millis() as u64,
                    status: 502,
                },
            )) {
                tracing::warn!(request_id = %request_id_for_log, error = %e, "dropping https_connect_complete: aggregator channel full or closed");
            }
            return Ok(bad_gateway("upstream connect failed"));
        }
    };

    let events = state.events.clone();
    let session_id = state.config.session_id.clone();
    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                if let Err(e) = pump(upgraded, server_stream).await {
                    tracing::warn!(target = %target, error = %e, "tunnel closed with error");
                }
            }
            Err(e) => tracing::warn!(error = %e, "CONNECT upgrade failed"),
        }
        let request_id_for_log = request_id.clone();
        if let Err(e) = events.try_send(Event::new(
            session_id,
            Source::Proxy,
            EventBody::HttpsConnectComplete {
                request_id,
                host,
                port,
                detected_provider,
                duration_ms: start.elapsed().as_millis() as u64,
                status: 200,
            },
        )) {
            tracing::warn!(request_id = %request_id_for_log, error = %e, "dropping https_connect_complete: aggregator channel full or closed");
        }
    });

    Ok(Response::builder()
        .status(StatusCode::OK)
        .body(full_body(Vec::new()))
        .unwrap())
}

async fn pump(upgraded: Upgraded, mut server: TcpStream) -> std::io::Result<()> {
    let mut client = TokioIo::new(upgraded);
    tokio::io::copy_bidirectional(&mut client, &mut server).await?;
    Ok(())
}

fn split_authority(authority: &str) -> (String, u16) {
    match authority.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(443)),
        None => (authority.to_string(), 443),
    }
}

fn bad_request(message: &str) -> Response<ProxyBody> {
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .body(full_body(message.as_bytes().to_vec()))
        .unwrap()
}

fn bad_gateway(message: &str) -> Response<ProxyBody> {
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .body(full_body(message.as_bytes().to_vec()))
        .unwrap()
}
