//! End-to-end coverage of the plain-HTTP forward path: a real loopback
//! upstream, a real proxy listener, a real `reqwest::Client` configured to
//! go through it.

use std::convert::Infallible;
use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use tracewrap::events::Event;
use tracewrap::proxy::{self, ProxyConfig};

async fn echo(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let body = req.into_body().collect().await.unwrap().to_bytes();
    Ok(Response::new(Full::new(body)))
}

async fn spawn_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            let io = TokioIo::new(stream);
            tokio::spawn(async move {
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(io, service_fn(echo))
                    .await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn forwarded_request_reaches_upstream_and_emits_events() {
    let upstream = spawn_upstream().await;
    let (events_tx, mut events_rx) = mpsc::channel::<Event>(32);

    let handle = proxy::start(
        "127.0.0.1",
        0,
        ProxyConfig {
            session_id: "sess1".to_string(),
            include_all: true,
            max_body_size: 1_048_576,
        },
        events_tx,
    )
    .await
    .unwrap();

    let proxy_url = format!("http://{}:{}", handle.host, handle.port);
    let client = reqwest::Client::builder()
        .proxy(reqwest::Proxy::all(proxy_url.as_str()).unwrap())
        .build()
        .unwrap();

    let target = format!("http://{upstream}/hello");
    let response = client
        .post(&target)
        .body("ping")
        .send()
        .await
        .expect("forwarded request should succeed");
    assert!(response.status().is_success());
    let body = response.text().await.unwrap();
    assert_eq!(body, "ping");

    let mut saw_start = false;
    let mut saw_complete = false;
    for _ in 0..2 {
        if let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_secs(1), events_rx.recv()).await
        {
            match event.type_tag() {
                "http_request_start" => saw_start = true,
                "http_request_complete" => saw_complete = true,
                _ => {}
            }
        }
    }
    assert!(saw_start, "expected an http_request_start event");
    assert!(saw_complete, "expected an http_request_complete event");

    handle.stop().await;
}

#[tokio::test]
async fn non_provider_traffic_is_not_captured_without_include_all() {
    let upstream = spawn_upstream().await;
    let (events_tx, mut events_rx) = mpsc::channel::<Event>(32);

    let handle = proxy::start(
        "127.0.0.1",
        0,
        ProxyConfig {
            session_id: "sess1".to_string(),
            include_all: false,
            max_body_size: 1_048_576,
        },
        events_tx,
    )
    .await
    .unwrap();

    let proxy_url = format!("http://{}:{}", handle.host, handle.port);
    let client = reqwest::Client::builder()
        .proxy(reqwest::Proxy::all(proxy_url.as_str()).unwrap())
        .build()
        .unwrap();

    let target = format!("http://{upstream}/hello");
    let response = client
        .post(&target)
        .body("ping")
        .send()
        .await
        .expect("forwarding should still succeed even when not captured");
    assert!(response.status().is_success());

    let mut saw_start = false;
    let mut saw_complete = false;
    while let Ok(Some(event)) =
        tokio::time::timeout(std::time::Duration::from_millis(200), events_rx.recv()).await
    {
        match event.type_tag() {
            "http_request_start" => saw_start = true,
            "http_request_complete" => saw_complete = true,
            _ => {}
        }
    }
    assert!(!saw_start, "http_request_start must not be emitted without --include-all");
    assert!(!saw_complete, "http_request_complete must not be emitted without --include-all");

    handle.stop().await;
}

#[tokio::test]
async fn proxy_env_points_at_bound_address() {
    let (events_tx, _rx) = mpsc::channel::<Event>(8);
    let handle = proxy::start(
        "127.0.0.1",
        0,
        ProxyConfig {
            session_id: "sess1".to_string(),
            include_all: false,
            max_body_size: 1024,
        },
        events_tx,
    )
    .await
    .unwrap();

    let env = handle.env();
    let expected = format!("http://{}:{}", handle.host, handle.port);
    assert!(env.iter().any(|(k, v)| k == "HTTP_PROXY" && v == &expected));
    assert!(env.iter().any(|(k, v)| k == "https_proxy" && v == &expected));

    handle.stop().await;
}
