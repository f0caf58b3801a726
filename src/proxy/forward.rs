//! Plain-HTTP forward path: parse, apply capture policy, forward through a
//! shared `reqwest::Client`, mirror the response, emit captured events
//! alongside.

use std::time::Instant;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};

use crate::error::WrapError;
use crate::events::{Event, EventBody, Source};
use crate::provider::{self, Provider};
use crate::util::random_hex_suffix;

use super::body::capture;
use super::{full_body, ProxyBody, SharedState};

/// Headers redacted (case-insensitive) before emission, per §4.1. The real
/// values are still forwarded upstream — only the *emitted event* redacts
/// them.
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "x-api-key", "x-auth-token"];

/// Hop-by-hop headers never forwarded upstream.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "transfer-encoding",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "upgrade",
    "content-length",
];

fn sanitized_headers_json(headers: &hyper::HeaderMap) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (name, value) in headers.iter() {
        let name_lower = name.as_str().to_ascii_lowercase();
        let value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
            crate::sanitize::REDACTION_MARKER.to_string()
        } else {
            value.to_str().unwrap_or("<non-utf8>").to_string()
        };
        map.insert(name_lower, serde_json::Value::String(value));
    }
    serde_json::Value::Object(map)
}

fn sanitized_headers_json_reqwest(headers: &reqwest::header::HeaderMap) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (name, value) in headers.iter() {
        let name_lower = name.as_str().to_ascii_lowercase();
        let value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
            crate::sanitize::REDACTION_MARKER.to_string()
        } else {
            value.to_str().unwrap_or("<non-utf8>").to_string()
        };
        map.insert(name_lower, serde_json::Value::String(value));
    }
    serde_json::Value::Object(map)
}

fn should_capture(provider: Provider, include_all: bool) -> bool {
    provider.is_known() || include_all
}

/// Forward a plain (non-CONNECT) HTTP request and optionally emit capture
/// events around it. Forwarding always happens, regardless of capture
/// policy — the proxy must never break the application.
pub async fn handle_forward(
    req: Request<Incoming>,
    state: SharedState,
) -> Result<Response<ProxyBody>, hyper::Error> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let Some(host) = uri.host().map(str::to_string) else {
        return Ok(bad_request("request missing host"));
    };
    let detected_provider = provider::detect(&host);
    let capture_this = should_capture(detected_provider, state.config.include_all);

    let request_id = format!("req-{}", random_hex_suffix(8));
    let url = uri.to_string();

    // Raw headers (real values) are kept for forwarding; the JSON view is
    // redacted and only ever used for the emitted event.
    let raw_headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .map(|(n, v)| (n.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();
    let req_headers_json = sanitized_headers_json(req.headers());
    let req_content_type = req
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body_bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return Ok(bad_request("failed to read request body")),
    };

    if capture_this {
        if let Err(e) = state.events.try_send(Event::new(
            state.config.session_id.clone(),
            Source::Proxy,
            EventBody::HttpRequestStart {
                request_id: request_id.clone(),
                method: method.to_string(),
                url: url.clone(),
                headers: req_headers_json,
                body: capture(&body_bytes, req_content_type.as_deref(), state.config.max_body_size),
                provider: detected_provider,
            },
        )) {
            tracing::warn!(request_id = %request_id, error = %e, "dropping http_request_start: aggregator channel full or closed");
        }
    }

    let start = Instant::now();
    let upstream_result = send_upstream(&state, &method, &url, body_bytes.to_vec(), &raw_headers).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match upstream_result {
        Ok((status, resp_headers, resp_body)) => {
            if capture_this {
                let resp_content_type = resp_headers
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let request_id_for_log = request_id.clone();
                if let Err(e) = state.events.try_send(Event::new(
                    state.config.session_id.clone(),
                    Source::Proxy,
                    EventBody::HttpRequestComplete {
                        request_id,
                        method: method.to_string(),
                        url,
                        status,
                        headers: sanitized_headers_json_reqwest(&resp_headers),
                        body: capture(&resp_body, resp_content_type.as_deref(), state.config.max_body_size),
                        duration_ms,
                        provider: detected_provider,
                    },
                )) {
                    tracing::warn!(request_id = %request_id_for_log, error = %e, "dropping http_request_complete: aggregator channel full or closed");
                }
            }
            Ok(Response::builder()
                .status(status)
                .body(full_body(resp_body.to_vec()))
                .unwrap())
        }
        Err(err) => {
            tracing::warn!(url = %url, error = %err, "upstream forward failed");
            let message = err.to_string();
            if capture_this {
                let request_id_for_log = request_id.clone();
                if let Err(e) = state.events.try_send(Event::new(
                    state.config.session_id.clone(),
                    Source::Proxy,
                    EventBody::HttpRequestError {
                        request_id,
                        method: method.to_string(),
                        url,
                        message: message.clone(),
                        duration_ms,
                        provider: detected_provider,
                    },
                )) {
                    tracing::warn!(request_id = %request_id_for_log, error = %e, "dropping http_request_error: aggregator channel full or closed");
                }
            }
            Ok(bad_gateway(&message))
        }
    }
}

async fn send_upstream(
    state: &SharedState,
    method: &hyper::Method,
    url: &str,
    body: Vec<u8>,
    headers: &[(String, String)],
) -> Result<(u16, reqwest::header::HeaderMap, bytes::Bytes), WrapError> {
    let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|e| WrapError::UpstreamNetwork(e.to_string()))?;
    let mut builder = state.client.request(reqwest_method, url).body(body);
    for (name, value) in headers {
        let lower = name.to_ascii_lowercase();
        if HOP_BY_HOP_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        builder = builder.header(name, value);
    }
    let response = builder
        .send()
        .await
        .map_err(|e| WrapError::UpstreamNetwork(e.to_string()))?;
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response
        .bytes()
        .await
        .map_err(|e| WrapError::UpstreamNetwork(e.to_string()))?;
    Ok((status, headers, body))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_header_set_covers_common_credential_headers() {
        assert!(SENSITIVE_HEADERS.contains(&"authorization"));
        assert!(SENSITIVE_HEADERS.contains(&"cookie"));
        assert!(SENSITIVE_HEADERS.contains(&"x-api-key"));
        assert!(SENSITIVE_HEADERS.contains(&"x-auth-token"));
    }

    #[test]
    fn sanitized_headers_redacts_authorization() {
        let mut headers = hyper::HeaderMap::new();
        headers.insert("authorization", "Bearer sk-secret".parse().unwrap());
        headers.insert("x-request-id", "abc".parse().unwrap());
        let json = sanitized_headers_json(&headers);
        assert_eq!(json["authorization"], crate::sanitize::REDACTION_MARKER);
        assert_eq!(json["x-request-id"], "abc");
    }
}
