//! Shared helpers for driving the HTTP router in-process.

#![allow(dead_code)]

use std::time::Duration;

use axum::body::{Body, BodyDataStream};
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use futures::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use agentic_stream_mcp::config::ServerConfig;
use agentic_stream_mcp::methods::MethodRegistry;
use agentic_stream_mcp::transport::HttpTransport;

pub const ACCEPT_BOTH: &str = "application/json, text/event-stream";

pub fn transport(config: ServerConfig) -> HttpTransport {
    HttpTransport::new(config, MethodRegistry::dispatcher().unwrap())
}

pub fn request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

pub fn init_request() -> Value {
    request(
        0,
        "initialize",
        json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": { "name": "test-client", "version": "1.0" }
        }),
    )
}

pub fn post_request(session: Option<&str>, body: impl Into<Body>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .header("accept", ACCEPT_BOTH);
    if let Some(id) = session {
        builder = builder.header("mcp-session-id", id);
    }
    builder.body(body.into()).unwrap()
}

pub async fn post(router: &Router, session: Option<&str>, body: Value) -> Response<Body> {
    router
        .clone()
        .oneshot(post_request(session, body.to_string()))
        .await
        .unwrap()
}

pub async fn post_raw(router: &Router, session: Option<&str>, body: &str) -> Response<Body> {
    router
        .clone()
        .oneshot(post_request(session, body.to_string()))
        .await
        .unwrap()
}

pub async fn get_stream(router: &Router, session: Option<&str>, last_event_id: Option<&str>) -> Response<Body> {
    let mut builder = Request::builder()
        .method("GET")
        .uri("/mcp")
        .header("accept", "text/event-stream");
    if let Some(id) = session {
        builder = builder.header("mcp-session-id", id);
    }
    if let Some(cursor) = last_event_id {
        builder = builder.header("last-event-id", cursor);
    }
    router
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn delete(router: &Router, session: Option<&str>) -> Response<Body> {
    let mut builder = Request::builder().method("DELETE").uri("/mcp");
    if let Some(id) = session {
        builder = builder.header("mcp-session-id", id);
    }
    router
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Run `initialize` and return the issued session id.
pub async fn open_session(router: &Router) -> String {
    let response = post(router, None, init_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
    response
        .headers()
        .get("mcp-session-id")
        .expect("session header")
        .to_str()
        .unwrap()
        .to_string()
}

pub fn content_type(response: &Response<Body>) -> String {
    response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// One parsed SSE frame.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: Value,
}

/// Incremental SSE frame reader over a response body.
pub struct SseReader {
    stream: BodyDataStream,
    buffer: String,
}

impl SseReader {
    pub fn new(response: Response<Body>) -> Self {
        Self {
            stream: response.into_body().into_data_stream(),
            buffer: String::new(),
        }
    }

    /// Next data frame, skipping keep-alive comments. `None` at end of stream or after 2s.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let raw: String = self.buffer.drain(..end + 2).collect();
                if let Some(frame) = parse_frame(&raw) {
                    return Some(frame);
                }
                continue;
            }

            let chunk = tokio::time::timeout(Duration::from_secs(2), self.stream.next())
                .await
                .ok()??
                .ok()?;
            self.buffer.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }

    pub async fn frames(&mut self, n: usize) -> Vec<Frame> {
        let mut frames = Vec::with_capacity(n);
        while frames.len() < n {
            match self.next_frame().await {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        frames
    }
}

fn parse_frame(raw: &str) -> Option<Frame> {
    let mut frame = Frame::default();
    let mut data = String::new();
    for line in raw.lines() {
        if let Some(v) = line.strip_prefix("id:") {
            frame.id = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("event:") {
            frame.event = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("data:") {
            data.push_str(v.trim());
        }
    }
    if data.is_empty() {
        return None;
    }
    frame.data = serde_json::from_str(&data).ok()?;
    Some(frame)
}
