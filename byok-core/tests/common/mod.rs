//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use byok_core::config::ChatSettings;
use byok_core::http::{ApiRequest, ApiResponse, ByteStream, RequestBody, Transport};
use byok_core::{BackendApi, ChatError, ChatEvent, ChatSession};
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;

pub const TOKEN: &str = "test-token";

/// Canned reply for one request
pub enum Reply {
    Json(Value),
    Stream(Vec<Vec<u8>>),
    Status(u16, String),
    /// Hold the reply until the notify fires
    Gated(Arc<Notify>, Box<Reply>),
}

/// A request as the transport saw it
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub body: RequestBody,
    pub bearer: Option<String>,
}

/// In-memory transport answering from per-route queues
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<Recorded>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a reply for `"METHOD /path"`
    pub fn on(&self, route: &str, reply: Reply) {
        self.routes
            .lock()
            .unwrap()
            .entry(route.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, route: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| format!("{} {}", r.method, r.path) == route)
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ChatError> {
        let route = format!("{} {}", request.method, request.path);
        self.requests.lock().unwrap().push(Recorded {
            method: request.method.to_string(),
            path: request.path.clone(),
            body: request.body.clone(),
            bearer: request.bearer.as_ref().map(|t| t.expose_secret().to_string()),
        });

        let reply = self
            .routes
            .lock()
            .unwrap()
            .get_mut(&route)
            .and_then(|queue| queue.pop_front());

        match reply {
            Some(reply) => resolve(reply).await,
            None => Err(ChatError::Transport {
                status: 404,
                message: format!("no scripted reply for {}", route),
            }),
        }
    }
}

async fn resolve(mut reply: Reply) -> Result<ApiResponse, ChatError> {
    loop {
        match reply {
            Reply::Json(value) => return Ok(ApiResponse::Json(value)),
            Reply::Stream(chunks) => return Ok(ApiResponse::Stream(byte_stream(chunks))),
            Reply::Status(status, message) => return Err(ChatError::Transport { status, message }),
            Reply::Gated(gate, inner) => {
                gate.notified().await;
                reply = *inner;
            }
        }
    }
}

pub fn byte_stream(chunks: Vec<Vec<u8>>) -> ByteStream {
    Box::pin(futures::stream::iter(
        chunks.into_iter().map(|c| Ok::<_, ChatError>(Bytes::from(c))),
    ))
}

/// Encode payloads as a single event-stream body
pub fn sse(payloads: &[Value]) -> Vec<u8> {
    payloads
        .iter()
        .map(|p| format!("data: {}\n\n", p))
        .collect::<String>()
        .into_bytes()
}

pub fn content(text: &str) -> Value {
    json!({ "content": text })
}

pub fn done(thread_id: Option<&str>) -> Value {
    match thread_id {
        Some(id) => json!({ "done": true, "thread_id": id }),
        None => json!({ "done": true }),
    }
}

pub fn key_json(id: &str, provider: &str, model: &str, active: bool) -> Value {
    json!({
        "id": id,
        "provider": provider,
        "model_name": model,
        "key_name": format!("{} key", id),
        "is_active": active,
        "created_at": "2024-05-01T10:00:00"
    })
}

pub fn message_json(id: &str, role: &str, text: &str, second: u32) -> Value {
    json!({
        "id": id,
        "role": role,
        "content": text,
        "created_at": format!("2024-05-01T10:00:{:02}", second)
    })
}

/// Route library logs through the test harness; `RUST_LOG` controls the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn settings() -> ChatSettings {
    ChatSettings {
        default_provider: Some("openai".to_string()),
        default_model: Some("gpt-4".to_string()),
        ..ChatSettings::default()
    }
}

pub fn api(transport: Arc<ScriptedTransport>) -> Arc<BackendApi> {
    Arc::new(BackendApi::new(transport).with_token(Some(TOKEN.into())))
}

pub fn session(transport: Arc<ScriptedTransport>) -> (ChatSession, UnboundedReceiver<ChatEvent>) {
    init_tracing();
    ChatSession::new(api(transport), settings(), Duration::from_secs(5))
}

pub fn drain(rx: &mut UnboundedReceiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// JSON body of a recorded request
pub fn json_body(recorded: &Recorded) -> Value {
    match &recorded.body {
        RequestBody::Json(value) => value.clone(),
        other => panic!("expected a JSON body, got {:?}", other),
    }
}
