//! HTTP transport for the chat backend
//!
//! This module implements the transport layer, handling:
//! - Bearer authentication and request correlation ids
//! - JSON and multipart request bodies
//! - Classification of replies as JSON or an event stream
//! - Error mapping for non-success statuses
//!
//! No retries happen here; retrying is a user decision made above this layer.

pub mod client;
pub mod error;

use crate::config::SecretString;
use crate::error::ChatError;
use crate::protocol::Attachment;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use uuid::Uuid;

pub use client::HttpClient;
pub use error::{extract_error_message, map_http_error};

/// Raw body chunks of an event-stream reply
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ChatError>> + Send>>;

/// Request body variants
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Serialized as `application/json`
    Json(Value),
    /// Sent as `multipart/form-data`; no JSON content type is applied
    Form(FormData),
}

impl RequestBody {
    /// Serialize any payload into a JSON body
    pub fn json<T: Serialize>(payload: &T) -> Result<Self, ChatError> {
        Ok(Self::Json(serde_json::to_value(payload)?))
    }
}

/// Multipart form contents
#[derive(Debug, Clone, Default)]
pub struct FormData {
    pub fields: Vec<(String, String)>,
    pub files: Vec<(String, Attachment)>,
}

impl FormData {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self {
            fields,
            files: Vec::new(),
        }
    }

    pub fn with_file(mut self, field: impl Into<String>, attachment: Attachment) -> Self {
        self.files.push((field.into(), attachment));
        self
    }
}

/// A single call against the backend
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,

    /// Path relative to the base URL, starting with `/`
    pub path: String,

    pub body: RequestBody,

    /// Bearer credential; the header is omitted when absent
    pub bearer: Option<SecretString>,

    /// Unique request ID for correlation
    pub request_id: Uuid,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: RequestBody::Empty,
            bearer: None,
            request_id: Uuid::new_v4(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_bearer(mut self, bearer: Option<SecretString>) -> Self {
        self.bearer = bearer;
        self
    }
}

/// Discriminated reply
pub enum ApiResponse {
    /// Single-shot JSON body (`Null` when empty)
    Json(Value),
    /// Open `text/event-stream` body
    Stream(ByteStream),
}

impl ApiResponse {
    pub fn is_stream(&self) -> bool {
        matches!(self, ApiResponse::Stream(_))
    }

    /// Deserialize a JSON reply; a stream here is a protocol violation
    pub fn into_json<T: serde::de::DeserializeOwned>(self) -> Result<T, ChatError> {
        match self {
            ApiResponse::Json(value) => Ok(serde_json::from_value(value)?),
            ApiResponse::Stream(_) => Err(crate::error::StreamFailure::MalformedEvent {
                reason: "expected a JSON reply, got an event stream".to_string(),
            }
            .into()),
        }
    }
}

impl fmt::Debug for ApiResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiResponse::Json(value) => f.debug_tuple("Json").field(value).finish(),
            ApiResponse::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Trait for HTTP transports
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one request and classify its reply
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ChatError>;
}
