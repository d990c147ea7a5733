//! HTTP client implementation using reqwest

use crate::config::{ConnectionConfig, SecretString};
use crate::error::ChatError;
use crate::http::{ApiRequest, ApiResponse, RequestBody, Transport};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, ClientBuilder, Response};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Maximum JSON response size (10MB)
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

/// Default user agent
const USER_AGENT: &str = concat!("byok-chat/", env!("CARGO_PKG_VERSION"));

const EVENT_STREAM: &str = "text/event-stream";

/// Shared HTTP client with connection pooling
#[derive(Clone)]
pub struct HttpClient {
    /// The underlying reqwest client
    client: Arc<Client>,

    /// Backend base URL without a trailing slash
    base_url: String,

    /// Time allowed until headers (and JSON bodies) arrive
    request_timeout: Duration,

    /// Maximum response size to prevent OOM
    max_response_size: usize,
}

impl HttpClient {
    /// Create a new HTTP client with default connection settings
    pub fn new(base_url: impl Into<String>) -> Result<Self, ChatError> {
        Self::with_config(base_url, &ConnectionConfig::default())
    }

    /// Create a new HTTP client with custom connection settings
    ///
    /// No total request timeout is set on the reqwest client: it would cut
    /// long event streams. Header waits are bounded per request and stream
    /// reads by the decoder's idle timeout.
    pub fn with_config(
        base_url: impl Into<String>,
        connection: &ConnectionConfig,
    ) -> Result<Self, ChatError> {
        let client = ClientBuilder::new()
            .pool_max_idle_per_host(connection.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(connection.keepalive_secs))
            .connect_timeout(connection.connect_timeout())
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .map_err(|e| ChatError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout: connection.request_timeout(),
            max_response_size: MAX_RESPONSE_SIZE,
        })
    }

    /// Cap on buffered response bodies, success or error
    pub fn with_max_response_size(mut self, max_response_size: usize) -> Self {
        self.max_response_size = max_response_size;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the full URL for a request path
    fn build_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn bearer_header(token: &SecretString) -> Result<HeaderValue, ChatError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|_| ChatError::Configuration("Bearer token is not a valid header value".to_string()))?;
        value.set_sensitive(true);
        Ok(value)
    }

    fn build_form(form: crate::http::FormData) -> Result<Form, ChatError> {
        let mut multipart = Form::new();
        for (name, value) in form.fields {
            multipart = multipart.text(name, value);
        }
        for (name, attachment) in form.files {
            let part = Part::bytes(attachment.data.to_vec())
                .file_name(attachment.file_name)
                .mime_str(&attachment.mime_type)
                .map_err(|e| ChatError::Configuration(format!("Invalid attachment type: {}", e)))?;
            multipart = multipart.part(name, part);
        }
        Ok(multipart)
    }

    /// Whether the declared content type announces an event stream
    fn is_event_stream(response: &Response) -> bool {
        response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase().contains(EVENT_STREAM))
            .unwrap_or(false)
    }

    /// Check response size to prevent OOM
    fn check_content_length(&self, response: &Response) -> Result<(), ChatError> {
        if let Some(content_length) = response.content_length() {
            if content_length as usize > self.max_response_size {
                return Err(ChatError::Unknown(format!(
                    "Response size {} exceeds maximum {}",
                    content_length, self.max_response_size
                )));
            }
        }
        Ok(())
    }

    /// Error body for message extraction; `None` when it is oversized,
    /// unreadable or slower than the request timeout
    async fn read_error_body(&self, response: Response, request_id: Uuid) -> Option<String> {
        if let Err(e) = self.check_content_length(&response) {
            warn!("Skipping error body: {} [request_id: {}]", e, request_id);
            return None;
        }
        match self
            .within_request_timeout("reading error body", response.text())
            .await
        {
            Ok(text) if text.len() > self.max_response_size => {
                warn!(
                    "Skipping error body of {} bytes [request_id: {}]",
                    text.len(),
                    request_id
                );
                None
            }
            Ok(text) => Some(text),
            Err(e) => {
                warn!("Could not read error body: {} [request_id: {}]", e, request_id);
                None
            }
        }
    }

    async fn within_request_timeout<F, T>(&self, stage: &str, future: F) -> Result<T, ChatError>
    where
        F: Future<Output = Result<T, reqwest::Error>>,
    {
        match tokio::time::timeout(self.request_timeout, future).await {
            Ok(result) => result.map_err(ChatError::from),
            Err(_) => Err(ChatError::Timeout(format!(
                "{} exceeded {} ms",
                stage,
                self.request_timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ChatError> {
        let request_id = request.request_id;
        let url = self.build_url(&request.path);

        info!(
            "Executing {} {} [request_id: {}]",
            request.method, request.path, request_id
        );
        debug!("Request URL: {}", url);

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .header("X-Request-ID", request_id.to_string());

        if let Some(token) = &request.bearer {
            builder = builder.header(AUTHORIZATION, Self::bearer_header(token)?);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Form(form) => builder.multipart(Self::build_form(form)?),
        };

        let response = self
            .within_request_timeout("waiting for response headers", builder.send())
            .await
            .map_err(|e| {
                error!("Request error [request_id: {}]: {}", request_id, e);
                e
            })?;

        let status = response.status();
        debug!("Response status: {} [request_id: {}]", status, request_id);

        if !status.is_success() {
            let body = self.read_error_body(response, request_id).await;
            warn!(
                "Request failed with status {} for {} [request_id: {}]",
                status, request.path, request_id
            );
            return Err(crate::http::error::map_http_error(status, body, request_id));
        }

        if Self::is_event_stream(&response) {
            info!("Opened event stream [request_id: {}]", request_id);
            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(ChatError::from));
            return Ok(ApiResponse::Stream(Box::pin(stream)));
        }

        self.check_content_length(&response)?;

        let text = self
            .within_request_timeout("reading response body", response.text())
            .await?;

        if text.len() > self.max_response_size {
            return Err(ChatError::Unknown(format!(
                "Response size {} exceeds maximum {} [request_id: {}]",
                text.len(),
                self.max_response_size,
                request_id
            )));
        }

        if text.trim().is_empty() {
            return Ok(ApiResponse::Json(serde_json::Value::Null));
        }

        let value = serde_json::from_str(&text).map_err(|e| {
            error!("Failed to parse JSON response [request_id: {}]: {}", request_id, e);
            ChatError::from(e)
        })?;

        info!("Request completed [request_id: {}]", request_id);
        Ok(ApiResponse::Json(value))
    }
}
