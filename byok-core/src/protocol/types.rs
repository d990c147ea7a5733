//! Wire types exchanged with the chat backend
//!
//! This module contains the data model shared by the send path and the
//! collaborator contracts:
//! - Thread history (`Message`, `Thread`)
//! - The outbound send request and its streamed reply events
//! - Account, key and catalog payloads

use crate::config::SecretString;
use bytes::Bytes;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Role of a message in a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Text typed by the user
    User,
    /// Model response
    Assistant,
    /// Instructions that guide the model
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted message in a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned identifier
    pub id: String,

    /// Role of the sender
    pub role: MessageRole,

    /// Message text
    pub content: String,

    /// Server-assigned creation time, the ordering key within a thread
    pub created_at: NaiveDateTime,
}

impl Message {
    /// Create a message stamped with the current time
    pub fn new(id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    /// Create a user message
    pub fn user(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id, MessageRole::User, content)
    }

    /// Create an assistant message
    pub fn assistant(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id, MessageRole::Assistant, content)
    }

    /// Create a system message
    pub fn system(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id, MessageRole::System, content)
    }
}

/// A persisted conversation bound to one provider/model pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub title: String,
    pub provider: String,
    pub model_name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Payload for creating a thread explicitly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewThread {
    pub title: String,
    pub provider: String,
    pub model_name: String,
}

/// Outbound chat request, built fresh for every attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    /// User message text
    pub message: String,

    /// Provider identifier
    pub provider: String,

    /// Model identifier
    pub model_name: String,

    /// Thread to append to; absent for the first message of a new thread
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Key resolved for the provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_id: Option<String>,

    /// Ask for an event-stream response
    pub stream: bool,
}

impl SendRequest {
    /// Create a streaming request for a new thread
    pub fn new(
        message: impl Into<String>,
        provider: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            provider: provider.into(),
            model_name: model_name.into(),
            thread_id: None,
            api_key_id: None,
            stream: true,
        }
    }

    /// Target an existing thread
    pub fn with_thread(mut self, thread_id: Option<String>) -> Self {
        self.thread_id = thread_id;
        self
    }

    /// Attach the resolved key identifier
    pub fn with_api_key(mut self, api_key_id: impl Into<String>) -> Self {
        self.api_key_id = Some(api_key_id.into());
        self
    }

    /// Choose between event-stream and single JSON replies
    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Flatten into multipart text fields
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("message".to_string(), self.message.clone()),
            ("provider".to_string(), self.provider.clone()),
            ("model_name".to_string(), self.model_name.clone()),
            ("stream".to_string(), self.stream.to_string()),
        ];
        if let Some(thread_id) = &self.thread_id {
            fields.push(("thread_id".to_string(), thread_id.clone()));
        }
        if let Some(api_key_id) = &self.api_key_id {
            fields.push(("api_key_id".to_string(), api_key_id.clone()));
        }
        fields
    }
}

/// A file sent alongside a message
#[derive(Clone, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.data.len())
            .finish()
    }
}

/// One JSON payload carried by a `data:` event, or a whole JSON reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// A decoded stream event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Partial assistant text
    Content(String),
    /// Terminal failure reported by the server
    Error(String),
    /// Terminal success marker
    Done { thread_id: Option<String> },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Content(_))
    }
}

/// How a successful response ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A terminal `done` marker (or a complete JSON reply) was received
    Clean,
    /// The stream ended without a terminal marker after some content
    Truncated,
}

/// Result of a successful send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    /// Thread the exchange belongs to
    pub thread_id: String,

    /// Assembled assistant text
    pub content: String,

    /// No thread existed before this send
    pub created_thread: bool,

    pub termination: Termination,
}

/// Registered account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

/// Login or registration input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<SecretString>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Bearer token issued at login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: SecretString,
    pub token_type: String,
}

/// Stored provider key, as listed by the backend (the secret is never returned)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub provider: String,
    pub model_name: String,
    pub key_name: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

/// Payload for storing a new provider key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewApiKey {
    pub provider: String,
    pub model_name: String,
    pub api_key: SecretString,
    pub key_name: String,
}

/// Provider listed in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
}

/// Models available for one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderModels {
    pub provider: String,
    pub models: Vec<String>,
}

/// Full provider/model catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCatalog {
    pub providers: Vec<ProviderInfo>,
    pub models_by_provider: HashMap<String, Vec<String>>,
}

impl ProviderCatalog {
    /// Models for a provider, matched case-insensitively
    pub fn models_for(&self, provider: &str) -> &[String] {
        let wanted = normalize_provider(provider);
        self.models_by_provider
            .iter()
            .find(|(id, _)| normalize_provider(id) == wanted)
            .map(|(_, models)| models.as_slice())
            .unwrap_or(&[])
    }
}

/// Backend health report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: NaiveDateTime,
}

/// Provider identifiers are compared case-insensitively
pub fn normalize_provider(provider: &str) -> String {
    provider.trim().to_lowercase()
}
