//! Protocol module for chat request/response structures
//!
//! This module defines the data model shared by the send path, the stream
//! decoder and the backend collaborator contracts.

pub mod types;

pub use types::{
    normalize_provider, AccessToken, ApiKey, Attachment, Credentials, HealthStatus, Message,
    MessageRole, NewApiKey, NewThread, ProviderCatalog, ProviderInfo, ProviderModels,
    SendOutcome, SendRequest, StreamEvent, StreamPayload, Termination, Thread, User,
};
