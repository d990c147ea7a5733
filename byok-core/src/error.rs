//! Error taxonomy for the message exchange
//!
//! Every failure a send can produce is classified into one [`ChatError`]
//! variant before it reaches the caller. Raw transport error text is matched
//! against a closed set of [`FailureSignature`]s; anything unmatched becomes
//! [`ChatError::Unknown`].

use std::error::Error as StdError;
use thiserror::Error;

/// Result type for chat operations
pub type ChatResult<T> = Result<T, ChatError>;

/// Errors surfaced by the chat client
#[derive(Debug, Error)]
pub enum ChatError {
    /// Input rejected before any network call
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// No active API key for the selected provider
    #[error("No active API key for provider '{provider}'")]
    Credential { provider: String },

    /// Non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Transport { status: u16, message: String },

    /// The response stream violated the protocol or reported a failure
    #[error("Stream protocol error: {0}")]
    StreamProtocol(#[from] StreamFailure),

    /// Request or stream idle timeout elapsed
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The retry target could not be resolved
    #[error("Cannot replay message: {0}")]
    Replay(#[from] ReplayError),

    /// Client could not be constructed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Anything unclassified
    #[error("{0}")]
    Unknown(String),
}

/// Reasons a message draft is rejected before dispatch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Message is {length} characters; the limit is {max}")]
    MessageTooLong { length: usize, max: usize },

    #[error("Attachment is {size} bytes; the limit is {max}")]
    AttachmentTooLarge { size: usize, max: usize },

    #[error("No provider selected")]
    NoProvider,

    #[error("No model selected")]
    NoModel,

    #[error("A message is already being sent")]
    SendInProgress,

    #[error("Password must be at least {min} characters long")]
    WeakPassword { min: usize },

    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Field '{field}' must not be empty")]
    MissingField { field: &'static str },
}

/// Failures raised while decoding a response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamFailure {
    /// An event did not follow the `data: <json>` framing
    #[error("malformed event: {reason}")]
    MalformedEvent { reason: String },

    /// The server sent a terminal `error` event
    #[error("{0}")]
    ServerError(String),

    /// The stream ended before any content arrived
    #[error("no content received")]
    NoContent,

    /// The connection dropped mid-response
    #[error("connection interrupted: {detail}")]
    ConnectionInterrupted { detail: String },

    /// The reply cannot be tied to a thread
    #[error("response did not identify a thread")]
    MissingThreadId,
}

/// Reasons a retry target is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    #[error("message '{id}' is not in the current history")]
    MessageNotFound { id: String },

    #[error("message '{id}' has role '{role}', expected assistant")]
    NotAssistant { id: String, role: String },

    #[error("no user message precedes '{id}'")]
    NoPrecedingUserMessage { id: String },

    #[error("no thread is active")]
    NoActiveThread,
}

/// Coarse classification used by notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Credential,
    Transport,
    StreamProtocol,
    Timeout,
    Replay,
    Configuration,
    Unknown,
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Credential { .. } => ErrorKind::Credential,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::StreamProtocol(_) => ErrorKind::StreamProtocol,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Replay(_) => ErrorKind::Replay,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Text shown to the user in a non-blocking notification
    pub fn notice(&self) -> String {
        match self {
            Self::Validation(err) => err.to_string(),
            Self::Credential { provider } => format!(
                "No active API key found for {}. Add one in key management.",
                provider
            ),
            Self::Transport { status: 422, message } => message.clone(),
            Self::Transport { status, message } => {
                format!("Request failed ({}): {}", status, message)
            }
            Self::StreamProtocol(StreamFailure::ConnectionInterrupted { .. }) => {
                "Connection interrupted while receiving the response. Please try again."
                    .to_string()
            }
            Self::StreamProtocol(StreamFailure::ServerError(message)) => message.clone(),
            Self::StreamProtocol(StreamFailure::NoContent) => {
                "No response was received from the model.".to_string()
            }
            Self::StreamProtocol(other) => format!("Invalid response from server: {}", other),
            Self::Timeout(_) => "The response took too long. Please try again.".to_string(),
            Self::Replay(err) => format!("Cannot retry: {}", err),
            Self::Configuration(message) => message.clone(),
            Self::Unknown(_) => "Something went wrong. Please try again.".to_string(),
        }
    }
}

/// Recognized failure text found in network errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSignature {
    IncompleteChunkedEncoding,
    ConnectionClosedEarly,
    UnexpectedEof,
    ConnectionReset,
    TimedOut,
    DeadlineElapsed,
}

impl FailureSignature {
    pub const ALL: [FailureSignature; 6] = [
        Self::IncompleteChunkedEncoding,
        Self::ConnectionClosedEarly,
        Self::UnexpectedEof,
        Self::ConnectionReset,
        Self::TimedOut,
        Self::DeadlineElapsed,
    ];

    /// Lowercase needle searched for in the error text
    pub fn needle(&self) -> &'static str {
        match self {
            Self::IncompleteChunkedEncoding => "incomplete_chunked_encoding",
            Self::ConnectionClosedEarly => "connection closed before message completed",
            Self::UnexpectedEof => "unexpected eof",
            Self::ConnectionReset => "connection reset",
            Self::TimedOut => "timed out",
            Self::DeadlineElapsed => "deadline has elapsed",
        }
    }

    /// First signature found in `text`
    pub fn detect(text: &str) -> Option<Self> {
        let lowered = text.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|signature| lowered.contains(signature.needle()))
    }

    fn into_error(self, text: &str) -> ChatError {
        match self {
            Self::IncompleteChunkedEncoding
            | Self::ConnectionClosedEarly
            | Self::UnexpectedEof
            | Self::ConnectionReset => StreamFailure::ConnectionInterrupted {
                detail: text.to_string(),
            }
            .into(),
            Self::TimedOut | Self::DeadlineElapsed => ChatError::Timeout(text.to_string()),
        }
    }
}

/// Map raw transport failure text onto the taxonomy
pub fn classify_failure(text: &str) -> ChatError {
    match FailureSignature::detect(text) {
        Some(signature) => signature.into_error(text),
        None => ChatError::Unknown(text.to_string()),
    }
}

/// Join an error with all of its sources, outermost first
pub fn error_chain_text(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ChatError::Timeout(error_chain_text(&err));
        }
        classify_failure(&error_chain_text(&err))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        StreamFailure::MalformedEvent {
            reason: err.to_string(),
        }
        .into()
    }
}
