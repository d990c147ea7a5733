//! BYOK Chat Core Library
//!
//! This crate provides the client side of a bring-your-own-keys chat service:
//! streamed message exchange, retry by replay and server-authoritative history.

pub mod api;
pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod http;
pub mod keys;
pub mod orchestrator;
pub mod protocol;
pub mod retry;
pub mod session;
pub mod stream;

pub use api::BackendApi;
pub use conversation::{ComposeState, Conversation, SharedConversation, ThreadStore};
pub use error::{ChatError, ChatResult, ErrorKind, ReplayError, StreamFailure, ValidationError};
pub use events::{ChatEvent, EventSink};
pub use keys::{KeyCache, KeyStore};
pub use orchestrator::{Draft, Orchestrator, SendContext, SendState};
pub use session::{ChatSession, Selection};

/// Returns the version of the BYOK Chat Core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
