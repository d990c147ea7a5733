//! Send-message state machine
//!
//! One [`Orchestrator::send`] call drives a single attempt:
//!
//! ```text
//! Idle -> Validating -> AwaitingResponse -> StreamingDecode -> Succeeded
//!                                        -> ParsingJson     -> Failed
//! ```
//!
//! Every transition is logged and emitted as [`ChatEvent::StateChanged`].
//! The orchestrator owns no conversation state; callers hand it a resolved
//! [`SendContext`] and a [`Draft`] and reconcile the outcome themselves.

use crate::api::BackendApi;
use crate::config::ChatSettings;
use crate::error::{ChatError, StreamFailure, ValidationError};
use crate::events::{ChatEvent, EventSink};
use crate::http::ApiResponse;
use crate::keys::{select_key, KeyStore};
use crate::protocol::{
    normalize_provider, Attachment, SendOutcome, SendRequest, StreamPayload, Termination,
};
use crate::stream::decode_stream;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Phase of a send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    Validating,
    AwaitingResponse,
    StreamingDecode,
    ParsingJson,
    Succeeded,
    Failed,
}

/// Provider, model and thread a send targets, fixed for the whole attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendContext {
    pub provider: String,
    pub model_name: String,

    /// Active thread; `None` starts a new one
    pub thread_id: Option<String>,

    pub stream: bool,
}

impl SendContext {
    pub fn new(provider: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_name: model_name.into(),
            thread_id: None,
            stream: true,
        }
    }

    pub fn with_thread(mut self, thread_id: Option<String>) -> Self {
        self.thread_id = thread_id;
        self
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// What the user is sending
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Draft {
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl Draft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Option<Attachment>) -> Self {
        self.attachment = attachment;
        self
    }
}

/// Runs send attempts against the backend
pub struct Orchestrator {
    api: Arc<BackendApi>,
    keys: Arc<dyn KeyStore>,
    settings: ChatSettings,
    idle_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        api: Arc<BackendApi>,
        keys: Arc<dyn KeyStore>,
        settings: ChatSettings,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            api,
            keys,
            settings,
            idle_timeout,
        }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Run one attempt to a terminal state
    ///
    /// On failure nothing the attempt produced is kept; deltas already
    /// emitted are advisory only.
    pub async fn send(
        &self,
        ctx: &SendContext,
        draft: &Draft,
        events: &EventSink,
    ) -> Result<SendOutcome, ChatError> {
        let mut state = SendState::Idle;
        match self.attempt(ctx, draft, events, &mut state).await {
            Ok(outcome) => {
                transition(&mut state, SendState::Succeeded, events);
                info!(
                    thread_id = %outcome.thread_id,
                    created_thread = outcome.created_thread,
                    chars = outcome.content.chars().count(),
                    "Send succeeded"
                );
                Ok(outcome)
            }
            Err(err) => {
                warn!(failed_in = ?state, kind = ?err.kind(), "Send failed: {}", err);
                transition(&mut state, SendState::Failed, events);
                Err(err)
            }
        }
    }

    async fn attempt(
        &self,
        ctx: &SendContext,
        draft: &Draft,
        events: &EventSink,
        state: &mut SendState,
    ) -> Result<SendOutcome, ChatError> {
        transition(state, SendState::Validating, events);
        self.validate(ctx, draft)?;
        let api_key_id = self.resolve_key(ctx).await?;

        let request = SendRequest::new(draft.text.clone(), ctx.provider.clone(), ctx.model_name.clone())
            .with_thread(ctx.thread_id.clone())
            .with_api_key(api_key_id)
            .with_streaming(ctx.stream);

        transition(state, SendState::AwaitingResponse, events);
        let response = self.api.chat(&request, draft.attachment.clone()).await?;

        let (thread_id, content, termination) = match response {
            ApiResponse::Stream(body) => {
                transition(state, SendState::StreamingDecode, events);
                let completion = decode_stream(body, ctx.thread_id.clone(), self.idle_timeout, |delta| {
                    events.emit(ChatEvent::Delta(delta.to_string()))
                })
                .await?;
                let thread_id = completion
                    .thread_id
                    .ok_or(StreamFailure::MissingThreadId)?;
                (thread_id, completion.content, completion.termination)
            }
            ApiResponse::Json(body) => {
                transition(state, SendState::ParsingJson, events);
                let (thread_id, content) = parse_json_reply(body, ctx.thread_id.as_deref())?;
                (thread_id, content, Termination::Clean)
            }
        };

        Ok(SendOutcome {
            thread_id,
            content,
            created_thread: ctx.thread_id.is_none(),
            termination,
        })
    }

    fn validate(&self, ctx: &SendContext, draft: &Draft) -> Result<(), ValidationError> {
        if draft.text.trim().is_empty() && draft.attachment.is_none() {
            return Err(ValidationError::EmptyMessage);
        }

        let length = draft.text.chars().count();
        if length > self.settings.max_message_chars {
            return Err(ValidationError::MessageTooLong {
                length,
                max: self.settings.max_message_chars,
            });
        }

        if let Some(attachment) = &draft.attachment {
            if attachment.len() > self.settings.max_attachment_bytes {
                return Err(ValidationError::AttachmentTooLarge {
                    size: attachment.len(),
                    max: self.settings.max_attachment_bytes,
                });
            }
        }

        if ctx.provider.trim().is_empty() {
            return Err(ValidationError::NoProvider);
        }
        if ctx.model_name.trim().is_empty() {
            return Err(ValidationError::NoModel);
        }
        Ok(())
    }

    async fn resolve_key(&self, ctx: &SendContext) -> Result<String, ChatError> {
        let provider = normalize_provider(&ctx.provider);
        let keys = self.keys.active_keys(&provider).await?;
        match select_key(&keys, &ctx.model_name) {
            Some(key) => {
                debug!(key_id = %key.id, key_model = %key.model_name, "Resolved API key");
                Ok(key.id.clone())
            }
            None => Err(ChatError::Credential { provider }),
        }
    }
}

fn transition(state: &mut SendState, next: SendState, events: &EventSink) {
    debug!(from = ?state, to = ?next, "Send state transition");
    *state = next;
    events.emit(ChatEvent::StateChanged(next));
}

/// Interpret a single JSON chat reply
fn parse_json_reply(body: Value, fallback_thread: Option<&str>) -> Result<(String, String), ChatError> {
    let payload: StreamPayload = serde_json::from_value(body)?;

    if let Some(message) = payload.error {
        return Err(StreamFailure::ServerError(message).into());
    }

    let content = payload.content.ok_or_else(|| StreamFailure::MalformedEvent {
        reason: "reply carries no content".to_string(),
    })?;
    let thread_id = payload
        .thread_id
        .or_else(|| fallback_thread.map(str::to_string))
        .ok_or(StreamFailure::MissingThreadId)?;

    Ok((thread_id, content))
}
