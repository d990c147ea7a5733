//! Chat session wiring
//!
//! A [`ChatSession`] ties the orchestrator, the key cache and the
//! conversation together and allows one send or retry at a time.

use crate::api::BackendApi;
use crate::config::{ChatSettings, ClientConfig};
use crate::conversation::{Conversation, SharedConversation};
use crate::error::{ChatError, ReplayError, ValidationError};
use crate::events::{ChatEvent, EventSink};
use crate::http::HttpClient;
use crate::keys::KeyCache;
use crate::orchestrator::{Draft, Orchestrator, SendContext};
use crate::protocol::{normalize_provider, ApiKey, Attachment, Message, NewApiKey, SendOutcome};
use crate::retry::replay_source;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

/// Provider and model picked by the user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub provider: Option<String>,
    pub model_name: Option<String>,
    pub stream: bool,
}

impl Selection {
    fn from_settings(settings: &ChatSettings) -> Self {
        Self {
            provider: settings.default_provider.clone(),
            model_name: settings.default_model.clone(),
            stream: settings.stream,
        }
    }
}

/// Releases the in-flight flag when dropped
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, ValidationError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| ValidationError::SendInProgress)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ChatSession {
    api: Arc<BackendApi>,
    keys: Arc<KeyCache>,
    orchestrator: Orchestrator,
    selection: Mutex<Selection>,
    conversation: SharedConversation,
    in_flight: AtomicBool,
    events: EventSink,
}

impl ChatSession {
    /// Create a session and the receiver for its events
    pub fn new(
        api: Arc<BackendApi>,
        settings: ChatSettings,
        idle_timeout: Duration,
    ) -> (Self, UnboundedReceiver<ChatEvent>) {
        let (events, receiver) = EventSink::channel();
        let keys = Arc::new(KeyCache::new(api.clone()));
        let selection = Selection::from_settings(&settings);
        let orchestrator = Orchestrator::new(api.clone(), keys.clone(), settings, idle_timeout);

        let session = Self {
            api,
            keys,
            orchestrator,
            selection: Mutex::new(selection),
            conversation: SharedConversation::new(),
            in_flight: AtomicBool::new(false),
            events,
        };
        (session, receiver)
    }

    /// Build the HTTP stack from a loaded configuration
    pub fn from_config(
        config: &ClientConfig,
    ) -> Result<(Self, UnboundedReceiver<ChatEvent>), ChatError> {
        let client = HttpClient::with_config(&config.server.base_url, &config.connection)?;
        let api = BackendApi::new(Arc::new(client)).with_token(config.server.token.clone());
        Ok(Self::new(
            Arc::new(api),
            config.chat.clone(),
            config.connection.stream_idle_timeout(),
        ))
    }

    pub fn api(&self) -> &Arc<BackendApi> {
        &self.api
    }

    pub fn key_cache(&self) -> &KeyCache {
        &self.keys
    }

    pub fn conversation(&self) -> Conversation {
        self.conversation.snapshot()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.conversation.messages()
    }

    pub fn active_thread(&self) -> Option<String> {
        self.conversation.active_thread()
    }

    pub fn is_sending(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn selection(&self) -> Selection {
        self.selection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pick provider and model; a provider change drops cached keys
    pub fn select_model(&self, provider: impl Into<String>, model_name: impl Into<String>) {
        let provider = provider.into();
        let mut selection = self.selection.lock().unwrap_or_else(PoisonError::into_inner);
        let changed = selection
            .provider
            .as_deref()
            .map(normalize_provider)
            != Some(normalize_provider(&provider));
        if changed {
            self.keys.invalidate();
        }
        selection.provider = Some(provider);
        selection.model_name = Some(model_name.into());
    }

    pub fn set_streaming(&self, stream: bool) {
        self.selection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stream = stream;
    }

    pub fn set_compose(&self, text: impl Into<String>) {
        self.conversation.set_compose_text(text);
    }

    pub fn attach(&self, attachment: Option<Attachment>) {
        self.conversation.set_attachment(attachment);
    }

    /// Send the compose box to the active thread, or start a new one
    pub async fn send(&self) -> Result<SendOutcome, ChatError> {
        let result = self.send_compose().await;
        self.report(result)
    }

    /// Replay the user message behind assistant message `message_id`
    pub async fn retry(&self, message_id: &str) -> Result<SendOutcome, ChatError> {
        let result = self.replay(message_id).await;
        self.report(result)
    }

    /// Make an existing thread active and load its history
    pub async fn open_thread(&self, thread_id: &str) -> Result<usize, ChatError> {
        self.conversation
            .open_thread(thread_id, self.api.as_ref(), &self.events)
            .await
    }

    pub fn start_new_thread(&self) {
        self.conversation.start_new_thread();
    }

    /// Store a provider key; the next send sees it
    pub async fn add_key(&self, key: &NewApiKey) -> Result<ApiKey, ChatError> {
        let created = self.api.create_key(key).await?;
        self.keys.invalidate();
        Ok(created)
    }

    pub async fn delete_key(&self, key_id: &str) -> Result<(), ChatError> {
        self.api.delete_key(key_id).await?;
        self.keys.invalidate();
        Ok(())
    }

    async fn send_compose(&self) -> Result<SendOutcome, ChatError> {
        let _guard = InFlightGuard::acquire(&self.in_flight)?;
        let ctx = self.context(self.conversation.active_thread());
        let draft = self.conversation.compose().to_draft();
        self.dispatch(ctx, draft, true).await
    }

    async fn replay(&self, message_id: &str) -> Result<SendOutcome, ChatError> {
        let _guard = InFlightGuard::acquire(&self.in_flight)?;
        let thread_id = self
            .conversation
            .active_thread()
            .ok_or(ReplayError::NoActiveThread)?;
        let history = self.conversation.messages();
        let source = replay_source(&history, message_id)?;
        info!(
            thread_id = %thread_id,
            assistant_id = message_id,
            user_id = %source.id,
            "Replaying user message"
        );

        let ctx = self.context(Some(thread_id));
        self.dispatch(ctx, Draft::text(source.content.clone()), false)
            .await
    }

    /// Resolve the selection once for a whole attempt
    fn context(&self, thread_id: Option<String>) -> SendContext {
        let selection = self.selection();
        SendContext::new(
            selection.provider.unwrap_or_default(),
            selection.model_name.unwrap_or_default(),
        )
        .with_thread(thread_id)
        .with_streaming(selection.stream)
    }

    async fn dispatch(
        &self,
        ctx: SendContext,
        draft: Draft,
        clear_compose: bool,
    ) -> Result<SendOutcome, ChatError> {
        let outcome = self.orchestrator.send(&ctx, &draft, &self.events).await?;

        // The exchange is stored server-side even if the refetch fails.
        if let Err(err) = self
            .conversation
            .apply_success(&outcome, self.api.as_ref(), &self.events, clear_compose)
            .await
        {
            warn!("History is stale after a successful send: {}", err);
            self.conversation.apply_failure(&err, &self.events);
        }
        Ok(outcome)
    }

    fn report(&self, result: Result<SendOutcome, ChatError>) -> Result<SendOutcome, ChatError> {
        if let Err(err) = &result {
            if matches!(err, ChatError::Credential { .. }) {
                self.keys.invalidate();
            }
            self.conversation.apply_failure(err, &self.events);
        }
        result
    }
}
