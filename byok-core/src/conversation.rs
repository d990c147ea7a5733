//! Conversation state reconciliation
//!
//! The server is the source of truth for history. After every successful
//! send the active thread's messages are refetched and replace the local
//! list; nothing is appended optimistically.

use crate::error::ChatError;
use crate::events::{ChatEvent, EventSink};
use crate::orchestrator::Draft;
use crate::protocol::{Attachment, Message, SendOutcome};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Source of thread history
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Messages of `thread_id`, ordered by creation time
    async fn messages(&self, thread_id: &str) -> Result<Vec<Message>, ChatError>;
}

/// Unsent input
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposeState {
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl ComposeState {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.attachment.is_none()
    }

    pub fn to_draft(&self) -> Draft {
        Draft::text(self.text.clone()).with_attachment(self.attachment.clone())
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.attachment = None;
    }
}

/// Active thread, its history and the compose box
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    pub active_thread: Option<String>,
    pub messages: Vec<Message>,
    pub compose: ComposeState,
}

impl Conversation {
    /// Replace the history if `thread_id` is still active
    ///
    /// Returns whether the list was applied.
    pub fn apply_history(&mut self, thread_id: &str, messages: Vec<Message>) -> bool {
        if self.active_thread.as_deref() != Some(thread_id) {
            debug!(
                thread_id,
                active = ?self.active_thread,
                "Dropping history for a thread that is no longer active"
            );
            return false;
        }
        self.messages = messages;
        true
    }
}

/// [`Conversation`] behind a lock that is never held across an await
#[derive(Debug, Default)]
pub struct SharedConversation {
    inner: Mutex<Conversation>,
}

impl SharedConversation {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Conversation> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Conversation {
        self.lock().clone()
    }

    pub fn active_thread(&self) -> Option<String> {
        self.lock().active_thread.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn compose(&self) -> ComposeState {
        self.lock().compose.clone()
    }

    pub fn set_compose_text(&self, text: impl Into<String>) {
        self.lock().compose.text = text.into();
    }

    pub fn set_attachment(&self, attachment: Option<Attachment>) {
        self.lock().compose.attachment = attachment;
    }

    /// Reconcile after a successful send
    ///
    /// A newly created thread becomes active first. Unless `clear_compose`
    /// is false, the compose box is cleared before the history refetch is
    /// awaited, so it stays cleared when the refetch fails. The fetched list
    /// is applied only if the same thread is still active when it arrives.
    /// Returns the number of messages applied.
    pub async fn apply_success(
        &self,
        outcome: &SendOutcome,
        store: &dyn ThreadStore,
        events: &EventSink,
        clear_compose: bool,
    ) -> Result<usize, ChatError> {
        let thread_id = outcome.thread_id.clone();
        if outcome.created_thread {
            self.lock().active_thread = Some(thread_id.clone());
            info!(thread_id = %thread_id, "New thread is now active");
            events.emit(ChatEvent::ThreadCreated {
                thread_id: thread_id.clone(),
            });
        }

        if clear_compose {
            self.lock().compose.clear();
        }

        let messages = store.messages(&thread_id).await.map_err(|err| {
            warn!(thread_id = %thread_id, "History refetch failed: {}", err);
            err
        })?;

        let count = messages.len();
        if self.lock().apply_history(&thread_id, messages) {
            debug!(thread_id = %thread_id, count, "History refreshed");
            events.emit(ChatEvent::HistoryRefreshed { thread_id, count });
            Ok(count)
        } else {
            Ok(0)
        }
    }

    /// Report a failure; history and compose state are left as they were
    pub fn apply_failure(&self, error: &ChatError, events: &EventSink) {
        events.emit(ChatEvent::Failed {
            kind: error.kind(),
            notice: error.notice(),
        });
    }

    /// Switch to an existing thread and load its history
    pub async fn open_thread(
        &self,
        thread_id: &str,
        store: &dyn ThreadStore,
        events: &EventSink,
    ) -> Result<usize, ChatError> {
        {
            let mut conversation = self.lock();
            conversation.active_thread = Some(thread_id.to_string());
            conversation.messages.clear();
        }
        info!(thread_id, "Opened thread");

        let messages = store.messages(thread_id).await?;
        let count = messages.len();
        if self.lock().apply_history(thread_id, messages) {
            events.emit(ChatEvent::HistoryRefreshed {
                thread_id: thread_id.to_string(),
                count,
            });
        }
        Ok(count)
    }

    /// Leave the current thread; the next send creates a new one
    pub fn start_new_thread(&self) {
        let mut conversation = self.lock();
        conversation.active_thread = None;
        conversation.messages.clear();
        info!("Starting a new thread");
    }
}
