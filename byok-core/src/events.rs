//! Notifications emitted to the presentation layer

use crate::error::ErrorKind;
use crate::orchestrator::SendState;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::trace;

/// Something the user should see
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The send state machine moved
    StateChanged(SendState),

    /// Partial assistant text, in receipt order
    Delta(String),

    /// A first send created a thread, which is now active
    ThreadCreated { thread_id: String },

    /// The server history of the active thread replaced the local one
    HistoryRefreshed { thread_id: String, count: usize },

    /// A send or retry failed
    Failed { kind: ErrorKind, notice: String },
}

/// Sending half of the event channel
///
/// Emitting never fails: once the receiver is gone events are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: UnboundedSender<ChatEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: ChatEvent) {
        if self.tx.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }
}
