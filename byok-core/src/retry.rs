//! Retry target resolution
//!
//! Retrying an assistant message replays the user message that prompted it
//! as a new send on the same thread. The original reply stays in history.

use crate::error::ReplayError;
use crate::protocol::{Message, MessageRole};

/// Find the user message to replay for assistant message `assistant_id`
pub fn replay_source<'a>(history: &'a [Message], assistant_id: &str) -> Result<&'a Message, ReplayError> {
    let position = history
        .iter()
        .position(|message| message.id == assistant_id)
        .ok_or_else(|| ReplayError::MessageNotFound {
            id: assistant_id.to_string(),
        })?;

    let target = &history[position];
    if target.role != MessageRole::Assistant {
        return Err(ReplayError::NotAssistant {
            id: assistant_id.to_string(),
            role: target.role.to_string(),
        });
    }

    history[..position]
        .iter()
        .rev()
        .find(|message| message.role == MessageRole::User)
        .ok_or_else(|| ReplayError::NoPrecedingUserMessage {
            id: assistant_id.to_string(),
        })
}
