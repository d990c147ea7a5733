//! Streaming response decoding
//!
//! [`EventDecoder`] frames raw bytes into [`StreamEvent`]s; [`decode_stream`]
//! drives it over an open body until a terminal event, the end of the stream,
//! or an idle timeout.

mod decoder;

pub use decoder::{payload_events, EventDecoder};

use crate::error::{ChatError, StreamFailure};
use crate::http::ByteStream;
use crate::protocol::{StreamEvent, Termination};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, warn};

/// What a decoded stream produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCompletion {
    /// Thread named by the terminal event, or the caller's
    pub thread_id: Option<String>,

    /// Concatenated deltas in receipt order
    pub content: String,

    pub termination: Termination,
}

/// Decode an event stream to completion
///
/// `on_delta` sees every content delta as soon as it is decoded. Each read
/// must arrive within `idle`, otherwise the decode fails with
/// [`ChatError::Timeout`] and the partial content is dropped.
pub async fn decode_stream<F>(
    mut stream: ByteStream,
    fallback_thread: Option<String>,
    idle: Duration,
    mut on_delta: F,
) -> Result<StreamCompletion, ChatError>
where
    F: FnMut(&str),
{
    let mut decoder = EventDecoder::new();
    let mut content = String::new();
    let mut deltas = 0usize;

    loop {
        let next = match tokio::time::timeout(idle, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                warn!(
                    "Stream idle for {} ms after {} deltas",
                    idle.as_millis(),
                    deltas
                );
                return Err(ChatError::Timeout(format!(
                    "no stream data within {} ms",
                    idle.as_millis()
                )));
            }
        };

        let chunk = match next {
            Some(chunk) => chunk?,
            None => break,
        };

        for event in decoder.push(&chunk)? {
            match event {
                StreamEvent::Content(delta) => {
                    deltas += 1;
                    content.push_str(&delta);
                    on_delta(&delta);
                }
                StreamEvent::Error(message) => {
                    warn!("Server reported an error mid-stream: {}", message);
                    return Err(StreamFailure::ServerError(message).into());
                }
                StreamEvent::Done { thread_id } => {
                    debug!(
                        termination = "clean",
                        deltas, "Stream finished with terminal marker"
                    );
                    return Ok(StreamCompletion {
                        thread_id: thread_id.or(fallback_thread),
                        content,
                        termination: Termination::Clean,
                    });
                }
            }
        }
    }

    let leftover = decoder.discard_pending();
    if leftover > 0 {
        debug!("Discarding {} bytes of incomplete trailing event", leftover);
    }

    if deltas == 0 {
        return Err(StreamFailure::NoContent.into());
    }

    warn!(
        termination = "truncated",
        deltas, "Stream ended without a terminal marker; keeping received content"
    );
    Ok(StreamCompletion {
        thread_id: fallback_thread,
        content,
        termination: Termination::Truncated,
    })
}
