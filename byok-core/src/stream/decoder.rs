//! Incremental server-sent event decoder

use crate::error::StreamFailure;
use crate::protocol::{StreamEvent, StreamPayload};
use tracing::{debug, trace};

const DELIMITER: &[u8] = b"\n\n";

/// Splits raw body bytes into stream events
///
/// Bytes are buffered until a blank line completes an event, so events (and
/// multi-byte characters) split across reads are reassembled before parsing.
#[derive(Debug, Default)]
pub struct EventDecoder {
    pending: Vec<u8>,
    events_decoded: usize,
    terminated: bool,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read; returns the events it completed, in order
    ///
    /// Nothing after a terminal event is parsed.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>, StreamFailure> {
        if self.terminated {
            return Ok(Vec::new());
        }
        self.pending.extend_from_slice(chunk);
        if chunk.contains(&b'\r') || self.pending.contains(&b'\r') {
            normalize_line_endings(&mut self.pending);
        }

        let mut events = Vec::new();
        while let Some(end) = find_delimiter(&self.pending) {
            let segment: Vec<u8> = self.pending.drain(..end + DELIMITER.len()).collect();
            for event in self.parse_segment(&segment[..end])? {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    self.terminated = true;
                    self.pending.clear();
                    return Ok(events);
                }
            }
        }
        Ok(events)
    }

    /// Bytes of an incomplete trailing event
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn events_decoded(&self) -> usize {
        self.events_decoded
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Drop the incomplete trailing event, returning its size
    pub fn discard_pending(&mut self) -> usize {
        let len = self.pending.len();
        self.pending.clear();
        len
    }

    fn parse_segment(&mut self, segment: &[u8]) -> Result<Vec<StreamEvent>, StreamFailure> {
        let text = std::str::from_utf8(segment).map_err(|e| StreamFailure::MalformedEvent {
            reason: format!("event is not valid UTF-8: {}", e),
        })?;

        let mut data_lines = Vec::new();
        for line in text.split('\n') {
            if line.is_empty() || line.starts_with(':') {
                // blank line or keep-alive comment
                continue;
            }
            match line.strip_prefix("data:") {
                Some(rest) => data_lines.push(rest.strip_prefix(' ').unwrap_or(rest)),
                None => {
                    return Err(StreamFailure::MalformedEvent {
                        reason: format!("expected 'data:' framing, got '{}'", preview(line)),
                    })
                }
            }
        }

        if data_lines.is_empty() {
            trace!("Skipping keep-alive segment");
            return Ok(Vec::new());
        }

        let data = data_lines.join("\n");
        let payload: StreamPayload =
            serde_json::from_str(&data).map_err(|e| StreamFailure::MalformedEvent {
                reason: format!("invalid JSON payload '{}': {}", preview(&data), e),
            })?;

        self.events_decoded += 1;
        Ok(payload_events(payload))
    }
}

/// Interpret one payload in field order: content, then error, then done
///
/// A payload may carry a delta together with its terminal field; both are
/// returned, delta first. Empty for a payload carrying no known field.
pub fn payload_events(payload: StreamPayload) -> Vec<StreamEvent> {
    let mut events = Vec::with_capacity(2);
    if let Some(content) = payload.content {
        events.push(StreamEvent::Content(content));
    }
    if let Some(message) = payload.error {
        events.push(StreamEvent::Error(message));
    } else if payload.done == Some(true) {
        events.push(StreamEvent::Done {
            thread_id: payload.thread_id,
        });
    }
    if events.is_empty() {
        debug!("Ignoring stream payload without content, error or done");
    }
    events
}

fn find_delimiter(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(DELIMITER.len())
        .position(|window| window == DELIMITER)
}

/// Rewrite CRLF and lone CR line endings to LF, keeping a trailing CR
/// that may be the first half of a CRLF split across reads
fn normalize_line_endings(buffer: &mut Vec<u8>) {
    let mut out = Vec::with_capacity(buffer.len());
    let mut i = 0;
    while i < buffer.len() {
        match buffer[i] {
            b'\r' if i + 1 == buffer.len() => {
                out.push(b'\r');
            }
            b'\r' => {
                out.push(b'\n');
                if buffer[i + 1] == b'\n' {
                    i += 1;
                }
            }
            byte => out.push(byte),
        }
        i += 1;
    }
    *buffer = out;
}

fn preview(text: &str) -> String {
    const MAX: usize = 80;
    if text.chars().count() > MAX {
        let head: String = text.chars().take(MAX).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}
