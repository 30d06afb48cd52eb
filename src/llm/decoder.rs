//! Incremental decoder for the chat-completions event stream
//!
//! The endpoint answers with newline-delimited records. Only records that
//! start with `data: ` matter; the payload is either a JSON delta wrapper or
//! the `[DONE]` sentinel.

use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use std::pin::Pin;
use thiserror::Error;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// Decoded stream event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One content fragment
    Delta(String),
    /// End of stream, by sentinel or by end of input. Emitted exactly once.
    Done,
}

/// A single malformed `data:` record. Never escapes this module.
#[derive(Debug, Error)]
#[error("malformed stream frame: {0}")]
pub struct DecodeFrameError(#[from] serde_json::Error);

#[derive(Debug, Deserialize)]
struct ChunkFrame {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Parse one `data:` payload into at most one content fragment.
///
/// Frames without content (the role announcement, the final `finish_reason`
/// frame, usage frames with no choices) yield `None`.
pub fn parse_frame(payload: &str) -> Result<Option<String>, DecodeFrameError> {
    let frame: ChunkFrame = serde_json::from_str(payload)?;
    Ok(frame
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

/// Push-based decoder state.
///
/// Bytes are buffered only up to the next newline, so a record or a
/// multi-byte character split across chunks is reassembled before decoding.
/// `\n` never occurs inside a UTF-8 multi-byte sequence, which makes the
/// newline a safe split point on raw bytes.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: Vec<u8>,
    finished: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the sentinel was seen or `finish` was called
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one raw chunk, returning the events completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        self.pending.extend_from_slice(chunk);
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let record: Vec<u8> = self.pending.drain(..=newline).collect();
            self.decode_record(&record[..newline], &mut events);
            if self.finished {
                // Anything after the sentinel is ignored
                self.pending.clear();
                break;
            }
        }
        events
    }

    /// Signal end of input. Decodes an unterminated trailing record and emits
    /// `Done` unless the sentinel already did.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        let rest = std::mem::take(&mut self.pending);
        if !rest.is_empty() {
            self.decode_record(&rest, &mut events);
        }
        if !self.finished {
            self.finished = true;
            events.push(StreamEvent::Done);
        }
        events
    }

    fn decode_record(&mut self, raw: &[u8], events: &mut Vec<StreamEvent>) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches('\r');

        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return;
        };

        if payload == DONE_SENTINEL {
            self.finished = true;
            events.push(StreamEvent::Done);
            return;
        }

        match parse_frame(payload) {
            Ok(Some(fragment)) => events.push(StreamEvent::Delta(fragment)),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, payload = %payload, "Dropping malformed stream frame");
            }
        }
    }
}

struct DecodeState<S> {
    body: Pin<Box<S>>,
    decoder: StreamDecoder,
    ready: VecDeque<StreamEvent>,
    exhausted: bool,
}

/// Lazily decode a byte stream into events.
///
/// Pulls one chunk at a time from `body` and yields events as soon as they
/// are complete. Stops reading at the sentinel. A transport error is yielded
/// once and ends the sequence without a `Done` event.
pub fn decode<S, B, E>(body: S) -> impl Stream<Item = Result<StreamEvent, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: StreamDecoder::new(),
        ready: VecDeque::new(),
        exhausted: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if state.exhausted {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.feed(chunk.as_ref());
                    state.ready.extend(events);
                    state.exhausted = state.decoder.is_finished();
                }
                Some(Err(e)) => {
                    state.exhausted = true;
                    return Some((Err(e), state));
                }
                None => {
                    let events = state.decoder.finish();
                    state.ready.extend(events);
                    state.exhausted = true;
                }
            }
        }
    })
}
