//! Server-Sent Events decoding.
//!
//! [`SseDecoder`] is a push parser: feed it body chunks as they arrive and
//! it hands back every event those bytes complete. Lines are split on raw
//! bytes, so multi-byte characters cut across chunk boundaries survive.

use std::collections::VecDeque;

use futures::Stream;
use tokio_stream::StreamExt;

use voice_relay_core::error::ProviderError;

use crate::http::transport_error;

/// A parsed SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect the events it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let raw = &self.pending[start..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = String::from_utf8_lossy(raw).into_owned();
            start = end + 1;
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        self.pending.drain(..start);
        events
    }

    /// Flush whatever is buffered once the body has ended.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(event) = self.process_line(line.trim_end_matches('\r')) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        Some(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.id.take(),
        })
    }
}

struct SseState<S> {
    body: S,
    decoder: SseDecoder,
    ready: VecDeque<SseEvent>,
    done: bool,
}

/// Decode a response body as a stream of SSE events.
pub fn sse_events(
    response: reqwest::Response,
) -> impl Stream<Item = Result<SseEvent, ProviderError>> + Send {
    let state = SseState {
        body: Box::pin(response.bytes_stream()),
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => state.ready.extend(state.decoder.push(&chunk)),
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(transport_error(e)), state));
                }
                None => {
                    state.done = true;
                    state.ready.extend(state.decoder.finish());
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: progress\ndata: {\"status\":\"progress\"}\n\n");
        assert_eq!(events, vec![SseEvent {
            event: Some("progress".into()),
            data: r#"{"status":"progress"}"#.into(),
            id: None,
        }]);
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: hel").is_empty());
        assert!(decoder.push(b"lo\r\n").is_empty());
        let events = decoder.push(b"\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn test_multibyte_split_survives() {
        let text = "data: café\n\n".as_bytes();
        // Split inside the two-byte 'é'.
        let cut = text.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&text[..cut]).is_empty());
        let events = decoder.push(&text[cut..]);
        assert_eq!(events[0].data, "café");
    }

    #[test]
    fn test_multiline_data_and_comments() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keepalive\ndata: a\ndata: b\nid: 7\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "a\nb");
        assert_eq!(events[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        let event = decoder.finish().unwrap();
        assert_eq!(event.data, "tail");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_event_without_data_is_dropped() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: ping\n\n").is_empty());
        let events = decoder.push(b"data: x\n\n");
        assert_eq!(events[0].event, None);
    }
}
