//! SSE plumbing for the LLM adapter.
//!
//! The chat completion arrives as server-sent events. Incoming bytes
//! are buffered, complete events (delimited by a blank line) are
//! drained, and each `data:` payload is handed to a parser closure
//! that keeps its own assembly state across events.

use futures_util::StreamExt;

use crate::util::from_reqwest;
use invorto_domain::error::Result;
use invorto_domain::stream::{BoxStream, LlmEvent};

/// Pull every complete `data:` payload out of the buffer, leaving any
/// trailing partial event in place for the next read.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();

    // Find the end of the last complete event; everything after it is
    // a partial event that stays buffered.
    let mut consumed = 0;
    while let Some(end) = buffer[consumed..].find("\n\n") {
        let block = &buffer[consumed..consumed + end];
        for line in block.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
        consumed += end + 2;
    }
    buffer.drain(..consumed);

    payloads
}

/// Turn an SSE `reqwest::Response` into a stream of LLM events.
///
/// `parse_data` is `FnMut` so the caller can assemble tool-call
/// fragments across events. A trailing partial event is flushed when
/// the body ends, and a synthetic `Done` is appended if the provider
/// never sent one.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<LlmEvent>>
where
    F: FnMut(&str) -> Vec<Result<LlmEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut body = response.bytes_stream();
        let mut buffer = String::new();
        let mut done_emitted = false;

        'read: loop {
            let next = body.next().await;
            let at_end = next.is_none();
            match next {
                Some(Ok(bytes)) => buffer.push_str(&String::from_utf8_lossy(&bytes)),
                Some(Err(e)) => {
                    yield Err(from_reqwest("llm", e));
                    break 'read;
                }
                None => {
                    // Body finished; force out a trailing partial event.
                    if buffer.trim().is_empty() {
                        break 'read;
                    }
                    buffer.push_str("\n\n");
                }
            }

            for data in drain_data_lines(&mut buffer) {
                for event in parse_data(&data) {
                    done_emitted |= matches!(&event, Ok(LlmEvent::Done { .. }));
                    yield event;
                }
            }

            if at_end {
                break 'read;
            }
        }

        if !done_emitted {
            yield Ok(LlmEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
