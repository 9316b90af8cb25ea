//! Newline-delimited JSON encoding of a mode's [`Event`] stream (§4.6).
//!
//! A mode's [`EventStream`](crate::mode::EventStream) already produces events
//! in total order from a single task; this module's job is narrow: guarantee
//! the wire contract that exactly one terminal event (`complete` or `failed`)
//! ends the stream, and stop promptly once it's seen so a client that keeps
//! reading after the orchestrator logically finished doesn't hang.

use std::pin::Pin;

use futures::{Stream, StreamExt};

use crate::error::FailureKind;
use crate::event::Event;
use crate::mode::EventStream;

/// One line of the NDJSON wire stream: an event plus its terminating `\n`.
pub type EncodedStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Wrap a mode's event stream so it terminates after exactly one terminal
/// event, serializing each [`Event`] to one JSON line.
///
/// If the underlying stream ends without ever yielding a terminal event
/// (a bug in a mode implementation, not a behavior any mode here should
/// exhibit), a synthesized `failed{kind=internal}` line is appended so the
/// wire contract still holds — mirroring the teacher's own
/// `yield StreamChunk::done(...); return;` pattern of always closing with a
/// terminal chunk.
pub fn encode_events(events: EventStream) -> EncodedStream {
    Box::pin(async_stream::stream! {
        let mut events = events;
        let mut saw_terminal = false;

        while let Some(event) = events.next().await {
            let is_terminal = event.is_terminal();
            yield encode_line(&event);
            if is_terminal {
                saw_terminal = true;
                break;
            }
        }

        if !saw_terminal {
            yield encode_line(&Event::failed(
                FailureKind::Internal,
                "event stream ended without a terminal event",
            ));
        }
    })
}

fn encode_line(event: &Event) -> String {
    match serde_json::to_string(event) {
        Ok(mut line) => {
            line.push('\n');
            line
        }
        // An Event that fails to serialize is itself a bug, but the wire
        // contract still needs a line here rather than a silent gap.
        Err(e) => format!(
            "{{\"type\":\"failed\",\"kind\":\"internal\",\"message\":\"failed to encode event: {e}\"}}\n"
        ),
    }
}
