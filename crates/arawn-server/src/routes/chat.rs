//! Streaming request endpoint — the one thin reference adapter demonstrating
//! the core's boundary (§6.2). Everything past accepting a [`RequestEnvelope`]
//! and forwarding its encoded event stream belongs to the orchestrator core.

use std::convert::Infallible;

use axum::{
    Json,
    extract::State,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use futures::StreamExt;
use futures::stream::Stream;
use tokio_util::sync::CancellationToken;

use arawn_orchestrator::{RequestEnvelope, encode_events, handle_request};

use crate::error::ServerError;
use crate::state::AppState;

const MAX_INPUT_BYTES: usize = 100 * 1024;

/// POST /api/v1/requests/stream — submit a [`RequestEnvelope`] and stream its
/// NDJSON event sequence back as Server-Sent Events, one `message` event per
/// line.
pub async fn request_stream_handler(
    State(state): State<AppState>,
    Json(envelope): Json<RequestEnvelope>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ServerError> {
    if envelope.input.len() > MAX_INPUT_BYTES {
        return Err(ServerError::BadRequest(format!(
            "input too large: {} bytes (max {} bytes)",
            envelope.input.len(),
            MAX_INPUT_BYTES
        )));
    }

    tracing::debug!(
        session_id = ?envelope.session_id,
        mode = ?envelope.mode,
        input_len = envelope.input.len(),
        "request received"
    );

    let cancel = CancellationToken::new();
    let events = handle_request(state.orchestrator.clone(), envelope, cancel.clone());
    let lines = encode_events(events);

    // Dropping the stream (client disconnect) drops this guard, cancelling
    // any tool calls still in flight for this request.
    let sse_stream = async_stream::stream! {
        let _cancel_guard = cancel.drop_guard();
        let mut lines = std::pin::pin!(lines);
        while let Some(line) = lines.next().await {
            yield Ok(SseEvent::default().data(line));
        }
    };

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()))
}
