// ABOUTME: Server-Sent Events helpers for session event streams
// ABOUTME: Turns session events into `data:` frames with periodic keep-alive comments

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tracing::warn;
use warden_events::{Event, EventStream};

pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Wrap a stream in an SSE response with standard keep-alive settings
pub fn create_sse_response<S>(stream: S) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>>
where
    S: Stream<Item = Result<SseEvent, Infallible>> + Send + 'static,
{
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

/// One frame per session event, its JSON as the data line
pub fn event_frame(event: &Event) -> Result<SseEvent, serde_json::Error> {
    let json = serde_json::to_string(event)?;
    Ok(SseEvent::default().data(json))
}

pub fn session_frames(events: EventStream) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    events.filter_map(|event| async move {
        match event_frame(&event) {
            Ok(frame) => Some(Ok(frame)),
            Err(e) => {
                warn!(seq = event.seq, error = %e, "Failed to serialize event for SSE");
                None
            }
        }
    })
}
