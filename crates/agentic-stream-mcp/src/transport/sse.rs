//! Server-Sent Events framing for stream consumers.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;

use agentic_stream::{EventCursor, EventId, StoredEvent, StreamConsumer, StreamError, StreamHandle};

/// Name of the frame sent when requested events are no longer buffered.
pub const REPLAY_GAP_EVENT: &str = "replay-gap";

/// Frame carrying one stored event, tagged with its resumable cursor.
pub fn event_frame(handle: &StreamHandle, event: &StoredEvent) -> Event {
    Event::default()
        .id(EventCursor::for_event(handle, event.id).to_string())
        .data(event.payload.to_value().to_string())
}

pub fn gap_frame(requested: EventId, oldest: EventId) -> Event {
    Event::default().event(REPLAY_GAP_EVENT).data(
        serde_json::json!({ "requested": requested, "oldest": oldest }).to_string(),
    )
}

/// Turn a consumer into SSE frames.
///
/// Gaps the consumer reports become `replay-gap` frames. The stream ends when the consumer
/// does, or after `idle` elapses without an event.
pub fn event_stream(
    mut consumer: StreamConsumer,
    idle: Option<Duration>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        loop {
            let next = match idle {
                Some(limit) => match tokio::time::timeout(limit, consumer.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::debug!(stream = %consumer.handle().id, "Idle timeout, closing SSE connection");
                        break;
                    }
                },
                None => consumer.next().await,
            };

            match next {
                Some(Ok(event)) => yield Ok(event_frame(consumer.handle(), &event)),
                Some(Err(StreamError::ReplayGap { requested, oldest })) => {
                    yield Ok(gap_frame(requested, oldest));
                }
                Some(Err(e)) => {
                    tracing::warn!(stream = %consumer.handle().id, "Stream error: {e}");
                    break;
                }
                None => break,
            }
        }

        tracing::debug!(stream = %consumer.handle().id, "SSE connection finished");
    }
}

pub fn sse_response(
    consumer: StreamConsumer,
    idle: Option<Duration>,
    keep_alive: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(event_stream(consumer, idle)).keep_alive(KeepAlive::new().interval(keep_alive))
}
