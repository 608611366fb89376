//! Conversion of pipeline events into SSE records.
//!
//! Each pipeline notification becomes exactly one named SSE event carrying
//! the serialized payload. Nothing is batched or buffered here: events are
//! written as the run produces them, so a slow consumer still observes
//! partial progress as it happens. The stream ends when the run's event
//! channel closes — with `run-complete` as the final event on success, or
//! without it on an abort.

use axum::response::sse::Event;

use crate::pipeline::models::PipelineEvent;

/// Serialize one pipeline event as an SSE record.
pub fn sse_event(event: &PipelineEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.kind()).data(data)
}
