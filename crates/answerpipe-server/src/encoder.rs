//! Internal events to SSE wire frames.

use answerpipe_core::StreamEvent;
use axum::response::sse;

/// The variant tag becomes the SSE `event:` name and the payload becomes
/// the JSON `data:` field. `StreamEvent` already serializes as
/// `{event, data}`, so this is a split of that envelope, not a second
/// encoding.
pub fn encode(event: &StreamEvent) -> sse::Event {
    let envelope = match serde_json::to_value(event) {
        Ok(v) => v,
        Err(e) => {
            // Unreachable with the current types; degrade to an error frame
            // rather than dropping the event on the floor.
            tracing::error!(error = %e, "event serialization failed");
            return sse::Event::default()
                .event("error")
                .data(r#"{"error":"internal encoding failure"}"#);
        }
    };
    let name = envelope["event"].as_str().unwrap_or("message").to_string();
    let data = envelope
        .get("data")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    sse::Event::default().event(name).data(data.to_string())
}
