//! Server-sent-event framing for classified events.

use crate::inference::types::ClassifiedEvent;

/// Frame one event as `data: <json>\n\n` for a live-update channel.
pub fn frame_event(event: &ClassifiedEvent) -> String {
    match serde_json::to_string(event) {
        Ok(json) => format!("data: {json}\n\n"),
        Err(_) => "data: {\"type\":\"error\",\"content\":\"unserializable event\"}\n\n".to_string(),
    }
}
