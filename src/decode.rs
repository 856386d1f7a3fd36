//! Frame payload decoding.
//!
//! Each `data: ` line of a frame carries one JSON object with a `type`
//! discriminator and a `content` field whose shape depends on the type:
//!
//! ```text
//! data: {"type": "progress", "content": "Searching documents"}
//! data: {"type": "task_update", "content": {"task_id": "1", "status": "completed"}}
//! data: {"type": "done"}
//! ```

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::client::ClientError;
use crate::model::{EventKind, StreamEvent, TaskUpdate};
use crate::sse::Frame;

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Value,
}

/// Decode every valid payload line of a frame, in line order.
///
/// A line that fails to deserialize is logged and skipped; it does not
/// affect the other lines. A frame without valid lines yields nothing.
///
/// # Example
/// ```
/// use ragstream::decode::decode_frame;
/// use ragstream::model::StreamEvent;
/// use ragstream::sse::Frame;
///
/// let frame = Frame::new("data: {\"type\":\"progress\",\"content\":\"Searching docs\"}");
/// assert_eq!(decode_frame(&frame), vec![StreamEvent::Progress("Searching docs".into())]);
/// ```
pub fn decode_frame(frame: &Frame) -> Vec<StreamEvent> {
    frame
        .data_lines()
        .filter_map(|data| match decode_data(data) {
            Ok(event) => Some(event),
            Err(err) => {
                warn!(error = %err, line = data, "skipping malformed stream line");
                None
            }
        })
        .collect()
}

/// Decode the payload of one `data: ` line.
pub fn decode_data(data: &str) -> Result<StreamEvent, ClientError> {
    let wire: WireEvent = serde_json::from_str(data)?;

    let event = match EventKind::from_tag(&wire.kind) {
        EventKind::Progress => StreamEvent::Progress(text_of(wire.content, &["message", "content"])),
        EventKind::AnswerChunk => StreamEvent::AnswerChunk(text_of(wire.content, &[])),
        EventKind::TaskUpdate => {
            StreamEvent::TaskUpdate(serde_json::from_value::<TaskUpdate>(wire.content)?)
        }
        EventKind::Error => StreamEvent::Error(text_of(wire.content, &["message", "detail"])),
        EventKind::Done => StreamEvent::Done,
        EventKind::Unknown => StreamEvent::Unknown(wire.kind),
    };
    Ok(event)
}

/// Render event content as display text.
///
/// Strings pass through; objects use the first string-valued field among
/// `fields`; anything else becomes compact JSON.
fn text_of(content: Value, fields: &[&str]) -> String {
    match content {
        Value::String(s) => s,
        Value::Null => String::new(),
        Value::Object(ref map) => fields
            .iter()
            .find_map(|field| map.get(*field).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| content.to_string()),
        other => other.to_string(),
    }
}
