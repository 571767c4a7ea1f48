//! Event types broadcast to library consumers.
//!
//! The recorder publishes two streams over `tokio::sync::broadcast`:
//! status transitions and sealed-slice announcements. Both types are
//! serde-serializable (camelCase) so a host application can forward
//! them over whatever IPC it uses.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Emitted whenever a sealed slice has been handed to the delivery sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Where the sealed slice lives on disk.
    pub path: PathBuf,
    /// Number of compressed frames in the slice.
    pub frame_count: u64,
    /// Frame payload bytes (magic header excluded).
    pub payload_bytes: u64,
}

/// Emitted when the recorder state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderStatusEvent {
    pub status: RecorderStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderStatus {
    /// Recorder created but `start()` not yet called.
    Idle,
    /// Actively capturing, encoding, and slicing.
    Recording,
    /// Pipeline stopped; the recorder may be restarted.
    Stopped,
    /// Start failed — see the event detail.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_event_serializes_with_camel_case() {
        let event = SliceEvent {
            seq: 4,
            path: PathBuf::from("/tmp/record/abc.amr"),
            frame_count: 1000,
            payload_bytes: 32_000,
        };

        let json = serde_json::to_value(&event).expect("serialize slice event");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["frameCount"], 1000);
        assert_eq!(json["payloadBytes"], 32_000);

        let round_trip: SliceEvent = serde_json::from_value(json).expect("deserialize slice event");
        assert_eq!(round_trip.frame_count, 1000);
        assert_eq!(round_trip.path, PathBuf::from("/tmp/record/abc.amr"));
    }

    #[test]
    fn status_event_serializes_with_lowercase_status() {
        let event = RecorderStatusEvent {
            status: RecorderStatus::Recording,
            detail: None,
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "recording");
        assert_eq!(json["detail"], serde_json::Value::Null);

        let round_trip: RecorderStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.status, RecorderStatus::Recording);
    }

    #[test]
    fn status_rejects_non_lowercase_values() {
        let invalid = r#""Recording""#;
        assert!(serde_json::from_str::<RecorderStatus>(invalid).is_err());
    }
}
