//! Stream frame protocol
//!
//! The real-time channel carries JSON frames, each a single-key tagged
//! object: `{"Log": {...}}`, `{"Status": {...}}` or `{"Done": null}`.
//! Decoding inspects the discriminant key once and dispatches; unknown
//! discriminants decode to [`StreamFrame::Ignored`] so newer backends
//! can add event kinds without breaking older harnesses. Anything that
//! is not a single-key object, or a known tag with an undecodable body,
//! is a protocol error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::types::RunStatus;
use crate::common::{Error, Result};

/// One decoded frame from the run log stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Log(LogEvent),
    Status(StatusEvent),
    /// End of stream; emitted at most once, nothing after it is valid
    Done,
    /// A frame with an unknown discriminant, kept only for accounting
    Ignored(String),
}

impl StreamFrame {
    pub fn as_log(&self) -> Option<&LogEvent> {
        match self {
            StreamFrame::Log(event) => Some(event),
            _ => None,
        }
    }

    pub fn as_status(&self) -> Option<&StatusEvent> {
        match self {
            StreamFrame::Status(event) => Some(event),
            _ => None,
        }
    }
}

/// A log line emitted by a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub pipeline: String,
    pub job_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// A pipeline status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub pipeline: String,
    pub status: RunStatus,
}

/// Decode one frame of the stream protocol
pub fn decode_frame(text: &str) -> Result<StreamFrame> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|err| Error::Protocol(format!("frame is not valid JSON: {err}")))?;

    let object = value
        .as_object()
        .ok_or_else(|| Error::Protocol(format!("frame is not an object: {text}")))?;

    if object.len() != 1 {
        return Err(Error::Protocol(format!(
            "frame must carry exactly one discriminant key, got {}",
            object.len()
        )));
    }
    let (tag, body) = match object.iter().next() {
        Some(entry) => entry,
        None => return Err(Error::Protocol("empty frame object".to_string())),
    };

    match tag.as_str() {
        "Log" => serde_json::from_value(body.clone())
            .map(StreamFrame::Log)
            .map_err(|err| Error::Protocol(format!("malformed Log frame: {err}"))),
        "Status" => serde_json::from_value(body.clone())
            .map(StreamFrame::Status)
            .map_err(|err| Error::Protocol(format!("malformed Status frame: {err}"))),
        "Done" => Ok(StreamFrame::Done),
        other => Ok(StreamFrame::Ignored(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::RunOutcome;

    #[test]
    fn decodes_log_frames() {
        let frame = decode_frame(
            r#"{"Log":{"pipeline":"build","job_id":"compile","text":"hello","timestamp":"2024-03-01T12:00:00Z"}}"#,
        )
        .unwrap();
        let log = frame.as_log().expect("expected a log frame");
        assert_eq!(log.pipeline, "build");
        assert_eq!(log.job_id, "compile");
        assert_eq!(log.text, "hello");
    }

    #[test]
    fn decodes_status_frames() {
        let frame = decode_frame(
            r#"{"Status":{"pipeline":"build","status":{"Finished":"Success"}}}"#,
        )
        .unwrap();
        let status = frame.as_status().expect("expected a status frame");
        assert_eq!(status.status, RunStatus::Finished(RunOutcome::Success));
    }

    #[test]
    fn decodes_done_frames() {
        assert_eq!(decode_frame(r#"{"Done":null}"#).unwrap(), StreamFrame::Done);
    }

    #[test]
    fn unknown_tags_are_ignored_not_errors() {
        let frame = decode_frame(r#"{"Telemetry":{"cpu":0.3}}"#).unwrap();
        assert_eq!(frame, StreamFrame::Ignored("Telemetry".to_string()));
    }

    #[test]
    fn invalid_json_is_a_protocol_error() {
        let err = decode_frame("not json at all").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn multi_key_objects_are_protocol_errors() {
        let err = decode_frame(r#"{"Log":{},"Status":{}}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn known_tag_with_bad_body_is_a_protocol_error() {
        let err = decode_frame(r#"{"Log":{"pipeline":42}}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn non_object_frames_are_protocol_errors() {
        let err = decode_frame("[1,2,3]").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
