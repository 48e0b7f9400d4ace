//! Inbound push-envelope decoding for spec status events.
//!
//! The wire shape is the Pub/Sub push contract: an outer JSON envelope
//! whose `message.data` is base64-encoded JSON carrying the actual status
//! payload. Every decode failure is `bad_input` (HTTP 400); nothing in
//! here touches the store.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use super::plan::{RAW_SNIPPET_MAX_BYTES, SpecStatus};

/// Outer push envelope as delivered to the webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: String,
}

/// The message object inside the envelope. Field names on the wire are
/// camelCase.
#[derive(Debug, Clone, Deserialize)]
pub struct PushMessage {
    pub data: String,
    #[serde(default, rename = "messageId")]
    pub message_id: String,
    #[serde(default, rename = "publishTime")]
    pub publish_time: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// A fully decoded and validated status event, ready for the kernel.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub plan_id: String,
    pub spec_index: u32,
    pub status: SpecStatus,
    pub stage: Option<String>,
    pub details: Option<String>,
    pub correlation_id: Option<String>,
    /// Sender-supplied occurrence time; used for the history entry when
    /// present.
    pub timestamp: Option<DateTime<Utc>>,
    /// Empty when the sender assigned no id; such deliveries are never
    /// deduplicated.
    pub message_id: String,
    /// Decoded inner payload text, truncated for history/audit.
    pub raw_snippet: String,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed push envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("message data is empty or missing")]
    EmptyData,
    #[error("message data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("message data is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("message payload is not valid JSON: {0}")]
    Payload(#[source] serde_json::Error),
    #[error("invalid status payload: {0}")]
    Schema(String),
}

#[derive(Debug, Deserialize)]
struct RawStatusPayload {
    plan_id: String,
    spec_index: i64,
    status: String,
    #[serde(default)]
    stage: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    correlation_id: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Parse the raw webhook body into a validated [`StatusEvent`].
pub fn decode_push_envelope(body: &[u8]) -> Result<StatusEvent, DecodeError> {
    let envelope: PushEnvelope = serde_json::from_slice(body).map_err(DecodeError::Envelope)?;
    decode_status_event(&envelope)
}

/// Decode `message.data` and validate the status payload schema.
pub fn decode_status_event(envelope: &PushEnvelope) -> Result<StatusEvent, DecodeError> {
    if envelope.message.data.is_empty() {
        return Err(DecodeError::EmptyData);
    }
    let decoded = BASE64_STANDARD.decode(&envelope.message.data)?;
    let text = String::from_utf8(decoded)?;

    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(DecodeError::Payload)?;
    if !value.is_object() {
        return Err(DecodeError::Schema(
            "payload must be a JSON object".to_string(),
        ));
    }
    let raw: RawStatusPayload =
        serde_json::from_value(value).map_err(|err| DecodeError::Schema(err.to_string()))?;

    if raw.plan_id.is_empty() || Uuid::parse_str(&raw.plan_id).is_err() {
        return Err(DecodeError::Schema(format!(
            "plan_id must be a UUID string, got {:?}",
            raw.plan_id
        )));
    }
    if raw.spec_index < 0 || raw.spec_index > i64::from(u32::MAX) {
        return Err(DecodeError::Schema(format!(
            "spec_index must be a non-negative integer, got {}",
            raw.spec_index
        )));
    }
    let Some(status) = SpecStatus::from_status(&raw.status) else {
        return Err(DecodeError::Schema(format!(
            "status must be one of blocked|running|finished|failed, got {:?}",
            raw.status
        )));
    };
    let timestamp = match raw.timestamp.as_deref() {
        None | Some("") => None,
        Some(raw_ts) => Some(
            DateTime::parse_from_rfc3339(raw_ts)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|err| {
                    DecodeError::Schema(format!("timestamp must be RFC3339: {err}"))
                })?,
        ),
    };

    Ok(StatusEvent {
        plan_id: raw.plan_id,
        spec_index: raw.spec_index as u32,
        status,
        stage: raw.stage.filter(|s| !s.is_empty()),
        details: raw.details,
        correlation_id: raw.correlation_id,
        timestamp,
        message_id: envelope.message.message_id.clone(),
        raw_snippet: truncate_snippet(&text),
    })
}

/// Truncate the decoded payload to the history snippet budget, on a char
/// boundary.
fn truncate_snippet(text: &str) -> String {
    if text.len() <= RAW_SNIPPET_MAX_BYTES {
        return text.to_string();
    }
    let mut end = RAW_SNIPPET_MAX_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope_for(payload: &serde_json::Value, message_id: &str) -> Vec<u8> {
        let data = BASE64_STANDARD.encode(serde_json::to_vec(payload).unwrap());
        serde_json::to_vec(&json!({
            "message": {
                "data": data,
                "messageId": message_id,
                "publishTime": "2025-06-01T12:00:00Z",
                "attributes": {}
            },
            "subscription": "projects/p/subscriptions/s"
        }))
        .unwrap()
    }

    const PID: &str = "11111111-1111-1111-1111-111111111111";

    #[test]
    fn well_formed_envelope_decodes() {
        let body = envelope_for(
            &json!({"plan_id": PID, "spec_index": 2, "status": "finished", "stage": "review"}),
            "m-1",
        );
        let event = decode_push_envelope(&body).unwrap();
        assert_eq!(event.plan_id, PID);
        assert_eq!(event.spec_index, 2);
        assert_eq!(event.status, SpecStatus::Finished);
        assert_eq!(event.stage.as_deref(), Some("review"));
        assert_eq!(event.message_id, "m-1");
        assert!(event.raw_snippet.contains("finished"));
    }

    #[test]
    fn malformed_outer_json_is_rejected() {
        assert!(matches!(
            decode_push_envelope(b"{not json"),
            Err(DecodeError::Envelope(_))
        ));
    }

    #[test]
    fn missing_message_field_is_rejected() {
        assert!(matches!(
            decode_push_envelope(br#"{"subscription": "s"}"#),
            Err(DecodeError::Envelope(_))
        ));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let body =
            serde_json::to_vec(&json!({"message": {"data": "!!not-base64!!"}})).unwrap();
        assert!(matches!(
            decode_push_envelope(&body),
            Err(DecodeError::Base64(_))
        ));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let data = BASE64_STANDARD.encode(b"[1, 2, 3]");
        let body = serde_json::to_vec(&json!({"message": {"data": data}})).unwrap();
        assert!(matches!(
            decode_push_envelope(&body),
            Err(DecodeError::Schema(_))
        ));
    }

    #[test]
    fn unknown_status_is_rejected() {
        let body = envelope_for(
            &json!({"plan_id": PID, "spec_index": 0, "status": "done"}),
            "m-1",
        );
        assert!(matches!(
            decode_push_envelope(&body),
            Err(DecodeError::Schema(_))
        ));
    }

    #[test]
    fn negative_spec_index_is_rejected() {
        let body = envelope_for(
            &json!({"plan_id": PID, "spec_index": -1, "status": "running"}),
            "m-1",
        );
        assert!(matches!(
            decode_push_envelope(&body),
            Err(DecodeError::Schema(_))
        ));
    }

    #[test]
    fn non_uuid_plan_id_is_rejected() {
        let body = envelope_for(
            &json!({"plan_id": "plan-7", "spec_index": 0, "status": "running"}),
            "m-1",
        );
        assert!(matches!(
            decode_push_envelope(&body),
            Err(DecodeError::Schema(_))
        ));
    }

    #[test]
    fn missing_message_id_defaults_to_empty() {
        let payload = json!({"plan_id": PID, "spec_index": 0, "status": "running"});
        let data = BASE64_STANDARD.encode(serde_json::to_vec(&payload).unwrap());
        let body = serde_json::to_vec(&json!({"message": {"data": data}})).unwrap();
        let event = decode_push_envelope(&body).unwrap();
        assert!(event.message_id.is_empty());
    }

    #[test]
    fn bad_timestamp_is_rejected_and_empty_timestamp_ignored() {
        let bad = envelope_for(
            &json!({"plan_id": PID, "spec_index": 0, "status": "running", "timestamp": "yesterday"}),
            "m",
        );
        assert!(matches!(
            decode_push_envelope(&bad),
            Err(DecodeError::Schema(_))
        ));

        let empty = envelope_for(
            &json!({"plan_id": PID, "spec_index": 0, "status": "running", "timestamp": ""}),
            "m",
        );
        assert!(decode_push_envelope(&empty).unwrap().timestamp.is_none());
    }

    #[test]
    fn snippet_is_truncated_on_a_char_boundary() {
        let long_stage = "é".repeat(800);
        let body = envelope_for(
            &json!({"plan_id": PID, "spec_index": 0, "status": "running", "stage": long_stage}),
            "m",
        );
        let event = decode_push_envelope(&body).unwrap();
        assert!(event.raw_snippet.len() <= RAW_SNIPPET_MAX_BYTES);
        // Must still be valid UTF-8 (guaranteed by the String type) and
        // non-trivially populated.
        assert!(event.raw_snippet.contains(PID));
    }
}
