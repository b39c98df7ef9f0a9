//! Outbound event shapes.
//!
//! The push sink receives `{ "type": …, "data": … }`.  Webhooks receive the
//! same plus the originating session id:
//!
//! ```json
//! { "type": "messages.upsert", "data": { … }, "sessionId": "alpha" }
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::session::{QrArtifact, SessionId};

/// Event type names produced by the gateway itself.  Pass-through events keep
/// the connector's own names.
pub mod event_types {
    /// Full session snapshot after any externally visible change.
    pub const SESSION_UPDATE: &str = "session.update";
    /// Pairing code text, with the rendered artifact once it is ready.
    pub const QR_UPDATE: &str = "qr.update";
}

/// Message published to the push sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
}

/// Body POSTed to every webhook endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
    #[serde(rename = "sessionId")]
    pub session_id: Option<SessionId>,
}

/// Payload of a `qr.update` event.
///
/// The low-latency publish carries `qr_code: None`; the post-render publish
/// carries both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrUpdate {
    pub session_id: SessionId,
    pub qr: String,
    pub qr_code: Option<QrArtifact>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::QrFormat;

    #[test]
    fn test_webhook_envelope_has_exactly_three_fields() {
        let env = WebhookEnvelope {
            event_type: "messages.upsert".to_string(),
            data: serde_json::json!({"id": 1}),
            session_id: Some("alpha".to_string()),
        };
        let json = serde_json::to_value(&env).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert_eq!(json["type"], "messages.upsert");
        assert_eq!(json["data"]["id"], 1);
        assert_eq!(json["sessionId"], "alpha");
    }

    #[test]
    fn test_webhook_envelope_serialises_missing_session_as_null() {
        let env = WebhookEnvelope {
            event_type: "x".to_string(),
            data: serde_json::Value::Null,
            session_id: None,
        };
        let json = serde_json::to_value(&env).unwrap();
        assert!(json["sessionId"].is_null());
    }

    #[test]
    fn test_push_message_uses_type_key() {
        let msg = PushMessage {
            event_type: event_types::SESSION_UPDATE.to_string(),
            data: serde_json::json!({}),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "session.update");
    }

    #[test]
    fn test_qr_update_serialises_artifact_as_qr_code() {
        let update = QrUpdate {
            session_id: "alpha".to_string(),
            qr: "2@abc".to_string(),
            qr_code: Some(QrArtifact {
                format: QrFormat::Svg,
                data_url: "data:image/svg+xml;base64,AAAA".to_string(),
            }),
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["qr"], "2@abc");
        assert_eq!(json["qrCode"], "data:image/svg+xml;base64,AAAA");
    }
}
