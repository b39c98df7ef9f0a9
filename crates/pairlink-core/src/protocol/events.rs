//! Events delivered by a protocol connector.
//!
//! The connector owns the wire protocol and its encryption; the gateway never
//! parses network frames.  All it sees is this small catalog:
//!
//! - [`ProtocolEvent::CredentialsChanged`] – key material rotated; persist it.
//! - [`ProtocolEvent::ConnectionUpdate`] – the connection moved to a new
//!   [`ConnectionPhase`], possibly carrying a pairing code or close reason.
//! - [`ProtocolEvent::Domain`] – everything else (messages, presence, group
//!   metadata, reactions …), forwarded opaquely.

use serde::{Deserialize, Serialize};

/// Phase reported in a connection update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    /// Handshake in progress.  Accepts `connecting` on the wire as well.
    #[serde(alias = "connecting")]
    Pending,
    Open,
    Close,
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CloseReason {
    /// The account was unlinked.  Credentials are useless; never reconnect.
    LoggedOut,
    /// The network asked for a fresh connection (e.g. right after pairing).
    RestartRequired,
    /// Any other drop: timeouts, stream errors, connector failures.
    Other {
        #[serde(default)]
        status_code: Option<u16>,
        #[serde(default)]
        message: Option<String>,
    },
}

impl CloseReason {
    /// Convenience constructor for an unclassified drop.
    pub fn other(message: impl Into<String>) -> Self {
        CloseReason::Other {
            status_code: None,
            message: Some(message.into()),
        }
    }
}

/// A change in connection state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    pub phase: Option<ConnectionPhase>,
    /// Raw pairing code text, present while the session awaits a scan.
    #[serde(default)]
    pub qr: Option<String>,
    /// Present when `phase` is `Close`.
    #[serde(default)]
    pub close_reason: Option<CloseReason>,
}

impl ConnectionUpdate {
    pub fn qr(text: impl Into<String>) -> Self {
        Self {
            phase: None,
            qr: Some(text.into()),
            close_reason: None,
        }
    }

    pub fn open() -> Self {
        Self {
            phase: Some(ConnectionPhase::Open),
            qr: None,
            close_reason: None,
        }
    }

    pub fn close(reason: CloseReason) -> Self {
        Self {
            phase: Some(ConnectionPhase::Close),
            qr: None,
            close_reason: Some(reason),
        }
    }
}

/// One event from a session's connector.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    CredentialsChanged,
    ConnectionUpdate(ConnectionUpdate),
    /// Pass-through event; `event_type` is the connector's own name for it.
    Domain {
        event_type: String,
        payload: serde_json::Value,
    },
}

impl ProtocolEvent {
    /// Short name used in log lines; never includes payload contents.
    pub fn kind(&self) -> &str {
        match self {
            ProtocolEvent::CredentialsChanged => "credentials-changed",
            ProtocolEvent::ConnectionUpdate(_) => "connection-state-changed",
            ProtocolEvent::Domain { event_type, .. } => event_type,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_accepts_connecting_alias() {
        let phase: ConnectionPhase = serde_json::from_str("\"connecting\"").unwrap();
        assert_eq!(phase, ConnectionPhase::Pending);
        let phase: ConnectionPhase = serde_json::from_str("\"close\"").unwrap();
        assert_eq!(phase, ConnectionPhase::Close);
    }

    #[test]
    fn test_close_update_deserialises_reason() {
        let json = r#"{"phase":"close","closeReason":{"kind":"loggedOut"}}"#;
        let update: ConnectionUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(update.phase, Some(ConnectionPhase::Close));
        assert_eq!(update.close_reason, Some(CloseReason::LoggedOut));
        assert!(update.qr.is_none());
    }

    #[test]
    fn test_other_reason_fields_are_optional() {
        let reason: CloseReason = serde_json::from_str(r#"{"kind":"other"}"#).unwrap();
        assert_eq!(
            reason,
            CloseReason::Other {
                status_code: None,
                message: None
            }
        );
    }

    #[test]
    fn test_kind_never_exposes_payload() {
        let event = ProtocolEvent::Domain {
            event_type: "messages.upsert".to_string(),
            payload: serde_json::json!({"text": "secret"}),
        };
        assert_eq!(event.kind(), "messages.upsert");
        assert_eq!(ProtocolEvent::CredentialsChanged.kind(), "credentials-changed");
    }
}
