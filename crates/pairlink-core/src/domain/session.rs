//! Session entity: identity, connection status, and pairing material.
//!
//! A session progresses through these states:
//!
//! ```text
//! Pending  ──►  Connected  ──►  Disconnected  ──►  Pending (reconnect)
//!    │                               │
//!    └───────────────────────────────┴──────────►  Deleted (terminal)
//! ```
//!
//! - `Pending`: a connector exists and is waiting for the network; a QR code
//!   may be shown if the session has never been paired.
//! - `Connected`: the network accepted the session; a bearer token is issued.
//! - `Disconnected`: the connector is gone; a reconnect may be scheduled.
//! - `Deleted`: logged out or removed; the id may be reused by a fresh start.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique, caller-chosen identifier of a session.
pub type SessionId = String;

/// Connection status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Connector constructed; waiting for pairing or for the network.
    Pending,
    /// Connection open; `token` is set.
    Connected,
    /// Connection closed; no live connector.
    Disconnected,
    /// Terminal.  Held in the registry only while teardown is in progress.
    Deleted,
}

impl SessionStatus {
    /// Returns `true` while a connector is (or is about to be) live.
    pub fn is_live(self) -> bool {
        matches!(self, SessionStatus::Pending | SessionStatus::Connected)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Pending => "PENDING",
            SessionStatus::Connected => "CONNECTED",
            SessionStatus::Disconnected => "DISCONNECTED",
            SessionStatus::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// Image encoding of a rendered pairing code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QrFormat {
    Svg,
    Png,
}

/// A rendered pairing code, ready to be embedded in a web page.
///
/// On the wire it is just the data URL (`"data:image/png;base64,…"`); the
/// format is recovered from the media type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct QrArtifact {
    pub format: QrFormat,
    /// `data:` URL carrying the base64-encoded image.
    pub data_url: String,
}

impl From<QrArtifact> for String {
    fn from(artifact: QrArtifact) -> Self {
        artifact.data_url
    }
}

impl From<String> for QrArtifact {
    fn from(data_url: String) -> Self {
        let format = if data_url.starts_with("data:image/png") {
            QrFormat::Png
        } else {
            QrFormat::Svg
        };
        Self { format, data_url }
    }
}

/// Account identity reported by the connector once a connection opens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorIdentity {
    pub display_name: String,
    pub phone_number: String,
}

impl ConnectorIdentity {
    /// Builds an identity from a raw network id such as
    /// `5511999999999:12@s.example.net`.
    ///
    /// Only the leading number is kept: the device suffix after `:` and the
    /// domain after `@` are dropped.
    pub fn from_network_id(network_id: &str, display_name: impl Into<String>) -> Self {
        let user = network_id.split('@').next().unwrap_or_default();
        let number = user.split(':').next().unwrap_or_default();
        Self {
            display_name: display_name.into(),
            phone_number: number.to_string(),
        }
    }
}

/// Full observable state of one session.
///
/// Serialises to the camelCase snapshot returned to pollers and published in
/// `session.update` events.  `qr` / `qrCode` mirror `qr_text` / `qr_artifact`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: SessionId,
    pub status: SessionStatus,
    #[serde(rename = "qr")]
    pub qr_text: Option<String>,
    #[serde(rename = "qrCode")]
    pub qr_artifact: Option<QrArtifact>,
    pub last_qr_at: Option<DateTime<Utc>>,
    pub has_ever_connected: bool,
    pub token: Option<String>,
    pub display_name: String,
    pub phone_number: String,
    pub reconnect_attempts: u32,
}

impl SessionState {
    /// Creates a brand-new `Pending` session with no history.
    pub fn new(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: session_id.into(),
            status: SessionStatus::Pending,
            qr_text: None,
            qr_artifact: None,
            last_qr_at: None,
            has_ever_connected: false,
            token: None,
            display_name: String::new(),
            phone_number: String::new(),
            reconnect_attempts: 0,
        }
    }

    /// Returns the state for a connector restart of an existing session.
    ///
    /// `has_ever_connected`, `reconnect_attempts` and the captured identity
    /// carry over so backoff keeps growing across reconnects.  Pairing
    /// material and the token do not.
    pub fn restarted(&self) -> Self {
        Self {
            status: SessionStatus::Pending,
            qr_text: None,
            qr_artifact: None,
            last_qr_at: None,
            token: None,
            ..self.clone()
        }
    }

    /// Drops all pairing material.
    pub fn clear_qr(&mut self) {
        self.qr_text = None;
        self.qr_artifact = None;
        self.last_qr_at = None;
    }
}

/// Payload of the `session.update` published when a session is deleted.
///
/// Carries only the id: a deleted session has no state left to report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedNotice {
    pub session_id: SessionId,
    pub status: SessionStatus,
}

impl DeletedNotice {
    pub fn new(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: session_id.into(),
            status: SessionStatus::Deleted,
        }
    }
}

/// Mints a fresh opaque bearer token (64 hex characters).
pub fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
