//! Ports: the traits the application layer depends on.
//!
//! Each trait has at least one implementation under `infrastructure`.  The
//! supervisor, QR pipeline and dispatcher only ever see these abstractions,
//! which is what lets the integration tests drive a full session lifecycle
//! with in-process fakes.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use pairlink_core::{ConnectorIdentity, ProtocolEvent, QrArtifact, SessionId, WebhookEnvelope};
use thiserror::Error;
use tokio::sync::mpsc;

// ── Protocol connector ────────────────────────────────────────────────────────

/// Errors raised by a protocol connector or its factory.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("failed to construct connector: {0}")]
    Construct(String),
    #[error("failed to persist credentials: {0}")]
    SaveCredentials(String),
    #[error("logout failed: {0}")]
    Logout(String),
    #[error("terminate failed: {0}")]
    Terminate(String),
}

/// A live connection to the messaging network for one session.
///
/// Implementations own the wire protocol and its encryption.  Events flow
/// the other way, through the channel handed back in [`Connection`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProtocolConnector: Send + Sync {
    /// The account this connector is logged in as, once known.
    fn identity(&self) -> Option<ConnectorIdentity>;

    /// Writes the current key material to the session's credential location.
    async fn save_credentials(&self) -> Result<(), ConnectorError>;

    /// Unlinks the account from the network.  Credentials become useless.
    async fn logout(&self) -> Result<(), ConnectorError>;

    /// Closes the connection without unlinking.
    async fn terminate(&self) -> Result<(), ConnectorError>;
}

/// Everything a factory needs to bring up a connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub session_id: SessionId,
    pub credentials: CredentialLocation,
    /// Overrides the protocol version the connector announces.
    pub protocol_version: Option<[u32; 3]>,
}

/// A freshly constructed connector and its event stream.
///
/// Events for one session arrive in order on `events`.  The stream ends when
/// the connector is dropped or terminated.
pub struct Connection {
    pub connector: Arc<dyn ProtocolConnector>,
    pub events: mpsc::Receiver<ProtocolEvent>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Builds connectors bound to persisted credentials.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    async fn connect(&self, request: ConnectRequest) -> Result<Connection, ConnectorError>;
}

// ── Credential store ──────────────────────────────────────────────────────────

/// Where a connector should read and write one session's key material.
///
/// The blob format inside is owned by the connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialLocation(pub PathBuf);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid session id {0:?}: use letters, digits, '.', '_' or '-'")]
    InvalidSessionId(String),
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-session credential namespaces.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns `true` if credentials were saved for `session_id` before.
    async fn exists(&self, session_id: &str) -> Result<bool, StoreError>;

    /// Allocates the namespace if needed and returns its location.
    async fn ensure(&self, session_id: &str) -> Result<CredentialLocation, StoreError>;

    /// Every session id with a namespace, sorted.
    async fn list(&self) -> Result<Vec<SessionId>, StoreError>;

    /// Deletes the namespace.  Purging a missing namespace is not an error.
    async fn purge(&self, session_id: &str) -> Result<(), StoreError>;
}

// ── Push sink ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push sink has no subscribers")]
    NoSubscribers,
    #[error("push delivery failed: {0}")]
    Delivery(String),
}

/// Low-latency, best-effort event sink.  Must not block.
#[cfg_attr(test, mockall::automock)]
pub trait PushSink: Send + Sync {
    fn deliver(&self, event_type: &str, payload: &serde_json::Value) -> Result<(), PushError>;
}

// ── Webhook transport ─────────────────────────────────────────────────────────

/// One configured webhook destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTarget {
    pub url: String,
    /// Sent as `x-api-key` when present.
    pub api_key: Option<String>,
}

impl WebhookTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("POST {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("POST {url} timed out")]
    Timeout { url: String },
}

/// Sends one webhook envelope and reports the HTTP status code.
///
/// Any status is `Ok`; the caller decides what counts as success.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(&self, target: &WebhookTarget, envelope: &WebhookEnvelope)
        -> Result<u16, WebhookError>;
}

// ── QR renderer ───────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("pairing code cannot be encoded: {0}")]
    Encode(String),
    #[error("image encoding failed: {0}")]
    Image(String),
    #[error("invalid render option: {0}")]
    InvalidOption(String),
}

/// Turns pairing text into an image.  CPU bound; called off the async
/// executor.
#[cfg_attr(test, mockall::automock)]
pub trait QrRenderer: Send + Sync {
    fn render(&self, text: &str) -> Result<QrArtifact, RenderError>;
}
