//! Scriptable in-process connector.
//!
//! [`MockConnectorFactory`] hands out [`MockConnector`]s and keeps a
//! [`MockConnectorHandle`] for each one, so a test can play the network's
//! part: issue pairing codes, open and close the connection, and check what
//! the gateway asked the connector to do.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pairlink_core::{CloseReason, ConnectionUpdate, ConnectorIdentity, ProtocolEvent, SessionId};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::application::ports::{
    ConnectRequest, Connection, ConnectorError, ConnectorFactory, ProtocolConnector,
};

const EVENT_BUFFER: usize = 64;

/// A connector that does nothing but count calls.
#[derive(Debug, Default)]
pub struct MockConnector {
    identity: Option<ConnectorIdentity>,
    save_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    terminate_calls: AtomicUsize,
    fail_calls: AtomicBool,
}

impl MockConnector {
    pub fn new(identity: Option<ConnectorIdentity>) -> Self {
        Self {
            identity,
            ..Self::default()
        }
    }

    /// Makes `save_credentials`, `logout` and `terminate` fail from now on.
    pub fn fail_calls(&self) {
        self.fail_calls.store(true, Ordering::SeqCst);
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn terminate_calls(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }

    fn failing(&self) -> bool {
        self.fail_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolConnector for MockConnector {
    fn identity(&self) -> Option<ConnectorIdentity> {
        self.identity.clone()
    }

    async fn save_credentials(&self) -> Result<(), ConnectorError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing() {
            return Err(ConnectorError::SaveCredentials("disk full".into()));
        }
        Ok(())
    }

    async fn logout(&self) -> Result<(), ConnectorError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing() {
            return Err(ConnectorError::Logout("connection already closed".into()));
        }
        Ok(())
    }

    async fn terminate(&self) -> Result<(), ConnectorError> {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing() {
            return Err(ConnectorError::Terminate("socket error".into()));
        }
        Ok(())
    }
}

/// The test's side of one connector: push events, inspect calls.
#[derive(Clone)]
pub struct MockConnectorHandle {
    events: mpsc::Sender<ProtocolEvent>,
    connector: Arc<MockConnector>,
}

impl MockConnectorHandle {
    pub fn connector(&self) -> &MockConnector {
        &self.connector
    }

    /// Delivers one event.  Returns `false` once the gateway stopped
    /// listening to this connector.
    pub async fn emit(&self, event: ProtocolEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    pub async fn issue_qr(&self, text: &str) -> bool {
        self.emit(ProtocolEvent::ConnectionUpdate(ConnectionUpdate::qr(text)))
            .await
    }

    pub async fn open(&self) -> bool {
        self.emit(ProtocolEvent::ConnectionUpdate(ConnectionUpdate::open()))
            .await
    }

    pub async fn close(&self, reason: CloseReason) -> bool {
        self.emit(ProtocolEvent::ConnectionUpdate(ConnectionUpdate::close(reason)))
            .await
    }

    pub async fn credentials_changed(&self) -> bool {
        self.emit(ProtocolEvent::CredentialsChanged).await
    }

    pub async fn domain(&self, event_type: &str, payload: serde_json::Value) -> bool {
        self.emit(ProtocolEvent::Domain {
            event_type: event_type.to_string(),
            payload,
        })
        .await
    }

    /// `true` once the gateway dropped the receiving end.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

impl std::fmt::Debug for MockConnectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnectorHandle")
            .field("connector", &self.connector)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[derive(Default)]
struct FactoryState {
    requests: Vec<ConnectRequest>,
    handles: HashMap<SessionId, Vec<MockConnectorHandle>>,
    failures: VecDeque<String>,
    identity: Option<ConnectorIdentity>,
}

/// Builds [`MockConnector`]s and remembers every one it built.
#[derive(Clone, Default)]
pub struct MockConnectorFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl MockConnectorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity reported by every connector built from now on.
    pub fn with_identity(self, identity: ConnectorIdentity) -> Self {
        self.state.lock().identity = Some(identity);
        self
    }

    /// Makes the next `connect` call fail with `message`.  Calls queue up.
    pub fn fail_next_connect(&self, message: impl Into<String>) {
        self.state.lock().failures.push_back(message.into());
    }

    /// Total `connect` calls that produced a connector.
    pub fn connect_count(&self) -> usize {
        self.state.lock().handles.values().map(Vec::len).sum()
    }

    /// Connectors built for one session.
    pub fn connect_count_for(&self, session_id: &str) -> usize {
        self.state
            .lock()
            .handles
            .get(session_id)
            .map_or(0, Vec::len)
    }

    /// The most recently built connector for a session.
    pub fn latest(&self, session_id: &str) -> Option<MockConnectorHandle> {
        self.state
            .lock()
            .handles
            .get(session_id)
            .and_then(|handles| handles.last().cloned())
    }

    /// Every request received, failed ones included.
    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.state.lock().requests.clone()
    }
}

impl std::fmt::Debug for MockConnectorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnectorFactory")
            .field("connect_count", &self.connect_count())
            .finish()
    }
}

#[async_trait]
impl ConnectorFactory for MockConnectorFactory {
    async fn connect(&self, request: ConnectRequest) -> Result<Connection, ConnectorError> {
        let mut state = self.state.lock();
        state.requests.push(request.clone());

        if let Some(message) = state.failures.pop_front() {
            return Err(ConnectorError::Construct(message));
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let connector = Arc::new(MockConnector::new(state.identity.clone()));
        state
            .handles
            .entry(request.session_id)
            .or_default()
            .push(MockConnectorHandle {
                events: tx,
                connector: connector.clone(),
            });

        Ok(Connection {
            connector,
            events: rx,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::CredentialLocation;
    use std::path::PathBuf;

    fn request(id: &str) -> ConnectRequest {
        ConnectRequest {
            session_id: id.to_string(),
            credentials: CredentialLocation(PathBuf::from(id)),
            protocol_version: None,
        }
    }

    #[tokio::test]
    async fn test_connect_hands_out_event_stream() {
        // Arrange
        let factory = MockConnectorFactory::new();

        // Act
        let mut connection = factory.connect(request("alpha")).await.unwrap();
        let handle = factory.latest("alpha").unwrap();
        assert!(handle.issue_qr("2@abc").await);

        // Assert
        let event = connection.events.recv().await.unwrap();
        assert_eq!(
            event,
            ProtocolEvent::ConnectionUpdate(ConnectionUpdate::qr("2@abc"))
        );
        assert_eq!(factory.connect_count_for("alpha"), 1);
    }

    #[tokio::test]
    async fn test_queued_failure_applies_to_next_connect_only() {
        let factory = MockConnectorFactory::new();
        factory.fail_next_connect("boom");

        assert!(factory.connect(request("alpha")).await.is_err());
        assert!(factory.connect(request("alpha")).await.is_ok());
        assert_eq!(factory.requests().len(), 2);
        assert_eq!(factory.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_emit_reports_dropped_receiver() {
        let factory = MockConnectorFactory::new();
        let connection = factory.connect(request("alpha")).await.unwrap();
        let handle = factory.latest("alpha").unwrap();

        drop(connection);

        assert!(handle.is_closed());
        assert!(!handle.open().await);
    }

    #[tokio::test]
    async fn test_failing_connector_counts_calls() {
        let connector = MockConnector::new(None);
        connector.fail_calls();

        assert!(connector.logout().await.is_err());
        assert!(connector.terminate().await.is_err());
        assert_eq!(connector.logout_calls(), 1);
        assert_eq!(connector.terminate_calls(), 1);
    }
}
