//! SessionSupervisor: owns every session's lifecycle.
//!
//! The supervisor is the only writer of the [`SessionRegistry`].  It
//!
//! - starts sessions (idempotently) and installs one connector per session,
//! - pumps each connector's events through the pure [`transition`] function
//!   and carries out the returned [`Effect`]s,
//! - schedules reconnects and QR renders as cancelable deferred tasks,
//! - deletes sessions and shuts everything down.
//!
//! # Connector epochs
//!
//! Every connector install gets a fresh epoch number, stored on the record.
//! The event pump, the reconnect timer and the render task all carry the
//! epoch they were started under, and every write they make first checks it
//! against the record.  A connector that has been replaced or deleted can
//! therefore never change a session it no longer owns.
//!
//! # Fault isolation
//!
//! Protocol event handlers never return errors.  Each failure is logged where
//! it happens, and a panic inside one handler is caught so the pump goes on
//! with the next event.

use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use pairlink_core::{
    transition, CloseReason, ConnectionPhase, ConnectionUpdate, Effect, Input, ProtocolEvent,
    QrArtifact, QrUpdate, ReconnectPolicy, SessionId, SessionState, SessionStatus,
    TransitionContext,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::application::dispatcher::EventDispatcher;
use crate::application::ports::{
    ConnectRequest, Connection, ConnectorError, ConnectorFactory, CredentialStore,
    ProtocolConnector, StoreError,
};
use crate::application::qr_pipeline::{accept_render, QrPipeline};
use crate::application::registry::{SessionRecord, SessionRegistry, RETIRED_EPOCH};
use crate::application::tasks::DeferredTask;

/// Errors returned by [`SessionSupervisor::start_session`].
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("credential store error: {0}")]
    Store(#[from] StoreError),
    #[error("connector error: {0}")]
    Connector(#[from] ConnectorError),
    #[error("session {0} is being deleted")]
    Deleting(SessionId),
    #[error("session {0} was deleted while its connector was starting")]
    Superseded(SessionId),
}

/// Knobs that shape supervisor behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub reconnect: ReconnectPolicy,
    /// Passed to the connector factory on every connect.
    pub protocol_version: Option<[u32; 3]>,
}

struct Inner {
    registry: SessionRegistry,
    connectors: Arc<dyn ConnectorFactory>,
    credentials: Arc<dyn CredentialStore>,
    dispatcher: EventDispatcher,
    qr: QrPipeline,
    settings: SupervisorSettings,
    next_epoch: AtomicU64,
}

/// Cheap-to-clone handle to the session service.
#[derive(Clone)]
pub struct SessionSupervisor {
    inner: Arc<Inner>,
}

/// Outcome of claiming a registry slot at the start of `start_session`.
enum Claim {
    /// A live session already exists; nothing to do.
    Live(SessionState),
    /// The slot is ours under `epoch`.  `previous` is the state to restore if
    /// the connector fails to come up (`None` for a brand-new session).
    Claimed { previous: Option<SessionState> },
}

impl SessionSupervisor {
    pub fn new(
        settings: SupervisorSettings,
        connectors: Arc<dyn ConnectorFactory>,
        credentials: Arc<dyn CredentialStore>,
        dispatcher: EventDispatcher,
        qr: QrPipeline,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: SessionRegistry::new(),
                connectors,
                credentials,
                dispatcher,
                qr,
                settings,
                next_epoch: AtomicU64::new(RETIRED_EPOCH + 1),
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// Snapshot of one session.
    pub fn session(&self, session_id: &str) -> Option<SessionState> {
        self.inner.registry.get(session_id)
    }

    /// Snapshot of every session, sorted by id.
    pub fn sessions(&self) -> Vec<SessionState> {
        self.inner.registry.list()
    }

    /// Returns `true` if `token` is the current bearer token of a connected
    /// session.
    pub fn authorize(&self, session_id: &str, token: &str) -> bool {
        self.inner
            .registry
            .get(session_id)
            .filter(|state| state.status == SessionStatus::Connected)
            .and_then(|state| state.token)
            .is_some_and(|expected| constant_time_eq(expected.as_bytes(), token.as_bytes()))
    }

    // ── Start ─────────────────────────────────────────────────────────────────

    /// Starts `session_id`, or returns it unchanged if it is already live.
    ///
    /// A live (`Pending` or `Connected`) session is re-published and returned
    /// as is; no second connector is built.  Otherwise credentials are
    /// allocated, a connector is constructed, and a `Pending` session is
    /// published.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Store`] or [`SupervisorError::Connector`]
    /// if the session could not be brought up, and
    /// [`SupervisorError::Deleting`] / [`SupervisorError::Superseded`] if a
    /// concurrent delete got in the way.
    pub async fn start_session(&self, session_id: &str) -> Result<SessionState, SupervisorError> {
        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);

        let previous = match self.claim(session_id, epoch)? {
            Claim::Live(state) => {
                debug!("session {session_id}: already {}; start is a no-op", state.status);
                self.inner.dispatcher.publish_session(&state);
                return Ok(state);
            }
            Claim::Claimed { previous } => previous,
        };

        let connection = match self.open_connection(session_id).await {
            Ok(connection) => connection,
            Err(e) => {
                if self.abandon_start(session_id, epoch, previous) {
                    self.purge_after_delete(session_id).await;
                }
                return Err(e);
            }
        };

        self.install(session_id, epoch, connection).await
    }

    /// Atomically decides whether this call owns the session's next connector.
    fn claim(&self, session_id: &str, epoch: u64) -> Result<Claim, SupervisorError> {
        self.inner.registry.with_entry(session_id, |entry| match entry {
            Entry::Vacant(slot) => {
                slot.insert(SessionRecord::new(SessionState::new(session_id), epoch));
                Ok(Claim::Claimed { previous: None })
            }
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                if record.epoch == RETIRED_EPOCH {
                    return Err(SupervisorError::Deleting(session_id.to_string()));
                }
                if record.state.status.is_live() {
                    return Ok(Claim::Live(record.state.clone()));
                }
                let previous = record.state.clone();
                record.cancel_tasks();
                record.connector = None;
                record.epoch = epoch;
                record.state = previous.restarted();
                Ok(Claim::Claimed {
                    previous: Some(previous),
                })
            }
        })
    }

    async fn open_connection(&self, session_id: &str) -> Result<Connection, SupervisorError> {
        let credentials = &self.inner.credentials;
        if credentials.exists(session_id).await? {
            debug!("session {session_id}: restoring saved credentials");
        } else {
            debug!("session {session_id}: no saved credentials; pairing required");
        }
        let location = credentials.ensure(session_id).await?;

        let connection = self
            .inner
            .connectors
            .connect(ConnectRequest {
                session_id: session_id.to_string(),
                credentials: location,
                protocol_version: self.inner.settings.protocol_version,
            })
            .await?;
        Ok(connection)
    }

    /// Puts the claimed slot back the way it was after a failed start.
    ///
    /// Returns `true` if the session was deleted while the start was running.
    fn abandon_start(&self, session_id: &str, epoch: u64, previous: Option<SessionState>) -> bool {
        self.inner.registry.with_entry(session_id, |entry| match entry {
            Entry::Vacant(_) => true,
            Entry::Occupied(mut slot) => {
                if slot.get().epoch != epoch {
                    return slot.get().state.status == SessionStatus::Deleted;
                }
                match previous {
                    Some(state) => slot.get_mut().state = state,
                    None => {
                        slot.remove();
                    }
                }
                false
            }
        })
    }

    /// A start that raced `delete_session` may have re-created the
    /// namespace the delete just purged.
    async fn purge_after_delete(&self, session_id: &str) {
        debug!("session {session_id}: deleted during start; purging credentials again");
        if let Err(e) = self.inner.credentials.purge(session_id).await {
            warn!("session {session_id}: credential purge failed: {e}");
        }
    }

    async fn install(
        &self,
        session_id: &str,
        epoch: u64,
        connection: Connection,
    ) -> Result<SessionState, SupervisorError> {
        let Connection { connector, events } = connection;

        // `Err(true)`: the session was deleted underneath this start.
        let installed = self
            .inner
            .registry
            .update(session_id, |record| {
                if record.epoch != epoch {
                    return Err(record.state.status == SessionStatus::Deleted);
                }
                record.connector = Some(connector.clone());
                Ok(record.state.clone())
            })
            .unwrap_or(Err(true));

        let state = match installed {
            Ok(state) => state,
            Err(deleted) => {
                debug!("session {session_id}: superseded during start; terminating new connector");
                if let Err(e) = connector.terminate().await {
                    warn!("session {session_id}: terminate failed: {e}");
                }
                if deleted {
                    self.purge_after_delete(session_id).await;
                }
                return Err(SupervisorError::Superseded(session_id.to_string()));
            }
        };

        tokio::spawn(
            self.clone()
                .run_event_pump(session_id.to_string(), epoch, events),
        );

        info!("session {session_id}: connector started");
        self.inner.dispatcher.publish_session(&state);
        Ok(state)
    }

    /// Starts every session with saved credentials.
    ///
    /// One session failing to start is logged and skipped.  Returns how many
    /// started.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Store`] only if the saved sessions cannot
    /// be listed at all.
    pub async fn start_all_saved(&self) -> Result<usize, SupervisorError> {
        let saved = self.inner.credentials.list().await?;
        let total = saved.len();
        let mut started = 0;

        for session_id in saved {
            match self.start_session(&session_id).await {
                Ok(_) => started += 1,
                Err(e) => warn!("session {session_id}: failed to restore: {e}"),
            }
        }

        info!("restored {started} of {total} saved session(s)");
        Ok(started)
    }

    // ── Protocol events ───────────────────────────────────────────────────────

    async fn run_event_pump(
        self,
        session_id: SessionId,
        epoch: u64,
        mut events: mpsc::Receiver<ProtocolEvent>,
    ) {
        while let Some(event) = events.recv().await {
            if !self.is_current(&session_id, epoch) {
                debug!("session {session_id}: connector superseded; event pump stopped");
                return;
            }
            trace!("session {session_id}: {}", event.kind());

            let handled = std::panic::AssertUnwindSafe(self.handle_event(&session_id, epoch, event))
                .catch_unwind()
                .await;
            if handled.is_err() {
                warn!("session {session_id}: event handler panicked; continuing");
            }
        }
        debug!("session {session_id}: event stream closed");
    }

    fn is_current(&self, session_id: &str, epoch: u64) -> bool {
        self.inner
            .registry
            .update(session_id, |record| record.epoch == epoch)
            .unwrap_or(false)
    }

    async fn handle_event(&self, session_id: &str, epoch: u64, event: ProtocolEvent) {
        match event {
            ProtocolEvent::CredentialsChanged => self.persist_credentials(session_id, epoch).await,
            ProtocolEvent::ConnectionUpdate(update) => {
                self.handle_connection_update(session_id, epoch, update).await;
            }
            ProtocolEvent::Domain {
                event_type,
                payload,
            } => {
                self.inner
                    .dispatcher
                    .publish(&event_type, payload, Some(session_id));
            }
        }
    }

    fn current_connector(&self, session_id: &str, epoch: u64) -> Option<Arc<dyn ProtocolConnector>> {
        self.inner
            .registry
            .update(session_id, |record| {
                (record.epoch == epoch)
                    .then(|| record.connector.clone())
                    .flatten()
            })
            .flatten()
    }

    async fn persist_credentials(&self, session_id: &str, epoch: u64) {
        let Some(connector) = self.current_connector(session_id, epoch) else {
            return;
        };
        if let Err(e) = connector.save_credentials().await {
            warn!("session {session_id}: {e}");
        }
    }

    async fn handle_connection_update(&self, session_id: &str, epoch: u64, update: ConnectionUpdate) {
        let input = match (update.phase, update.qr) {
            (Some(ConnectionPhase::Open), _) => {
                let identity = self
                    .current_connector(session_id, epoch)
                    .and_then(|connector| connector.identity())
                    .unwrap_or_default();
                Input::Opened(identity)
            }
            (Some(ConnectionPhase::Close), _) => Input::Closed(
                update
                    .close_reason
                    .unwrap_or_else(|| CloseReason::other("connection closed")),
            ),
            (_, Some(qr)) => Input::QrIssued(qr),
            (Some(ConnectionPhase::Pending) | None, None) => {
                trace!("session {session_id}: connecting");
                return;
            }
        };
        self.apply(session_id, epoch, input).await;
    }

    /// Runs the state machine for one input and performs its effects.
    async fn apply(&self, session_id: &str, epoch: u64, input: Input) {
        let policy = self.inner.settings.reconnect;
        let effects = self.inner.registry.update(session_id, |record| {
            if record.epoch != epoch {
                return None;
            }
            let ctx = TransitionContext::new(policy, record.reconnect_task.is_pending());
            Some(transition(&mut record.state, input, &ctx))
        });

        let Some(effects) = effects.flatten() else {
            debug!("session {session_id}: dropping input from superseded connector");
            return;
        };
        for effect in effects {
            self.perform(session_id, epoch, effect).await;
        }
    }

    async fn perform(&self, session_id: &str, epoch: u64, effect: Effect) {
        let registry = &self.inner.registry;
        match effect {
            Effect::CancelQrRender => {
                registry.update(session_id, |record| {
                    if record.epoch == epoch && record.qr_render_task.cancel() {
                        debug!("session {session_id}: pending QR render cancelled");
                    }
                });
            }
            Effect::CancelReconnect => {
                registry.update(session_id, |record| {
                    if record.epoch == epoch && record.reconnect_task.cancel() {
                        debug!("session {session_id}: pending reconnect cancelled");
                    }
                });
            }
            Effect::DropConnector => {
                let dropped = registry
                    .update(session_id, |record| {
                        (record.epoch == epoch).then(|| record.connector.take()).flatten()
                    })
                    .flatten();
                drop(dropped);
            }
            Effect::PublishQrText(qr) => {
                self.inner.dispatcher.publish_qr(&QrUpdate {
                    session_id: session_id.to_string(),
                    qr,
                    qr_code: None,
                });
            }
            Effect::RenderQr(qr) => self.start_render(session_id, epoch, qr),
            Effect::PublishSession => {
                if let Some(state) = registry.get(session_id) {
                    info!("session {session_id}: {}", state.status);
                    self.inner.dispatcher.publish_session(&state);
                }
            }
            Effect::ScheduleReconnect(delay) => self.schedule_reconnect(session_id, epoch, delay),
            Effect::SkipDuplicateReconnect => {
                warn!("session {session_id}: reconnect already scheduled; ignoring duplicate close");
            }
            Effect::Delete => {
                info!("session {session_id}: logged out");
                self.delete_session(session_id).await;
            }
        }
    }

    // ── Deferred tasks ────────────────────────────────────────────────────────

    fn schedule_reconnect(&self, session_id: &str, epoch: u64, delay: Duration) {
        let scheduled = self.inner.registry.update(session_id, |record| {
            if record.epoch != epoch {
                return false;
            }
            let supervisor = self.clone();
            let id = session_id.to_string();
            record.reconnect_task.replace(DeferredTask::spawn(move |task_id| async move {
                tokio::time::sleep(delay).await;
                supervisor.reconnect_due(id, epoch, task_id).await;
            }));
            true
        });

        if scheduled == Some(true) {
            info!("session {session_id}: reconnecting in {delay:?}");
        }
    }

    /// Boxed so the reconnect timer can be spawned from inside the event
    /// pump without the future types of `start_session` and the pump
    /// depending on each other.
    fn reconnect_due(&self, session_id: String, epoch: u64, task_id: u64) -> BoxFuture<'static, ()> {
        let supervisor = self.clone();
        async move {
            let still_wanted = supervisor
                .inner
                .registry
                .update(&session_id, |record| {
                    record.epoch == epoch && record.reconnect_task.release(task_id)
                })
                .unwrap_or(false);
            if !still_wanted {
                debug!("session {session_id}: reconnect no longer wanted");
                return;
            }

            if let Err(e) = supervisor.start_session(&session_id).await {
                warn!("session {session_id}: reconnect failed: {e}");
                supervisor.reschedule_after_failure(&session_id, &e).await;
            }
        }
        .boxed()
    }

    /// Feeds a failed reconnect through the state machine as an ordinary
    /// close, so the backoff policy picks the next delay.
    async fn reschedule_after_failure(&self, session_id: &str, error: &SupervisorError) {
        if matches!(
            error,
            SupervisorError::Deleting(_) | SupervisorError::Superseded(_)
        ) {
            return;
        }
        let Some(epoch) = self
            .inner
            .registry
            .update(session_id, |record| record.epoch)
            .filter(|epoch| *epoch != RETIRED_EPOCH)
        else {
            return;
        };
        self.apply(session_id, epoch, Input::Closed(CloseReason::other(error.to_string())))
            .await;
    }

    fn start_render(&self, session_id: &str, epoch: u64, qr: String) {
        if !self.inner.qr.is_enabled() {
            return;
        }
        let supervisor = self.clone();
        let id = session_id.to_string();
        let Some(task) = self.inner.qr.spawn_render(qr, move |task_id, text, artifact| {
            supervisor.complete_render(&id, epoch, task_id, &text, artifact);
        }) else {
            return;
        };

        let orphan = self
            .inner
            .registry
            .update(session_id, |record| {
                if record.epoch != epoch {
                    return Some(task);
                }
                if record.qr_render_task.replace(task) {
                    debug!("session {session_id}: superseded pending QR render");
                }
                None
            })
            .flatten();
        if let Some(task) = orphan {
            task.cancel();
        }
    }

    fn complete_render(
        &self,
        session_id: &str,
        epoch: u64,
        task_id: u64,
        text: &str,
        artifact: QrArtifact,
    ) {
        let published = self.inner.registry.update(session_id, |record| {
            if record.epoch != epoch {
                return None;
            }
            record.qr_render_task.release(task_id);
            accept_render(&mut record.state, text, artifact).then(|| record.state.clone())
        });

        let Some(state) = published.flatten() else {
            debug!("session {session_id}: discarding stale QR render");
            return;
        };
        self.inner.dispatcher.publish_session(&state);
        self.inner.dispatcher.publish_qr(&QrUpdate {
            session_id: session_id.to_string(),
            qr: text.to_string(),
            qr_code: state.qr_artifact.clone(),
        });
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// Deletes a session for good.
    ///
    /// Timers are cancelled before the connector is logged out.  Logout and
    /// credential purge are best-effort.  A `DELETED` update is published
    /// even if the id was never known.
    pub async fn delete_session(&self, session_id: &str) {
        let connector = self
            .inner
            .registry
            .update(session_id, |record| {
                record.cancel_tasks();
                record.epoch = RETIRED_EPOCH;
                record.state.status = SessionStatus::Deleted;
                record.state.clear_qr();
                record.state.token = None;
                record.connector.take()
            })
            .flatten();

        if let Some(connector) = connector {
            if let Err(e) = connector.logout().await {
                warn!("session {session_id}: {e}");
            }
        }

        self.inner.registry.with_entry(session_id, |entry| {
            if let Entry::Occupied(slot) = entry {
                if slot.get().epoch == RETIRED_EPOCH {
                    slot.remove();
                }
            }
        });

        if let Err(e) = self.inner.credentials.purge(session_id).await {
            warn!("session {session_id}: credential purge failed: {e}");
        }

        info!("session {session_id}: deleted");
        self.inner.dispatcher.publish_deleted(session_id);
    }

    /// Cancels every pending task, then terminates every connector.
    ///
    /// Sessions stay in the registry with their last status.  Connectors are
    /// terminated concurrently; one failing does not hold up the others.
    pub async fn shutdown(&self) {
        let mut connectors = Vec::new();
        for session_id in self.inner.registry.ids() {
            let taken = self
                .inner
                .registry
                .update(&session_id, |record| {
                    record.cancel_tasks();
                    record.epoch = RETIRED_EPOCH;
                    record.connector.take()
                })
                .flatten();
            if let Some(connector) = taken {
                connectors.push((session_id, connector));
            }
        }

        let count = connectors.len();
        join_all(connectors.into_iter().map(|(session_id, connector)| async move {
            if let Err(e) = connector.terminate().await {
                warn!("session {session_id}: {e}");
            }
        }))
        .await;

        info!("supervisor shut down; {count} connector(s) terminated");
    }
}

impl std::fmt::Debug for SessionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSupervisor")
            .field("sessions", &self.inner.registry.len())
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ── Tests ─────────────────────────────────────────────────────────────────────
