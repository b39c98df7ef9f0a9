//! EventDispatcher and WebhookSink: fan one event out to every consumer.
//!
//! [`EventDispatcher::publish`] never fails and never waits on the network:
//!
//! 1. The push sink gets the event first.  A failure (or panic) there is
//!    logged and has no effect on the next step.
//! 2. The [`WebhookSink`] filters by its allow-list, then spawns one POST per
//!    endpoint whose circuit breaker admits it.  Responses are processed in
//!    the spawned task and only ever update that endpoint's health.
//!
//! Pass-through events get the originating `sessionId` added to object
//! payloads that do not already carry one, so push consumers can tell
//! sessions apart without the webhook envelope.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use pairlink_core::{
    event_types, BreakerPolicy, DeletedNotice, EndpointHealth, FailureOutcome, QrUpdate,
    SessionState, WebhookEnvelope,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::application::ports::{PushSink, WebhookTarget, WebhookTransport};

/// Allow-list entry that admits every event type.
pub const ALLOW_ALL_EVENTS: &str = "*";

// ── Webhook sink ──────────────────────────────────────────────────────────────

/// Runtime webhook settings, usually built from the `[webhook]` config table.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookSettings {
    pub enabled: bool,
    pub endpoints: Vec<WebhookTarget>,
    pub breaker: BreakerPolicy,
    /// Upper bound on one POST, response included.
    pub timeout: Duration,
    pub allowed_events: Vec<String>,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoints: Vec::new(),
            breaker: BreakerPolicy::default(),
            timeout: Duration::from_millis(5_000),
            allowed_events: vec![ALLOW_ALL_EVENTS.to_string()],
        }
    }
}

struct Endpoint {
    target: WebhookTarget,
    health: Mutex<EndpointHealth>,
}

/// Delivers events to HTTP endpoints, each behind its own circuit breaker.
pub struct WebhookSink {
    enabled: bool,
    endpoints: Vec<Arc<Endpoint>>,
    breaker: BreakerPolicy,
    timeout: Duration,
    allowed_events: Vec<String>,
    transport: Arc<dyn WebhookTransport>,
}

impl WebhookSink {
    pub fn new(settings: WebhookSettings, transport: Arc<dyn WebhookTransport>) -> Self {
        let endpoints = settings
            .endpoints
            .into_iter()
            .map(|target| {
                Arc::new(Endpoint {
                    target,
                    health: Mutex::new(EndpointHealth::new()),
                })
            })
            .collect();

        Self {
            enabled: settings.enabled,
            endpoints,
            breaker: settings.breaker,
            timeout: settings.timeout,
            allowed_events: settings.allowed_events,
            transport,
        }
    }

    /// `true` when enabled with at least one endpoint.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.endpoints.is_empty()
    }

    /// Returns `true` if `event_type` passes the allow-list.
    pub fn accepts(&self, event_type: &str) -> bool {
        self.allowed_events
            .iter()
            .any(|allowed| allowed == ALLOW_ALL_EVENTS || allowed == event_type)
    }

    /// Snapshot of one endpoint's breaker state.
    pub fn endpoint_health(&self, url: &str) -> Option<EndpointHealth> {
        self.endpoints
            .iter()
            .find(|endpoint| endpoint.target.url == url)
            .map(|endpoint| endpoint.health.lock().clone())
    }

    /// Spawns one POST per admitted endpoint and returns how many were
    /// spawned.  Never waits for a response.
    pub fn deliver(&self, event_type: &str, data: &Value, session_id: Option<&str>) -> usize {
        if !self.is_active() {
            return 0;
        }
        if !self.accepts(event_type) {
            trace!("webhook: {event_type} not in allow-list");
            return 0;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("webhook: no async runtime; dropping {event_type}");
            return 0;
        };

        let envelope = Arc::new(WebhookEnvelope {
            event_type: event_type.to_string(),
            data: data.clone(),
            session_id: session_id.map(str::to_string),
        });

        let now = Instant::now();
        let mut spawned = 0;
        for endpoint in &self.endpoints {
            if !endpoint.health.lock().admits(now) {
                trace!("webhook {}: cooling down; skipped", endpoint.target.url);
                continue;
            }
            runtime.spawn(post_and_record(
                endpoint.clone(),
                envelope.clone(),
                self.transport.clone(),
                self.breaker,
                self.timeout,
            ));
            spawned += 1;
        }
        spawned
    }
}

impl std::fmt::Debug for WebhookSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSink")
            .field("enabled", &self.enabled)
            .field("endpoints", &self.endpoints.len())
            .field("allowed_events", &self.allowed_events)
            .finish()
    }
}

async fn post_and_record(
    endpoint: Arc<Endpoint>,
    envelope: Arc<WebhookEnvelope>,
    transport: Arc<dyn WebhookTransport>,
    breaker: BreakerPolicy,
    timeout: Duration,
) {
    let url = &endpoint.target.url;
    let result = tokio::time::timeout(timeout, transport.post(&endpoint.target, &envelope)).await;

    let failure = match result {
        Ok(Ok(status)) if (200..300).contains(&status) => None,
        Ok(Ok(status)) => Some(format!("HTTP {status}")),
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some(format!("no response within {timeout:?}")),
    };

    let now = Instant::now();
    let mut health = endpoint.health.lock();
    let Some(reason) = failure else {
        if health.consecutive_failures() > 0 {
            debug!("webhook {url}: delivery recovered");
        }
        health.record_success();
        return;
    };

    let outcome = health.record_failure(now, &breaker);
    if !health.should_log(now, &breaker) {
        return;
    }
    match outcome {
        FailureOutcome::Counted { consecutive } => {
            warn!("webhook {url}: {reason} ({consecutive} consecutive failure(s))");
        }
        FailureOutcome::Tripped { .. } => {
            warn!(
                "webhook {url}: {reason}; disabled for {:?} after {} consecutive failures",
                breaker.cooldown,
                breaker.failure_threshold.max(1)
            );
        }
    }
}

// ── Event dispatcher ──────────────────────────────────────────────────────────

/// Publishes every externally visible event.
pub struct EventDispatcher {
    push: Arc<dyn PushSink>,
    webhooks: Option<WebhookSink>,
}

impl EventDispatcher {
    pub fn new(push: Arc<dyn PushSink>, webhooks: Option<WebhookSink>) -> Self {
        Self { push, webhooks }
    }

    pub fn webhooks(&self) -> Option<&WebhookSink> {
        self.webhooks.as_ref()
    }

    /// Delivers one event to the push sink and the webhook sink.
    pub fn publish(&self, event_type: &str, payload: Value, session_id: Option<&str>) {
        let payload = tag_session(payload, session_id);

        let pushed = catch_unwind(AssertUnwindSafe(|| self.push.deliver(event_type, &payload)));
        match pushed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("push sink: {event_type} not delivered: {e}"),
            Err(_) => warn!("push sink panicked while delivering {event_type}"),
        }

        if let Some(webhooks) = &self.webhooks {
            webhooks.deliver(event_type, &payload, session_id);
        }
    }

    /// Publishes a `session.update` with the given snapshot.
    pub fn publish_session(&self, state: &SessionState) {
        self.publish_serialized(event_types::SESSION_UPDATE, state, &state.session_id);
    }

    /// Publishes the `session.update` that announces a deletion.
    pub fn publish_deleted(&self, session_id: &str) {
        self.publish_serialized(
            event_types::SESSION_UPDATE,
            &DeletedNotice::new(session_id),
            session_id,
        );
    }

    /// Publishes a `qr.update`.
    pub fn publish_qr(&self, update: &QrUpdate) {
        self.publish_serialized(event_types::QR_UPDATE, update, &update.session_id);
    }

    fn publish_serialized<T: Serialize>(&self, event_type: &str, value: &T, session_id: &str) {
        match serde_json::to_value(value) {
            Ok(payload) => self.publish(event_type, payload, Some(session_id)),
            Err(e) => warn!("session {session_id}: cannot serialise {event_type}: {e}"),
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("webhooks", &self.webhooks)
            .finish_non_exhaustive()
    }
}

fn tag_session(mut payload: Value, session_id: Option<&str>) -> Value {
    if let (Some(id), Value::Object(map)) = (session_id, &mut payload) {
        map.entry("sessionId")
            .or_insert_with(|| Value::String(id.to_string()));
    }
    payload
}

// ── Tests ─────────────────────────────────────────────────────────────────────
