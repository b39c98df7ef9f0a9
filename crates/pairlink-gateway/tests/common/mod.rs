//! Shared fixtures for the gateway integration tests.
//!
//! A [`Harness`] wires a [`SessionSupervisor`] to in-process fakes: the
//! scriptable connector factory, the in-memory credential store, the
//! broadcast push hub and the recording webhook transport.  Tests drive the
//! network side through [`MockConnectorFactory::latest`] and observe the
//! push hub and the transport.
//!
//! Time-sensitive tests run with a paused clock.  [`settle`] lets every
//! spawned task run to its next real wait without moving the clock, so
//! reconnect timers only fire when a test calls `tokio::time::advance`.

#![allow(dead_code)]

use std::sync::Arc;

use pairlink_core::PushMessage;
use pairlink_gateway::application::ports::QrRenderer;
use pairlink_gateway::application::qr_pipeline::QrPipeline;
use pairlink_gateway::infrastructure::connector::MockConnectorFactory;
use pairlink_gateway::infrastructure::credentials::MemoryCredentialStore;
use pairlink_gateway::infrastructure::push::BroadcastPushSink;
use pairlink_gateway::infrastructure::webhook::RecordingTransport;
use pairlink_gateway::{
    EventDispatcher, SessionSupervisor, SupervisorSettings, WebhookSettings, WebhookSink,
};
use tokio::sync::broadcast;

pub struct Harness {
    pub supervisor: SessionSupervisor,
    pub factory: MockConnectorFactory,
    pub store: Arc<MemoryCredentialStore>,
    pub push: BroadcastPushSink,
    pub transport: RecordingTransport,
    pub events: broadcast::Receiver<PushMessage>,
}

#[derive(Default)]
pub struct HarnessOptions {
    pub saved: Vec<&'static str>,
    pub webhooks: Option<WebhookSettings>,
    pub renderer: Option<Arc<dyn QrRenderer>>,
    pub factory: Option<MockConnectorFactory>,
}

impl Harness {
    /// Text-only QR mode, no webhooks, nothing saved.
    pub fn new() -> Self {
        Self::with(HarnessOptions::default())
    }

    pub fn with(options: HarnessOptions) -> Self {
        let factory = options.factory.unwrap_or_default();
        let store = Arc::new(MemoryCredentialStore::with_saved(options.saved));
        let push = BroadcastPushSink::new(1024);
        let events = push.subscribe();
        let transport = RecordingTransport::new();

        let webhooks = options
            .webhooks
            .map(|settings| WebhookSink::new(settings, Arc::new(transport.clone())));
        let qr = match options.renderer {
            Some(renderer) => QrPipeline::new(renderer),
            None => QrPipeline::disabled(),
        };

        let supervisor = SessionSupervisor::new(
            SupervisorSettings::default(),
            Arc::new(factory.clone()),
            store.clone(),
            EventDispatcher::new(Arc::new(push.clone()), webhooks),
            qr,
        );

        Self {
            supervisor,
            factory,
            store,
            push,
            transport,
            events,
        }
    }

    /// Every push message published since the last call.
    pub fn drain(&mut self) -> Vec<PushMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.events.try_recv() {
            messages.push(message);
        }
        messages
    }
}

/// Yields until spawned tasks have run as far as they can without time
/// passing.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// `messages` of the given type, payloads only.
pub fn of_type<'a>(messages: &'a [PushMessage], event_type: &str) -> Vec<&'a serde_json::Value> {
    messages
        .iter()
        .filter(|m| m.event_type == event_type)
        .map(|m| &m.data)
        .collect()
}

/// Statuses carried by the `session.update` messages, in order.
pub fn statuses(messages: &[PushMessage]) -> Vec<String> {
    of_type(messages, "session.update")
        .into_iter()
        .filter_map(|data| data["status"].as_str().map(str::to_string))
        .collect()
}
