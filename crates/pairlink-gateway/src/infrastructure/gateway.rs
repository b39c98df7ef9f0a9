//! Gateway: wires the adapters to the application layer.
//!
//! [`Gateway::from_config`] builds the production graph from a
//! [`GatewayConfig`]:
//!
//! ```text
//! FileCredentialStore ─┐
//! ConnectorFactory ────┼─► SessionSupervisor ─► EventDispatcher ─┬─► BroadcastPushSink
//! QrCodeRenderer ──────┘                                         └─► WebhookSink ─► ReqwestTransport
//! ```
//!
//! [`Gateway::assemble`] takes the credential store and webhook transport as
//! arguments, which is how the integration tests plug in fakes.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::application::dispatcher::{EventDispatcher, WebhookSink};
use crate::application::ports::{
    ConnectorFactory, CredentialStore, RenderError, WebhookError, WebhookTransport,
};
use crate::application::qr_pipeline::QrPipeline;
use crate::application::supervisor::{SessionSupervisor, SupervisorError};
use crate::infrastructure::credentials::FileCredentialStore;
use crate::infrastructure::push::BroadcastPushSink;
use crate::infrastructure::qr_render::QrCodeRenderer;
use crate::infrastructure::storage::config::GatewayConfig;
use crate::infrastructure::webhook::ReqwestTransport;

/// Errors raised while assembling or starting the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid QR settings: {0}")]
    Render(#[from] RenderError),
    #[error("webhook client setup failed: {0}")]
    Webhook(#[from] WebhookError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// A fully wired gateway.
#[derive(Debug, Clone)]
pub struct Gateway {
    supervisor: SessionSupervisor,
    push: BroadcastPushSink,
}

impl Gateway {
    /// Builds the production adapters described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Render`] for bad QR settings and
    /// [`GatewayError::Webhook`] if the HTTP client cannot be built.
    pub fn from_config(
        config: &GatewayConfig,
        connectors: Arc<dyn ConnectorFactory>,
    ) -> Result<Self, GatewayError> {
        let credentials = Arc::new(FileCredentialStore::new(&config.gateway.credentials_dir));
        let transport = Arc::new(ReqwestTransport::new(config.webhook_settings().timeout)?);
        Self::assemble(config, connectors, credentials, transport)
    }

    /// Builds the gateway around the given store and transport.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Render`] for bad QR settings.
    pub fn assemble(
        config: &GatewayConfig,
        connectors: Arc<dyn ConnectorFactory>,
        credentials: Arc<dyn CredentialStore>,
        transport: Arc<dyn WebhookTransport>,
    ) -> Result<Self, GatewayError> {
        config.log_warnings();

        let qr = match config.qr_render_options() {
            Some(options) => QrPipeline::new(Arc::new(QrCodeRenderer::new(options)?)),
            None => QrPipeline::disabled(),
        };

        let push = BroadcastPushSink::default();
        let webhooks = config
            .webhook
            .enabled
            .then(|| WebhookSink::new(config.webhook_settings(), transport));
        let dispatcher = EventDispatcher::new(Arc::new(push.clone()), webhooks);

        let supervisor = SessionSupervisor::new(
            config.supervisor_settings(),
            connectors,
            credentials,
            dispatcher,
            qr,
        );

        Ok(Self { supervisor, push })
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    /// The push hub.  Subscribe to receive every published event.
    pub fn push(&self) -> &BroadcastPushSink {
        &self.push
    }

    /// Restores every session with saved credentials.  Returns how many
    /// started.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Supervisor`] if the saved sessions cannot be
    /// listed.
    pub async fn start(&self) -> Result<usize, GatewayError> {
        info!("gateway starting");
        Ok(self.supervisor.start_all_saved().await?)
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
        info!("gateway stopped");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
