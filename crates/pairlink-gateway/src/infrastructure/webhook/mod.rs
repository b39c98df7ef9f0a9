//! Webhook HTTP transport.
//!
//! [`ReqwestTransport`] POSTs the envelope as JSON and hands the status code
//! back to the [`WebhookSink`](crate::application::dispatcher::WebhookSink),
//! which owns retry and breaker decisions.  The request carries
//! `Content-Type: application/json` and, when configured, `x-api-key`.
//!
//! The [`mock`] sub-module provides a recording transport for tests.

pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use pairlink_core::WebhookEnvelope;

use crate::application::ports::{WebhookError, WebhookTarget, WebhookTransport};

pub use mock::RecordingTransport;

/// Header carrying the per-endpoint credential.
pub const API_KEY_HEADER: &str = "x-api-key";

/// HTTP transport built on a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds a client whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Transport`] if the TLS backend cannot be
    /// initialised.
    pub fn new(timeout: Duration) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pairlink-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WebhookError::Transport {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WebhookTransport for ReqwestTransport {
    async fn post(
        &self,
        target: &WebhookTarget,
        envelope: &WebhookEnvelope,
    ) -> Result<u16, WebhookError> {
        let mut request = self.client.post(&target.url).json(envelope);
        if let Some(key) = &target.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                WebhookError::Timeout {
                    url: target.url.clone(),
                }
            } else {
                WebhookError::Transport {
                    url: target.url.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        Ok(response.status().as_u16())
    }
}
