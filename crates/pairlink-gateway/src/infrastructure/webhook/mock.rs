//! Recording webhook transport for tests.
//!
//! Every POST is recorded.  Responses come from a per-URL script of status
//! codes; an exhausted or missing script answers `200`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use pairlink_core::WebhookEnvelope;
use parking_lot::Mutex;

use crate::application::ports::{WebhookError, WebhookTarget, WebhookTransport};

/// One recorded POST.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPost {
    pub target: WebhookTarget,
    pub envelope: WebhookEnvelope,
}

#[derive(Default)]
struct Script {
    posts: Vec<RecordedPost>,
    responses: HashMap<String, VecDeque<Result<u16, String>>>,
    fallback: HashMap<String, u16>,
}

/// [`WebhookTransport`] that records instead of sending.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    script: Arc<Mutex<Script>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one response status for `url`.
    pub fn respond(&self, url: &str, status: u16) {
        self.script
            .lock()
            .responses
            .entry(url.to_string())
            .or_default()
            .push_back(Ok(status));
    }

    /// Queues one transport error for `url`.
    pub fn fail_once(&self, url: &str, message: &str) {
        self.script
            .lock()
            .responses
            .entry(url.to_string())
            .or_default()
            .push_back(Err(message.to_string()));
    }

    /// Answers every POST to `url` with `status` once the queue is empty.
    pub fn always_respond(&self, url: &str, status: u16) {
        self.script
            .lock()
            .fallback
            .insert(url.to_string(), status);
    }

    pub fn posts(&self) -> Vec<RecordedPost> {
        self.script.lock().posts.clone()
    }

    pub fn posts_to(&self, url: &str) -> Vec<RecordedPost> {
        self.script
            .lock()
            .posts
            .iter()
            .filter(|post| post.target.url == url)
            .cloned()
            .collect()
    }

    pub fn post_count(&self) -> usize {
        self.script.lock().posts.len()
    }
}

impl std::fmt::Debug for RecordingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingTransport")
            .field("posts", &self.post_count())
            .finish()
    }
}

#[async_trait]
impl WebhookTransport for RecordingTransport {
    async fn post(
        &self,
        target: &WebhookTarget,
        envelope: &WebhookEnvelope,
    ) -> Result<u16, WebhookError> {
        let mut script = self.script.lock();
        script.posts.push(RecordedPost {
            target: target.clone(),
            envelope: envelope.clone(),
        });

        let scripted = script
            .responses
            .get_mut(&target.url)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(Ok(status)) => Ok(status),
            Some(Err(message)) => Err(WebhookError::Transport {
                url: target.url.clone(),
                message,
            }),
            None => Ok(script.fallback.get(&target.url).copied().unwrap_or(200)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
