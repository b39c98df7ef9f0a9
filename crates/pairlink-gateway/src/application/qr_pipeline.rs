//! QR render pipeline: debounced, off-thread pairing-code rendering.
//!
//! The raw pairing text is published the moment it arrives.  Rendering it to
//! an image is slow by comparison, so it happens here, in a zero-delay
//! deferred task:
//!
//! 1. The supervisor calls [`QrPipeline::spawn_render`] and stores the
//!    returned task in the session's render slot, aborting any render that
//!    was still pending.  Only the newest text is ever rendered.
//! 2. The task yields once, then renders on the blocking pool.
//! 3. On success the completion callback runs.  The supervisor checks the
//!    result with [`accept_render`] before publishing it, because the text
//!    may have changed while the image was being drawn.

use std::sync::Arc;

use pairlink_core::{QrArtifact, SessionState, SessionStatus};
use tracing::{debug, warn};

use crate::application::ports::QrRenderer;
use crate::application::tasks::DeferredTask;

/// Spawns QR renders, or does nothing in text-only mode.
#[derive(Clone)]
pub struct QrPipeline {
    renderer: Option<Arc<dyn QrRenderer>>,
}

impl QrPipeline {
    pub fn new(renderer: Arc<dyn QrRenderer>) -> Self {
        Self {
            renderer: Some(renderer),
        }
    }

    /// Text-only mode: pairing codes are published but never rendered.
    pub fn disabled() -> Self {
        Self { renderer: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.renderer.is_some()
    }

    /// Starts a deferred render of `text`.
    ///
    /// `on_rendered(task_id, text, artifact)` runs after a successful render.
    /// Returns `None` in text-only mode.
    pub fn spawn_render<F>(&self, text: String, on_rendered: F) -> Option<DeferredTask>
    where
        F: FnOnce(u64, String, QrArtifact) + Send + 'static,
    {
        let renderer = self.renderer.clone()?;

        Some(DeferredTask::spawn(move |task_id| async move {
            // Zero-delay deferral: let the publish that triggered us go first.
            tokio::task::yield_now().await;

            let input = text.clone();
            let rendered = tokio::task::spawn_blocking(move || renderer.render(&input)).await;

            match rendered {
                Ok(Ok(artifact)) => on_rendered(task_id, text, artifact),
                Ok(Err(e)) => warn!("QR render failed: {e}"),
                Err(e) if e.is_cancelled() => debug!("QR render cancelled"),
                Err(e) => warn!("QR render task panicked: {e}"),
            }
        }))
    }
}

impl std::fmt::Debug for QrPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QrPipeline")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Stores `artifact` if it still depicts the session's current pairing text.
///
/// Returns `false` (and leaves `state` untouched) for a stale render: the
/// session moved on to a newer code, or left `Pending` altogether.
pub fn accept_render(state: &mut SessionState, rendered_text: &str, artifact: QrArtifact) -> bool {
    if state.status != SessionStatus::Pending {
        return false;
    }
    if state.qr_text.as_deref() != Some(rendered_text) {
        return false;
    }
    state.qr_artifact = Some(artifact);
    true
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{MockQrRenderer, RenderError};
    use pairlink_core::QrFormat;
    use tokio::sync::oneshot;

    fn artifact(tag: &str) -> QrArtifact {
        QrArtifact {
            format: QrFormat::Svg,
            data_url: format!("data:image/svg+xml;base64,{tag}"),
        }
    }

    fn pending_with_qr(text: &str) -> SessionState {
        let mut state = SessionState::new("alpha");
        state.qr_text = Some(text.to_string());
        state
    }

    #[test]
    fn test_accept_render_stores_matching_artifact() {
        let mut state = pending_with_qr("Q1");
        assert!(accept_render(&mut state, "Q1", artifact("one")));
        assert_eq!(state.qr_artifact, Some(artifact("one")));
    }

    #[test]
    fn test_accept_render_discards_stale_text() {
        // Arrange
        let mut state = pending_with_qr("Q2");

        // Act
        let accepted = accept_render(&mut state, "Q1", artifact("one"));

        // Assert
        assert!(!accepted);
        assert!(state.qr_artifact.is_none());
    }

    #[test]
    fn test_accept_render_discards_after_connect() {
        let mut state = pending_with_qr("Q1");
        state.status = SessionStatus::Connected;
        state.qr_text = None;
        assert!(!accept_render(&mut state, "Q1", artifact("one")));
    }

    #[test]
    fn test_disabled_pipeline_spawns_nothing() {
        let pipeline = QrPipeline::disabled();
        assert!(!pipeline.is_enabled());
        assert!(pipeline.spawn_render("Q1".into(), |_, _, _| {}).is_none());
    }

    #[tokio::test]
    async fn test_spawned_render_invokes_callback_with_task_id() {
        // Arrange
        let mut renderer = MockQrRenderer::new();
        renderer
            .expect_render()
            .withf(|text| text == "Q1")
            .times(1)
            .returning(|_| Ok(artifact("one")));
        let pipeline = QrPipeline::new(Arc::new(renderer));
        let (tx, rx) = oneshot::channel();

        // Act
        let task = pipeline
            .spawn_render("Q1".into(), move |id, text, art| {
                let _ = tx.send((id, text, art));
            })
            .unwrap();
        let expected_id = task.id();
        let (id, text, art) = rx.await.unwrap();

        // Assert
        assert_eq!(id, expected_id);
        assert_eq!(text, "Q1");
        assert_eq!(art, artifact("one"));
    }

    #[tokio::test]
    async fn test_render_failure_skips_callback() {
        let mut renderer = MockQrRenderer::new();
        renderer
            .expect_render()
            .returning(|_| Err(RenderError::Encode("too long".into())));
        let pipeline = QrPipeline::new(Arc::new(renderer));
        let (tx, mut rx) = oneshot::channel::<()>();

        let task = pipeline
            .spawn_render("Q1".into(), move |_, _, _| {
                let _ = tx.send(());
            })
            .unwrap();
        let mut slot = crate::application::tasks::TaskSlot::new();
        slot.replace(task);
        while slot.is_pending() {
            tokio::task::yield_now().await;
        }

        assert!(rx.try_recv().is_err());
    }
}
