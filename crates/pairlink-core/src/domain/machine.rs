//! The session state machine.
//!
//! [`transition`] is the only place session status changes in response to the
//! network.  It mutates the [`SessionState`] in place and returns the ordered
//! list of [`Effect`]s the caller must carry out (cancel timers, publish,
//! schedule a reconnect …).  Keeping the decision pure means every rule below
//! is covered by a plain unit test.
//!
//! # Transition table
//!
//! | Status        | Input        | Result                                            |
//! |---------------|--------------|---------------------------------------------------|
//! | Pending       | `QrIssued`   | store text, publish it, render unless unchanged   |
//! | other         | `QrIssued`   | ignored                                           |
//! | not Deleted   | `Opened`     | → Connected, new token, attempts = 0              |
//! | not Deleted   | `Closed`     | → Disconnected, then delete or reconnect          |
//! | Deleted       | anything     | ignored                                           |

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::reconnect::ReconnectPolicy;
use crate::domain::session::{generate_token, ConnectorIdentity, SessionState, SessionStatus};
use crate::protocol::events::CloseReason;

/// An input to the state machine, already extracted from a connector event.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// A new pairing code was issued.
    QrIssued(String),
    /// The connection opened for the given account.
    Opened(ConnectorIdentity),
    /// The connection closed.
    Closed(CloseReason),
}

impl Input {
    fn name(&self) -> &'static str {
        match self {
            Input::QrIssued(_) => "qr",
            Input::Opened(_) => "open",
            Input::Closed(_) => "close",
        }
    }
}

/// Facts about the session's runtime that the transition depends on but that
/// do not live in [`SessionState`].
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext {
    pub policy: ReconnectPolicy,
    /// A reconnect timer is already waiting for this session.
    pub reconnect_pending: bool,
    pub now: DateTime<Utc>,
}

impl TransitionContext {
    pub fn new(policy: ReconnectPolicy, reconnect_pending: bool) -> Self {
        Self {
            policy,
            reconnect_pending,
            now: Utc::now(),
        }
    }
}

/// A side effect requested by [`transition`].  Effects are returned in the
/// order they must be performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Abort any pending QR render for this session.
    CancelQrRender,
    /// Abort any pending reconnect timer for this session.
    CancelReconnect,
    /// Release the session's connector.
    DropConnector,
    /// Publish the raw pairing text immediately.
    PublishQrText(String),
    /// Hand the text to the QR render pipeline.
    RenderQr(String),
    /// Publish a `session.update` with the current snapshot.
    PublishSession,
    /// Start a reconnect timer.
    ScheduleReconnect(Duration),
    /// A reconnect timer is already pending; do not start another.
    SkipDuplicateReconnect,
    /// Tear the session down for good.
    Delete,
}

/// Applies `input` to `state` and returns the effects to perform.
pub fn transition(state: &mut SessionState, input: Input, ctx: &TransitionContext) -> Vec<Effect> {
    if state.status == SessionStatus::Deleted {
        tracing::debug!(
            "session {}: ignoring {} on deleted session",
            state.session_id,
            input.name()
        );
        return Vec::new();
    }

    match input {
        Input::QrIssued(text) => on_qr(state, text, ctx),
        Input::Opened(identity) => on_open(state, identity),
        Input::Closed(reason) => on_close(state, reason, ctx),
    }
}

fn on_qr(state: &mut SessionState, text: String, ctx: &TransitionContext) -> Vec<Effect> {
    if state.status != SessionStatus::Pending {
        tracing::debug!(
            "session {}: ignoring pairing code while {}",
            state.session_id,
            state.status
        );
        return Vec::new();
    }

    let unchanged = state.qr_text.as_deref() == Some(text.as_str());
    state.last_qr_at = Some(ctx.now);

    if unchanged {
        return vec![Effect::PublishQrText(text)];
    }

    state.qr_text = Some(text.clone());
    // The old artifact depicts the previous code.
    state.qr_artifact = None;
    vec![Effect::PublishQrText(text.clone()), Effect::RenderQr(text)]
}

fn on_open(state: &mut SessionState, identity: ConnectorIdentity) -> Vec<Effect> {
    state.status = SessionStatus::Connected;
    state.clear_qr();
    state.has_ever_connected = true;
    state.token = Some(generate_token());
    state.display_name = identity.display_name;
    state.phone_number = identity.phone_number;
    state.reconnect_attempts = 0;

    vec![
        Effect::CancelQrRender,
        Effect::CancelReconnect,
        Effect::PublishSession,
    ]
}

fn on_close(state: &mut SessionState, reason: CloseReason, ctx: &TransitionContext) -> Vec<Effect> {
    state.status = SessionStatus::Disconnected;
    state.token = None;

    let mut effects = vec![Effect::DropConnector, Effect::CancelQrRender];

    let delay = match reason {
        CloseReason::LoggedOut => {
            effects.push(Effect::PublishSession);
            effects.push(Effect::Delete);
            return effects;
        }
        CloseReason::RestartRequired => {
            state.reconnect_attempts = 0;
            ctx.policy.restart_required_delay
        }
        CloseReason::Other { .. } if !state.has_ever_connected => {
            state.reconnect_attempts = 0;
            ctx.policy.first_pairing_delay
        }
        CloseReason::Other { .. } => {
            state.reconnect_attempts = state.reconnect_attempts.saturating_add(1);
            ctx.policy.backoff_delay(state.reconnect_attempts)
        }
    };

    effects.push(Effect::PublishSession);
    if ctx.reconnect_pending {
        effects.push(Effect::SkipDuplicateReconnect);
    } else {
        effects.push(Effect::ScheduleReconnect(delay));
    }
    effects
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TransitionContext {
        TransitionContext::new(ReconnectPolicy::default(), false)
    }

    fn ctx_with_pending_reconnect() -> TransitionContext {
        TransitionContext::new(ReconnectPolicy::default(), true)
    }

    fn identity() -> ConnectorIdentity {
        ConnectorIdentity {
            display_name: "Front desk".to_string(),
            phone_number: "5511999999999".to_string(),
        }
    }

    fn connected_state() -> SessionState {
        let mut state = SessionState::new("alpha");
        transition(&mut state, Input::Opened(identity()), &ctx());
        state
    }

    fn ordinary_close() -> Input {
        Input::Closed(CloseReason::other("stream errored"))
    }

    fn scheduled_delay(effects: &[Effect]) -> Option<Duration> {
        effects.iter().find_map(|e| match e {
            Effect::ScheduleReconnect(d) => Some(*d),
            _ => None,
        })
    }

    // ── Pairing code ──────────────────────────────────────────────────────────

    #[test]
    fn test_qr_on_pending_stores_text_publishes_and_renders() {
        // Arrange
        let mut state = SessionState::new("alpha");

        // Act
        let effects = transition(&mut state, Input::QrIssued("Q1".into()), &ctx());

        // Assert
        assert_eq!(state.qr_text.as_deref(), Some("Q1"));
        assert!(state.last_qr_at.is_some());
        assert_eq!(
            effects,
            vec![
                Effect::PublishQrText("Q1".into()),
                Effect::RenderQr("Q1".into())
            ]
        );
    }

    #[test]
    fn test_repeated_qr_text_publishes_without_rerender() {
        let mut state = SessionState::new("alpha");
        transition(&mut state, Input::QrIssued("Q1".into()), &ctx());

        let effects = transition(&mut state, Input::QrIssued("Q1".into()), &ctx());

        assert_eq!(effects, vec![Effect::PublishQrText("Q1".into())]);
    }

    #[test]
    fn test_new_qr_text_clears_previous_artifact() {
        let mut state = SessionState::new("alpha");
        transition(&mut state, Input::QrIssued("Q1".into()), &ctx());
        state.qr_artifact = Some(crate::domain::session::QrArtifact {
            format: crate::domain::session::QrFormat::Svg,
            data_url: "data:old".into(),
        });

        transition(&mut state, Input::QrIssued("Q2".into()), &ctx());

        assert!(state.qr_artifact.is_none());
        assert_eq!(state.qr_text.as_deref(), Some("Q2"));
    }

    #[test]
    fn test_qr_while_connected_is_ignored() {
        let mut state = connected_state();
        let effects = transition(&mut state, Input::QrIssued("late".into()), &ctx());
        assert!(effects.is_empty());
        assert!(state.qr_text.is_none());
    }

    // ── Open ──────────────────────────────────────────────────────────────────

    #[test]
    fn test_open_connects_and_issues_token() {
        // Arrange
        let mut state = SessionState::new("alpha");
        transition(&mut state, Input::QrIssued("Q1".into()), &ctx());

        // Act
        let effects = transition(&mut state, Input::Opened(identity()), &ctx());

        // Assert
        assert_eq!(state.status, SessionStatus::Connected);
        assert!(state.token.is_some());
        assert!(state.has_ever_connected);
        assert!(state.qr_text.is_none());
        assert!(state.qr_artifact.is_none());
        assert!(state.last_qr_at.is_none());
        assert_eq!(state.display_name, "Front desk");
        assert_eq!(state.phone_number, "5511999999999");
        assert_eq!(
            effects,
            vec![
                Effect::CancelQrRender,
                Effect::CancelReconnect,
                Effect::PublishSession
            ]
        );
    }

    #[test]
    fn test_each_open_regenerates_token() {
        let mut state = connected_state();
        let first = state.token.clone();
        transition(&mut state, ordinary_close(), &ctx());
        transition(&mut state, Input::Opened(identity()), &ctx());
        assert!(state.token.is_some());
        assert_ne!(state.token, first);
    }

    #[test]
    fn test_open_resets_reconnect_attempts() {
        let mut state = connected_state();
        for _ in 0..4 {
            transition(&mut state, ordinary_close(), &ctx());
        }
        assert_eq!(state.reconnect_attempts, 4);

        transition(&mut state, Input::Opened(identity()), &ctx());

        assert_eq!(state.reconnect_attempts, 0);
    }

    // ── Close ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_logged_out_close_deletes_without_reconnect() {
        for prior_attempts in [0u32, 1, 7, 30] {
            // Arrange
            let mut state = connected_state();
            state.reconnect_attempts = prior_attempts;

            // Act
            let effects =
                transition(&mut state, Input::Closed(CloseReason::LoggedOut), &ctx());

            // Assert
            assert_eq!(state.status, SessionStatus::Disconnected);
            assert!(state.token.is_none());
            assert_eq!(
                effects,
                vec![
                    Effect::DropConnector,
                    Effect::CancelQrRender,
                    Effect::PublishSession,
                    Effect::Delete
                ]
            );
            assert!(scheduled_delay(&effects).is_none());
        }
    }

    #[test]
    fn test_restart_required_resets_attempts_and_uses_short_delay() {
        let mut state = connected_state();
        state.reconnect_attempts = 3;

        let effects = transition(
            &mut state,
            Input::Closed(CloseReason::RestartRequired),
            &ctx(),
        );

        assert_eq!(state.reconnect_attempts, 0);
        assert_eq!(scheduled_delay(&effects), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_close_before_first_connection_uses_first_pairing_delay() {
        let mut state = SessionState::new("alpha");

        let effects = transition(&mut state, ordinary_close(), &ctx());

        assert_eq!(state.status, SessionStatus::Disconnected);
        assert_eq!(state.reconnect_attempts, 0);
        assert_eq!(scheduled_delay(&effects), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_nth_ordinary_close_uses_exponential_backoff() {
        let mut state = connected_state();
        for n in 1..=8u32 {
            let effects = transition(&mut state, ordinary_close(), &ctx());
            let expected = (1000u64 * 2u64.pow(n)).min(60_000);
            assert_eq!(state.reconnect_attempts, n);
            assert_eq!(
                scheduled_delay(&effects),
                Some(Duration::from_millis(expected)),
                "close #{n}"
            );
        }
    }

    #[test]
    fn test_close_publishes_before_scheduling() {
        let mut state = connected_state();
        let effects = transition(&mut state, ordinary_close(), &ctx());
        let publish = effects.iter().position(|e| *e == Effect::PublishSession);
        let schedule = effects
            .iter()
            .position(|e| matches!(e, Effect::ScheduleReconnect(_)));
        assert!(publish < schedule);
        assert_eq!(effects[0], Effect::DropConnector);
        assert_eq!(effects[1], Effect::CancelQrRender);
    }

    #[test]
    fn test_close_with_pending_reconnect_skips_scheduling() {
        let mut state = connected_state();

        let effects = transition(&mut state, ordinary_close(), &ctx_with_pending_reconnect());

        assert!(scheduled_delay(&effects).is_none());
        assert!(effects.contains(&Effect::SkipDuplicateReconnect));
        assert_eq!(state.status, SessionStatus::Disconnected);
    }

    #[test]
    fn test_duplicate_guard_applies_to_restart_required_too() {
        let mut state = connected_state();
        let effects = transition(
            &mut state,
            Input::Closed(CloseReason::RestartRequired),
            &ctx_with_pending_reconnect(),
        );
        assert_eq!(effects.last(), Some(&Effect::SkipDuplicateReconnect));
    }

    #[test]
    fn test_close_keeps_pairing_text() {
        // Pairing material is cleared only on Connected or Deleted.
        let mut state = SessionState::new("alpha");
        transition(&mut state, Input::QrIssued("Q1".into()), &ctx());
        transition(&mut state, ordinary_close(), &ctx());
        assert_eq!(state.qr_text.as_deref(), Some("Q1"));
    }

    // ── Deleted ───────────────────────────────────────────────────────────────

    #[test]
    fn test_deleted_session_ignores_all_inputs() {
        let mut state = SessionState::new("alpha");
        state.status = SessionStatus::Deleted;

        for input in [
            Input::QrIssued("Q".into()),
            Input::Opened(identity()),
            ordinary_close(),
        ] {
            assert!(transition(&mut state, input, &ctx()).is_empty());
            assert_eq!(state.status, SessionStatus::Deleted);
        }
    }
}
