//! # pairlink-core
//!
//! Shared library for Pairlink containing the session domain model, the
//! connection state machine, the reconnect and circuit-breaker policies, and
//! the event shapes exchanged with the protocol connector and the sinks.
//!
//! This crate has zero dependencies on sockets, task spawning, or the file system.
//! Everything in it can be exercised from a plain `#[test]`.
//!
//! # Architecture overview
//!
//! Pairlink keeps many long-lived sessions to an external messaging network
//! alive at once.  Each session is paired out-of-band by scanning a QR code,
//! then reconnects on its own whenever the network drops it.  Lifecycle and
//! domain events are fanned out to a push sink and to HTTP webhooks.
//!
//! This crate is the pure foundation of that service:
//!
//! - **`domain`** – Session state, the transition function that drives it,
//!   the reconnect backoff policy, and per-endpoint webhook health.
//!
//! - **`protocol`** – The event catalog emitted by a protocol connector and
//!   the envelopes published to the push sink and webhooks.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `pairlink_core::SessionState` instead of the full module path.
pub use domain::health::{BreakerPolicy, EndpointHealth, FailureOutcome};
pub use domain::machine::{transition, Effect, Input, TransitionContext};
pub use domain::reconnect::ReconnectPolicy;
pub use domain::session::{
    ConnectorIdentity, DeletedNotice, QrArtifact, QrFormat, SessionId, SessionState,
    SessionStatus,
};
pub use protocol::envelope::{event_types, PushMessage, QrUpdate, WebhookEnvelope};
pub use protocol::events::{CloseReason, ConnectionPhase, ConnectionUpdate, ProtocolEvent};
