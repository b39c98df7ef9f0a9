//! pairlink-gateway library entry point.
//!
//! The gateway keeps many paired sessions to the messaging network alive,
//! drives each one through the connection state machine from
//! `pairlink-core`, and fans lifecycle and domain events out to a push sink
//! and to HTTP webhooks.
//!
//! - **`application`** – The session supervisor, the QR render pipeline, the
//!   event dispatcher, and the port traits they depend on.
//! - **`infrastructure`** – Concrete adapters for those ports: credential
//!   stores, the broadcast push hub, the reqwest webhook transport, the QR
//!   renderer, configuration, and logging.
//!
//! The wire protocol itself is not part of this crate.  Callers plug a real
//! connector in through [`application::ports::ConnectorFactory`].

pub mod application;
pub mod infrastructure;

pub use application::dispatcher::{EventDispatcher, WebhookSettings, WebhookSink};
pub use application::supervisor::{SessionSupervisor, SupervisorError, SupervisorSettings};
pub use infrastructure::gateway::{Gateway, GatewayError};
