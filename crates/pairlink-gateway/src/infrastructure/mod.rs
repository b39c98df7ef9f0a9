//! Infrastructure layer for the gateway.
//!
//! Contains the concrete adapters behind the application ports: credential
//! stores, the broadcast push hub, the reqwest webhook transport, the QR
//! renderer, a scriptable connector, configuration storage, and logging.
//! [`gateway`] wires them together.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `pairlink_core`, but MUST NOT be imported by the `application` layer.

pub mod connector;
pub mod credentials;
pub mod gateway;
pub mod logging;
pub mod push;
pub mod qr_render;
pub mod storage;
pub mod webhook;
