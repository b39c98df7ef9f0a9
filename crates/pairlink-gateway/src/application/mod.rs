//! Application layer: session orchestration.
//!
//! Nothing in here touches the network, the file system, or a concrete
//! renderer directly.  Every outside collaborator is reached through a trait
//! in [`ports`], so the whole layer runs against in-process fakes in tests.
//!
//! # Sub-modules
//!
//! - **`registry`**   – Concurrent map from session id to session record.
//! - **`tasks`**      – At-most-one-per-purpose cancelable deferred tasks.
//! - **`ports`**      – Traits implemented by the infrastructure layer.
//! - **`supervisor`** – Session lifecycle: start, protocol events, reconnect,
//!   delete, shutdown.
//! - **`qr_pipeline`** – Debounced off-thread QR rendering.
//! - **`dispatcher`** – Fan-out to the push sink and the webhook sink.

pub mod dispatcher;
pub mod ports;
pub mod qr_pipeline;
pub mod registry;
pub mod supervisor;
pub mod tasks;
