//! Domain layer: pure session-lifecycle rules.
//!
//! Nothing in here performs I/O or spawns tasks.  The application layer in
//! `pairlink-gateway` feeds inputs into these types and carries out the
//! [`machine::Effect`]s they return.

pub mod health;
pub mod machine;
pub mod reconnect;
pub mod session;
