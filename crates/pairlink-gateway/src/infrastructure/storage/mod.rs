//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module maps the TOML file onto [`config::GatewayConfig`],
//! fills in defaults for anything missing, applies `PAIRLINK_*` environment
//! overrides, and converts the result into the runtime settings the
//! application layer consumes.

pub mod config;
