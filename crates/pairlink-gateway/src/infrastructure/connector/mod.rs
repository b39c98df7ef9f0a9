//! Protocol connector adapters.
//!
//! The production connector (wire protocol, encryption, key exchange) is an
//! external component plugged in through
//! [`ConnectorFactory`](crate::application::ports::ConnectorFactory).  This
//! module only ships the scriptable in-process [`mock`] used by tests and
//! demos.

pub mod mock;

pub use mock::{MockConnector, MockConnectorFactory, MockConnectorHandle};
