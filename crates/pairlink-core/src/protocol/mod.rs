//! Protocol layer: what the connector emits and what the sinks receive.
//!
//! - **`events`**   – The fixed catalog of events a protocol connector delivers
//!   for one session, in order.
//! - **`envelope`** – The JSON shapes published to the push sink and POSTed to
//!   webhooks, plus the well-known event type names.

pub mod envelope;
pub mod events;
