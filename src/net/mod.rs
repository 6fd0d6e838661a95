//! Realtime socket plumbing: dialing, reconnect schedules and the transport.

pub mod backoff;
pub mod dial;
pub mod transport;

#[cfg(test)]
pub(crate) mod fake;

pub use backoff::{ReconnectPolicy, RetryPolicy};
pub use dial::{Connector, Incoming, Outgoing, Socket, TungsteniteConnector};
pub use transport::{Phase, Route, Transport};
