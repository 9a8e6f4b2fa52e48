//! Connection lifecycle and request-correlation state.

pub mod connection;
pub mod pending;

pub use connection::ConnectionPhase;
pub use pending::{ExpiredRequest, PendingRequests};
