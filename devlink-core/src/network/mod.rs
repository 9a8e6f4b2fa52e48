//! TCP connection plumbing.

pub mod connection;

pub use connection::{Connection, Endpoint, MessageSender};
