//! High-level payload definitions for devlink services.
//!
//! Each sub-module defines the structured request/response payloads
//! for one service domain. Payloads are serialized with `serde` +
//! `bincode` and carried inside [`Message`] bodies.
//!
//! [`Message`]: crate::message::Message

pub mod device;
pub mod event;
pub mod handshake;
pub mod registry;

// Re-export the most commonly used types at the protocol level.
pub use device::{DeviceInfo, DeviceState, DeviceStatus};
pub use event::StateChanged;
pub use handshake::Hello;
pub use registry::{ServiceList, ServiceSummary};
