//! Connection handshake — the Hello exchange.
//!
//! # Wire Protocol
//!
//! ```text
//! Initiator ──[Request System/Hello]──────────► Responder
//!   Payload: Hello (bincode)
//!
//! Responder ──[Response System/Hello, Ok]─────► Initiator
//!   Payload: Hello (bincode)
//! ```
//!
//! Both sides exchange their node name, protocol version and offered
//! service names. A version mismatch is rejected before the connection
//! enters the `Connected` phase.

use serde::{Deserialize, Serialize};

use crate::error::LinkError;
use crate::factory::MessageFactory;
use crate::frame::PROTOCOL_VERSION;
use crate::message::{Command, Message};

/// Payload of the Hello request and its response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hello {
    /// Stable node identifier (matches the discovery `node_id`).
    pub node: String,

    /// Protocol version the sender speaks.
    pub version: u8,

    /// Service names this node offers over the connection.
    pub services: Vec<String>,
}

impl Hello {
    pub fn new(node: impl Into<String>, services: Vec<String>) -> Self {
        Self {
            node: node.into(),
            version: PROTOCOL_VERSION,
            services,
        }
    }

    /// Reject peers speaking a different protocol version.
    pub fn check_version(&self) -> Result<(), LinkError> {
        if self.version != PROTOCOL_VERSION {
            return Err(LinkError::UnsupportedVersion(self.version));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, LinkError> {
        bincode::serialize(self).map_err(|e| LinkError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinkError> {
        bincode::deserialize(bytes).map_err(|e| LinkError::Encoding(e.to_string()))
    }

    /// Build the Hello request that opens a handshake.
    pub fn into_request(self, factory: &MessageFactory) -> Result<Message, LinkError> {
        factory.request(Command::Hello, self.to_bytes()?)
    }
}
