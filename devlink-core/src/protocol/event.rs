//! Event service payloads — unsolicited notifications.

use serde::{Deserialize, Serialize};

use crate::error::LinkError;
use crate::factory::MessageFactory;
use crate::message::{Command, Message};
use crate::protocol::device::DeviceState;

/// Payload of a `StateChanged` notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateChanged {
    /// Service whose device changed state.
    pub service: String,
    pub previous: DeviceState,
    pub current: DeviceState,
    /// Fault description when transitioning into `Fault`.
    pub detail: Option<String>,
}

impl StateChanged {
    pub fn new(service: impl Into<String>, previous: DeviceState, current: DeviceState) -> Self {
        Self {
            service: service.into(),
            previous,
            current,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, LinkError> {
        bincode::serialize(self).map_err(|e| LinkError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinkError> {
        bincode::deserialize(bytes).map_err(|e| LinkError::Encoding(e.to_string()))
    }

    /// Build the one-way notification carrying this payload.
    pub fn into_notify(self, factory: &MessageFactory) -> Result<Message, LinkError> {
        factory.notify(Command::StateChanged, self.to_bytes()?)
    }
}
