//! Device service payloads — identity and state queries.
//!
//! # Wire Protocol
//!
//! ```text
//! Center ──[Request Device/DeviceInfo]────────► Agent
//!   Payload: empty
//!
//! Agent  ──[Response Device/DeviceInfo, Ok]───► Center
//!   Payload: DeviceInfo (bincode)
//!
//! Center ──[Request Device/DeviceState]───────► Agent
//!   Payload: empty
//!
//! Agent  ──[Response Device/DeviceState, Ok]──► Center
//!   Payload: DeviceStatus (bincode)
//! ```

use serde::{Deserialize, Serialize};

use crate::error::LinkError;
use crate::factory::MessageFactory;
use crate::message::{Command, Message};

// ── DeviceInfo ───────────────────────────────────────────────────

/// Static identity of one device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device model designation (e.g. `"LNX-2300"`).
    pub model: String,

    /// Serial number.
    pub serial: String,

    /// Firmware version string.
    pub firmware: String,

    /// Vendor name.
    pub vendor: String,
}

impl DeviceInfo {
    pub fn to_bytes(&self) -> Result<Vec<u8>, LinkError> {
        bincode::serialize(self).map_err(|e| LinkError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinkError> {
        bincode::deserialize(bytes).map_err(|e| LinkError::Encoding(e.to_string()))
    }

    /// Build the empty request that queries a device's identity.
    pub fn request(factory: &MessageFactory) -> Result<Message, LinkError> {
        factory.request(Command::DeviceInfo, Vec::new())
    }
}

// ── DeviceState / DeviceStatus ───────────────────────────────────

/// The coarse operational state of a device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceState {
    /// Powered and reachable, not doing anything.
    #[default]
    Idle,
    /// Actively producing data.
    Acquiring,
    /// An unrecoverable condition; see `last_error`.
    Fault,
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Snapshot answered to a `DeviceState` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceStatus {
    pub state: DeviceState,

    /// Seconds since the agent started.
    pub uptime_secs: u64,

    /// Most recent fault description, if any.
    pub last_error: Option<String>,
}

impl DeviceStatus {
    pub fn new(state: DeviceState, uptime_secs: u64) -> Self {
        Self {
            state,
            uptime_secs,
            last_error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, LinkError> {
        bincode::serialize(self).map_err(|e| LinkError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinkError> {
        bincode::deserialize(bytes).map_err(|e| LinkError::Encoding(e.to_string()))
    }

    /// Build the empty request that queries a device's status.
    pub fn request(factory: &MessageFactory) -> Result<Message, LinkError> {
        factory.request(Command::DeviceState, Vec::new())
    }
}

// ── Tests ────────────────────────────────────────────────────────
