//! Registry service payloads — querying the center's service view.

use serde::{Deserialize, Serialize};

use crate::discovery::ServiceEntry;
use crate::error::LinkError;
use crate::factory::MessageFactory;
use crate::message::{Command, Message};

/// One service as the center currently sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceSummary {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    /// Milliseconds since the last announcement was heard.
    pub age_ms: u64,
}

impl From<&ServiceEntry> for ServiceSummary {
    fn from(entry: &ServiceEntry) -> Self {
        Self {
            name: entry.announcement.service.clone(),
            host: entry.addr.to_string(),
            port: entry.announcement.port,
            model: entry.announcement.model.clone(),
            age_ms: entry.age().as_millis() as u64,
        }
    }
}

/// Response payload for `ListServices`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ServiceList {
    pub services: Vec<ServiceSummary>,
}

impl ServiceList {
    pub fn to_bytes(&self) -> Result<Vec<u8>, LinkError> {
        bincode::serialize(self).map_err(|e| LinkError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinkError> {
        bincode::deserialize(bytes).map_err(|e| LinkError::Encoding(e.to_string()))
    }

    /// Build the empty request that queries the service list.
    pub fn request(factory: &MessageFactory) -> Result<Message, LinkError> {
        factory.request(Command::ListServices, Vec::new())
    }
}
