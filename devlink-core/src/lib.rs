//! # devlink-core
//!
//! Core protocol library for the devlink device-communication
//! framework.
//!
//! This crate contains:
//! - **Wire protocol**: `FrameHeader`, `Message`, `MessageKind`,
//!   `ServiceId`, `Command`, `StatusCode`, `FrameFlags`, CRC-16
//! - **Protocol payloads**: Structured request/response types for
//!   handshake, device, registry and event services
//! - **Codec**: `LinkCodec` for framed TCP I/O via `tokio_util`
//! - **Network**: `Connection` for managed TCP connections with
//!   heartbeat
//! - **Discovery**: UDP broadcast announcements with lease expiry
//! - **Routing**: `MessageRouter` dispatching to `ServiceHandler`s
//! - **State**: Connection phase machine and request correlation
//! - **Manager**: `CommunicationManager` — the connection registry
//!   tying all of the above together
//! - **Error**: `LinkError` — typed, `thiserror`-based error hierarchy

pub mod codec;
pub mod crc;
pub mod discovery;
pub mod error;
pub mod factory;
pub mod flags;
pub mod frame;
pub mod manager;
pub mod message;
pub mod network;
pub mod protocol;
pub mod router;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::LinkCodec;
pub use discovery::{
    Announcement, Announcer, DiscoveryEvent, ServiceEntry, ServiceRegistry, Watcher,
    DEFAULT_ANNOUNCE_INTERVAL, DEFAULT_DISCOVERY_PORT, DEFAULT_SERVICE_TTL,
};
pub use error::LinkError;
pub use factory::MessageFactory;
pub use flags::FrameFlags;
pub use frame::{FrameHeader, HEADER_LEN, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};
pub use manager::{CommunicationManager, LinkEvent, ManagerConfig};
pub use message::{Command, Message, MessageKind, ServiceId, StatusCode};
pub use network::{Connection, Endpoint, MessageSender};
pub use router::{MessageRouter, ServiceHandler};
pub use state::{ConnectionPhase, ExpiredRequest, PendingRequests};
