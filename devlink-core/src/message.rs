//! Protocol message types: kinds, services, commands and the
//! [`Message`] envelope itself.
//!
//! Uses proper enums with `TryFrom` — no panics on unknown values.

use std::fmt;

use crate::crc::{crc16, verify_crc16};
use crate::error::LinkError;
use crate::flags::FrameFlags;
use crate::frame::{FrameHeader, HEADER_LEN, MAX_PAYLOAD_SIZE};

// ── MessageKind ──────────────────────────────────────────────────

/// Distinguishes the three traffic classes on a devlink connection.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Expects exactly one response carrying the same sequence number.
    Request = 0x1,
    /// Answers a request; echoes the request's sequence number.
    Response = 0x2,
    /// One-way; never answered.
    Notify = 0x3,
}

impl TryFrom<u8> for MessageKind {
    type Error = LinkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x1 => Ok(MessageKind::Request),
            0x2 => Ok(MessageKind::Response),
            0x3 => Ok(MessageKind::Notify),
            _ => Err(LinkError::UnknownVariant {
                type_name: "MessageKind",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Request => write!(f, "Request"),
            MessageKind::Response => write!(f, "Response"),
            MessageKind::Notify => write!(f, "Notify"),
        }
    }
}

// ── ServiceId ────────────────────────────────────────────────────

/// Routing key: which service a message is addressed to.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceId {
    /// Connection-level plumbing: handshake, liveness, teardown.
    System = 0x0000,
    /// Device identity and state queries.
    Device = 0x0001,
    /// The center's view of announced services.
    Registry = 0x0002,
    /// Unsolicited state-change notifications.
    Event = 0x0003,
}

impl TryFrom<u16> for ServiceId {
    type Error = LinkError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0000 => Ok(ServiceId::System),
            0x0001 => Ok(ServiceId::Device),
            0x0002 => Ok(ServiceId::Registry),
            0x0003 => Ok(ServiceId::Event),
            _ => Err(LinkError::UnknownVariant {
                type_name: "ServiceId",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Command ──────────────────────────────────────────────────────

/// All operations understood by the devlink protocol.
///
/// Organized by service range:
/// - `0x00xx` — System (handshake, liveness, teardown)
/// - `0x01xx` — Device (identity, state)
/// - `0x02xx` — Registry (announced-service queries)
/// - `0x03xx` — Event (notifications)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // ── System (0x00xx) ──────────────────────────────────────────
    /// Liveness probe; answered with an empty OK response.
    Ping = 0x0001,
    /// Connection handshake carrying a [`Hello`] payload.
    ///
    /// [`Hello`]: crate::protocol::handshake::Hello
    Hello = 0x0002,
    /// Graceful disconnect.
    Bye = 0x0003,
    /// Periodic keep-alive; sequence number 0, never answered.
    Heartbeat = 0x0004,

    // ── Device (0x01xx) ──────────────────────────────────────────
    /// Query static device identity (model, serial, firmware).
    DeviceInfo = 0x0101,
    /// Query current device state and status counters.
    DeviceState = 0x0102,

    // ── Registry (0x02xx) ────────────────────────────────────────
    /// List the services the peer currently knows about.
    ListServices = 0x0201,

    // ── Event (0x03xx) ───────────────────────────────────────────
    /// A device changed state.
    StateChanged = 0x0301,
    /// A service finished its handshake and is ready.
    ServiceOnline = 0x0302,
    /// A service said Bye or its lease expired.
    ServiceOffline = 0x0303,
}

impl TryFrom<u16> for Command {
    type Error = LinkError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Command::Ping),
            0x0002 => Ok(Command::Hello),
            0x0003 => Ok(Command::Bye),
            0x0004 => Ok(Command::Heartbeat),

            0x0101 => Ok(Command::DeviceInfo),
            0x0102 => Ok(Command::DeviceState),

            0x0201 => Ok(Command::ListServices),

            0x0301 => Ok(Command::StateChanged),
            0x0302 => Ok(Command::ServiceOnline),
            0x0303 => Ok(Command::ServiceOffline),

            _ => Err(LinkError::UnknownVariant {
                type_name: "Command",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Command {
    /// The service this command belongs to, derived from its range.
    pub fn service(&self) -> ServiceId {
        match (*self as u16) >> 8 {
            0x00 => ServiceId::System,
            0x01 => ServiceId::Device,
            0x02 => ServiceId::Registry,
            _ => ServiceId::Event,
        }
    }

    /// Returns `true` if this command expects a response from the peer.
    pub fn expects_response(&self) -> bool {
        !matches!(
            self,
            Command::Heartbeat
                | Command::Bye
                | Command::StateChanged
                | Command::ServiceOnline
                | Command::ServiceOffline
        )
    }
}

// ── StatusCode ───────────────────────────────────────────────────

/// Outcome of a request, carried in the response header.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatusCode {
    /// The request was handled.
    #[default]
    Ok = 0x0000,
    /// No handler is registered for the addressed service.
    UnknownService = 0x0001,
    /// The service exists but does not implement the command.
    UnknownCommand = 0x0002,
    /// The payload failed to deserialize.
    BadPayload = 0x0003,
    /// The peer is temporarily unable to serve the request.
    Busy = 0x0004,
    /// The peer understood the request but refuses it.
    Unsupported = 0x0005,
    /// The handler failed internally.
    Internal = 0x0006,
}

impl TryFrom<u16> for StatusCode {
    type Error = LinkError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0000 => Ok(StatusCode::Ok),
            0x0001 => Ok(StatusCode::UnknownService),
            0x0002 => Ok(StatusCode::UnknownCommand),
            0x0003 => Ok(StatusCode::BadPayload),
            0x0004 => Ok(StatusCode::Busy),
            0x0005 => Ok(StatusCode::Unsupported),
            0x0006 => Ok(StatusCode::Internal),
            _ => Err(LinkError::UnknownVariant {
                type_name: "StatusCode",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl StatusCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, StatusCode::Ok)
    }
}

// ── Message ──────────────────────────────────────────────────────

/// One complete protocol message: a validated header plus payload.
#[derive(Debug, Clone)]
pub struct Message {
    header: FrameHeader,
    payload: Vec<u8>,
}

impl Message {
    /// The zero-sequence keep-alive emitted by the connection layer.
    pub fn heartbeat() -> Self {
        Self {
            header: FrameHeader::new(
                MessageKind::Notify as u8,
                FrameFlags::NONE.bits(),
                ServiceId::System as u16,
                Command::Heartbeat as u16,
                0,
                0,
                0,
            ),
            payload: Vec::new(),
        }
    }

    /// Build a request for `command` with the given sequence number.
    pub fn request(sequence: u32, command: Command, payload: Vec<u8>) -> Result<Self, LinkError> {
        Self::build(
            MessageKind::Request,
            FrameFlags::NONE,
            command,
            StatusCode::Ok,
            sequence,
            payload,
        )
    }

    /// Build a response echoing `sequence`, carrying `status`.
    pub fn response(
        sequence: u32,
        command: Command,
        status: StatusCode,
        payload: Vec<u8>,
    ) -> Result<Self, LinkError> {
        Self::build(
            MessageKind::Response,
            FrameFlags::NONE,
            command,
            status,
            sequence,
            payload,
        )
    }

    /// Build a response with explicit flags (stream chunks).
    pub fn response_with_flags(
        sequence: u32,
        command: Command,
        status: StatusCode,
        payload: Vec<u8>,
        flags: FrameFlags,
    ) -> Result<Self, LinkError> {
        Self::build(MessageKind::Response, flags, command, status, sequence, payload)
    }

    /// Build a one-way notification.
    pub fn notify(sequence: u32, command: Command, payload: Vec<u8>) -> Result<Self, LinkError> {
        Self::build(
            MessageKind::Notify,
            FrameFlags::NONE,
            command,
            StatusCode::Ok,
            sequence,
            payload,
        )
    }

    /// Build a notification with explicit flags (broadcast fan-out).
    pub fn notify_with_flags(
        sequence: u32,
        command: Command,
        payload: Vec<u8>,
        flags: FrameFlags,
    ) -> Result<Self, LinkError> {
        Self::build(MessageKind::Notify, flags, command, StatusCode::Ok, sequence, payload)
    }

    /// Build an empty error response echoing the raw service and
    /// command fields of `request`.
    ///
    /// Used when the request's discriminants did not parse, so no
    /// typed [`Command`] exists to echo.
    pub fn status_response_for(request: &Message, status: StatusCode) -> Self {
        Self {
            header: FrameHeader::new(
                MessageKind::Response as u8,
                FrameFlags::NONE.bits(),
                request.header.service_raw(),
                request.header.command_raw(),
                status as u16,
                request.sequence(),
                0,
            ),
            payload: Vec::new(),
        }
    }

    fn build(
        kind: MessageKind,
        flags: FrameFlags,
        command: Command,
        status: StatusCode,
        sequence: u32,
        payload: Vec<u8>,
    ) -> Result<Self, LinkError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(LinkError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut header = FrameHeader::new(
            kind as u8,
            flags.bits(),
            command.service() as u16,
            command as u16,
            status as u16,
            sequence,
            payload.len() as u32,
        );
        if !payload.is_empty() {
            header.set_crc16(crc16(&payload));
        }

        Ok(Self { header, payload })
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn kind(&self) -> Result<MessageKind, LinkError> {
        MessageKind::try_from(self.header.kind_raw())
    }

    pub fn service(&self) -> Result<ServiceId, LinkError> {
        ServiceId::try_from(self.header.service_raw())
    }

    pub fn command(&self) -> Result<Command, LinkError> {
        Command::try_from(self.header.command_raw())
    }

    pub fn status(&self) -> Result<StatusCode, LinkError> {
        StatusCode::try_from(self.header.status_raw())
    }

    pub fn flags(&self) -> FrameFlags {
        FrameFlags::from_wire(self.header.flags_raw())
    }

    pub fn sequence(&self) -> u32 {
        self.header.sequence()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// `true` for the zero-sequence keep-alive.
    pub fn is_heartbeat(&self) -> bool {
        self.sequence() == 0 && self.header.command_raw() == Command::Heartbeat as u16
    }

    // ── Wire conversion ──────────────────────────────────────────

    pub fn to_bytes(&self) -> Result<Vec<u8>, LinkError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(LinkError::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Parse one complete frame. The slice must contain exactly one
    /// header plus the payload it declares.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinkError> {
        if bytes.len() < HEADER_LEN {
            return Err(LinkError::InvalidFrameLength {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        let header_bytes: crate::frame::FrameHeaderBytes = bytes[0..HEADER_LEN]
            .try_into()
            .map_err(|_| LinkError::InvalidHeader("short header slice"))?;
        let header = FrameHeader::from_bytes(header_bytes)?;

        let expected = HEADER_LEN + header.payload_len() as usize;
        if bytes.len() != expected {
            return Err(LinkError::InvalidFrameLength {
                expected,
                actual: bytes.len(),
            });
        }

        let message = Self {
            header,
            payload: bytes[HEADER_LEN..].to_vec(),
        };
        message.verify_payload()?;
        Ok(message)
    }

    /// Check the stored CRC against the payload.
    ///
    /// Empty payloads carry CRC 0 and always verify.
    pub fn verify_payload(&self) -> Result<(), LinkError> {
        if self.payload.is_empty() {
            return Ok(());
        }
        let stored = self.header.crc16();
        if !verify_crc16(&self.payload, stored) {
            return Err(LinkError::CrcMismatch {
                stored,
                computed: crc16(&self.payload),
            });
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrip() {
        for kind in [MessageKind::Request, MessageKind::Response, MessageKind::Notify] {
            assert_eq!(MessageKind::try_from(kind as u8).unwrap(), kind);
        }
    }

    #[test]
    fn kind_invalid() {
        assert!(MessageKind::try_from(0xFF).is_err());
    }

    #[test]
    fn command_roundtrip() {
        let cmds = [
            Command::Ping,
            Command::Hello,
            Command::Bye,
            Command::Heartbeat,
            Command::DeviceInfo,
            Command::DeviceState,
            Command::ListServices,
            Command::StateChanged,
            Command::ServiceOnline,
            Command::ServiceOffline,
        ];
        for cmd in cmds {
            assert_eq!(Command::try_from(cmd as u16).unwrap(), cmd);
        }
    }

    #[test]
    fn command_invalid() {
        assert!(Command::try_from(0xDEAD).is_err());
    }

    #[test]
    fn command_service_ranges() {
        assert_eq!(Command::Ping.service(), ServiceId::System);
        assert_eq!(Command::DeviceInfo.service(), ServiceId::Device);
        assert_eq!(Command::ListServices.service(), ServiceId::Registry);
        assert_eq!(Command::StateChanged.service(), ServiceId::Event);
    }

    #[test]
    fn one_way_commands_expect_no_response() {
        assert!(!Command::Heartbeat.expects_response());
        assert!(!Command::Bye.expects_response());
        assert!(!Command::StateChanged.expects_response());
        assert!(Command::Ping.expects_response());
        assert!(Command::DeviceInfo.expects_response());
    }

    #[test]
    fn status_roundtrip_and_display() {
        for status in [
            StatusCode::Ok,
            StatusCode::UnknownService,
            StatusCode::UnknownCommand,
            StatusCode::BadPayload,
            StatusCode::Busy,
            StatusCode::Unsupported,
            StatusCode::Internal,
        ] {
            assert_eq!(StatusCode::try_from(status as u16).unwrap(), status);
        }
        assert!(StatusCode::Ok.is_ok());
        assert!(!StatusCode::Busy.is_ok());
        assert_eq!(StatusCode::BadPayload.to_string(), "BadPayload");
    }

    #[test]
    fn message_wire_roundtrip() {
        let msg = Message::request(7, Command::DeviceInfo, b"probe".to_vec()).unwrap();
        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.kind().unwrap(), MessageKind::Request);
        assert_eq!(decoded.command().unwrap(), Command::DeviceInfo);
        assert_eq!(decoded.service().unwrap(), ServiceId::Device);
        assert_eq!(decoded.sequence(), 7);
        assert_eq!(decoded.payload(), b"probe");
    }

    #[test]
    fn response_carries_status() {
        let msg = Message::response(3, Command::Ping, StatusCode::Busy, Vec::new()).unwrap();
        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.status().unwrap(), StatusCode::Busy);
        assert_eq!(decoded.kind().unwrap(), MessageKind::Response);
    }

    #[test]
    fn corrupt_payload_is_rejected() {
        let msg = Message::notify(9, Command::StateChanged, b"running".to_vec()).unwrap();
        let mut bytes = msg.to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            Message::from_bytes(&bytes),
            Err(LinkError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let msg = Message::request(1, Command::Ping, b"x".to_vec()).unwrap();
        let bytes = msg.to_bytes().unwrap();
        assert!(matches!(
            Message::from_bytes(&bytes[..bytes.len() - 1]),
            Err(LinkError::InvalidFrameLength { .. })
        ));
    }

    #[test]
    fn oversized_payload_is_rejected_at_build() {
        let too_large = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert!(matches!(
            Message::request(1, Command::DeviceInfo, too_large),
            Err(LinkError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn heartbeat_shape() {
        let hb = Message::heartbeat();
        assert!(hb.is_heartbeat());
        assert_eq!(hb.sequence(), 0);
        assert_eq!(hb.kind().unwrap(), MessageKind::Notify);
        assert!(hb.payload().is_empty());

        let decoded = Message::from_bytes(&hb.to_bytes().unwrap()).unwrap();
        assert!(decoded.is_heartbeat());
    }

    #[test]
    fn empty_payload_has_zero_crc() {
        let msg = Message::request(1, Command::Ping, Vec::new()).unwrap();
        assert_eq!(msg.header().crc16(), 0);
        assert!(msg.verify_payload().is_ok());
    }
}
