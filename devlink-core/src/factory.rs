//! Message construction with sequence-number allocation.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::LinkError;
use crate::flags::FrameFlags;
use crate::message::{Command, Message, StatusCode};

/// Builds outbound messages, handing out monotonically increasing
/// sequence numbers from a shared counter.
///
/// Sequence 0 is reserved for heartbeats; the counter starts at 1 and
/// wraps back to 1, never 0. One factory is shared per node so that
/// every outbound request on every connection gets a distinct number.
#[derive(Debug)]
pub struct MessageFactory {
    next_sequence: AtomicU32,
}

impl MessageFactory {
    pub fn new() -> Self {
        Self {
            next_sequence: AtomicU32::new(1),
        }
    }

    /// Allocate the next sequence number, skipping the reserved 0.
    pub fn next_sequence(&self) -> u32 {
        loop {
            let seq = self.next_sequence.fetch_add(1, Ordering::Relaxed);
            if seq != 0 {
                return seq;
            }
            // wrapped — 0 is reserved, take the next one
        }
    }

    /// Build a request with a fresh sequence number.
    pub fn request(&self, command: Command, payload: Vec<u8>) -> Result<Message, LinkError> {
        Message::request(self.next_sequence(), command, payload)
    }

    /// Build a notification with a fresh sequence number.
    pub fn notify(&self, command: Command, payload: Vec<u8>) -> Result<Message, LinkError> {
        Message::notify(self.next_sequence(), command, payload)
    }

    /// Build a broadcast notification (fan-out flag set).
    pub fn broadcast(&self, command: Command, payload: Vec<u8>) -> Result<Message, LinkError> {
        Message::notify_with_flags(
            self.next_sequence(),
            command,
            payload,
            FrameFlags::BROADCAST,
        )
    }

    /// Build the response to `request`, echoing its sequence and command.
    pub fn response_to(
        &self,
        request: &Message,
        status: StatusCode,
        payload: Vec<u8>,
    ) -> Result<Message, LinkError> {
        Message::response(request.sequence(), request.command()?, status, payload)
    }

    /// Build one chunk of a streamed response.
    ///
    /// `last` marks the final chunk of the stream.
    pub fn stream_chunk(
        &self,
        request: &Message,
        payload: Vec<u8>,
        last: bool,
    ) -> Result<Message, LinkError> {
        let mut flags = FrameFlags::STREAM;
        if last {
            flags |= FrameFlags::STREAM_END;
        }
        Message::response_with_flags(
            request.sequence(),
            request.command()?,
            StatusCode::Ok,
            payload,
            flags,
        )
    }
}

impl Default for MessageFactory {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
