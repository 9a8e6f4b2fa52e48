//! Outstanding-request correlation.
//!
//! Outbound requests are tracked by sequence number until the matching
//! response arrives or their deadline passes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::message::{Command, Message};

// ── TrackedRequest ───────────────────────────────────────────────

struct TrackedRequest {
    command: Command,
    reply: oneshot::Sender<Message>,
    sent_at: Instant,
    /// Optional deadline; `None` means no timeout.
    deadline: Option<Duration>,
}

impl TrackedRequest {
    fn is_expired(&self) -> bool {
        match self.deadline {
            Some(d) => self.sent_at.elapsed() > d,
            None => false,
        }
    }
}

/// Summary of a request that timed out, for event reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredRequest {
    pub sequence: u32,
    pub command: Command,
    pub waited: Duration,
}

// ── PendingRequests ──────────────────────────────────────────────

/// Correlates outbound requests with inbound responses by sequence
/// number.
///
/// Each tracked request holds the oneshot sender that its caller is
/// awaiting. Completing a request hands the response over; expiring it
/// drops the sender, which wakes the caller with a closed-channel
/// error.
pub struct PendingRequests {
    requests: HashMap<u32, TrackedRequest>,
    /// Deadline applied to requests tracked without an explicit one.
    default_timeout: Option<Duration>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            requests: HashMap::new(),
            default_timeout: None,
        }
    }

    /// Set the default deadline applied to all new requests.
    pub fn set_default_timeout(&mut self, timeout: Duration) {
        self.default_timeout = Some(timeout);
    }

    /// Track a request with the default deadline.
    pub fn track(&mut self, sequence: u32, command: Command, reply: oneshot::Sender<Message>) {
        self.track_with_deadline(sequence, command, reply, self.default_timeout);
    }

    /// Track a request with an explicit deadline.
    pub fn track_with_deadline(
        &mut self,
        sequence: u32,
        command: Command,
        reply: oneshot::Sender<Message>,
        deadline: Option<Duration>,
    ) {
        self.requests.insert(
            sequence,
            TrackedRequest {
                command,
                reply,
                sent_at: Instant::now(),
                deadline,
            },
        );
    }

    /// Resolve a request with its response.
    ///
    /// Returns `false` if the sequence is unknown — a late, duplicate
    /// or unsolicited response the caller should log and drop.
    pub fn complete(&mut self, sequence: u32, response: Message) -> bool {
        match self.requests.remove(&sequence) {
            Some(tracked) => {
                // The caller may have given up waiting; a failed send
                // just means nobody wants the response anymore.
                let _ = tracked.reply.send(response);
                true
            }
            None => false,
        }
    }

    /// Number of in-flight requests.
    pub fn pending_count(&self) -> usize {
        self.requests.len()
    }

    /// Check if a specific sequence is awaiting its response.
    pub fn is_pending(&self, sequence: u32) -> bool {
        self.requests.contains_key(&sequence)
    }

    /// Remove all expired requests, dropping their reply senders.
    ///
    /// Callers awaiting those replies observe a closed channel.
    pub fn drain_expired(&mut self) -> Vec<ExpiredRequest> {
        let expired: Vec<u32> = self
            .requests
            .iter()
            .filter(|(_, req)| req.is_expired())
            .map(|(&seq, _)| seq)
            .collect();

        expired
            .into_iter()
            .filter_map(|seq| {
                self.requests.remove(&seq).map(|req| ExpiredRequest {
                    sequence: seq,
                    command: req.command,
                    waited: req.sent_at.elapsed(),
                })
            })
            .collect()
    }

    /// Stop tracking a request whose caller gave up waiting.
    pub fn cancel(&mut self, sequence: u32) -> bool {
        self.requests.remove(&sequence).is_some()
    }

    /// Drop every in-flight request (connection teardown).
    pub fn clear(&mut self) {
        self.requests.clear();
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
