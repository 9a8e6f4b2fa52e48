//! Connection state machine shared by the center and agent sides.
//!
//! Provides a `ConnectionPhase` enum that models the full lifecycle
//! of a devlink peer connection, with validated transitions that
//! return `Result` instead of panicking.

use std::time::Instant;

use crate::error::LinkError;

// ── ConnectionPhase ──────────────────────────────────────────────

/// The current phase of a devlink peer connection.
///
/// ```text
///  Disconnected ──► Connecting ──► Handshaking ──► Connected
///       ▲                │               │              │
///       │                ▼               ▼              ▼
///       └──────── Disconnecting ◄────────┴──────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// No active connection. Initial / terminal state.
    #[default]
    Disconnected,

    /// TCP connection initiated but not yet established.
    Connecting,

    /// TCP link is up; performing the Hello exchange.
    Handshaking,

    /// Handshake complete; ready for requests and notifications.
    Connected {
        /// When the connection entered the `Connected` state.
        since: Instant,
    },

    /// Graceful shutdown in progress (Bye sent or received).
    Disconnecting,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Handshaking => write!(f, "Handshaking"),
            Self::Connected { .. } => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

impl ConnectionPhase {
    /// Returns `true` when the connection is fully established and
    /// ready for protocol traffic.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Returns `true` when the connection is in a terminal or idle state.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// How long the connection has been in the `Connected` state.
    ///
    /// Returns `None` for any other phase.
    pub fn connected_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Connecting`.
    ///
    /// Valid from: `Disconnected`.
    pub fn begin_connect(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Disconnected => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(LinkError::ProtocolViolation(
                "cannot connect: not in Disconnected state",
            )),
        }
    }

    /// Transition to `Handshaking`.
    ///
    /// Valid from: `Connecting`.
    pub fn begin_handshake(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Connecting => {
                *self = Self::Handshaking;
                Ok(())
            }
            _ => Err(LinkError::ProtocolViolation(
                "cannot handshake: not in Connecting state",
            )),
        }
    }

    /// Transition to `Connected`.
    ///
    /// Valid from: `Handshaking`.
    pub fn complete_handshake(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Handshaking => {
                *self = Self::Connected {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(LinkError::ProtocolViolation(
                "cannot complete handshake: not in Handshaking state",
            )),
        }
    }

    /// Transition to `Disconnecting`.
    ///
    /// Valid from: `Handshaking`, `Connected`.
    pub fn begin_disconnect(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Handshaking | Self::Connected { .. } => {
                *self = Self::Disconnecting;
                Ok(())
            }
            _ => Err(LinkError::ProtocolViolation(
                "cannot disconnect: not in Handshaking or Connected state",
            )),
        }
    }

    /// Transition to `Disconnected`.
    ///
    /// Valid from: `Disconnecting`, `Connecting` (timeout/failure),
    /// `Handshaking` (failure).
    pub fn finish_disconnect(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Disconnecting | Self::Connecting | Self::Handshaking => {
                *self = Self::Disconnected;
                Ok(())
            }
            _ => Err(LinkError::ProtocolViolation(
                "cannot finish disconnect: not in a disconnectable state",
            )),
        }
    }

    /// Force-reset to `Disconnected` regardless of current state.
    ///
    /// Use this for unrecoverable errors (e.g. I/O failure mid-stream).
    pub fn force_disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── Tests ────────────────────────────────────────────────────────
