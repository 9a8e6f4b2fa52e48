//! Frame flags carried in the header.

use bitflags::bitflags;

bitflags! {
    /// Modifier bits for a single frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FrameFlags: u16 {
        /// No modifiers.
        const NONE = 0;

        /// Part of a multi-frame stream sharing one sequence number.
        const STREAM = 1 << 0;

        /// Last frame of a stream.
        const STREAM_END = 1 << 1;

        /// Fanned out to every connected peer rather than addressed
        /// to a single one.
        const BROADCAST = 1 << 2;
    }
}

impl FrameFlags {
    /// Reconstruct flags from a raw header field, dropping any bits
    /// this version does not know about.
    pub fn from_wire(raw: u16) -> Self {
        Self::from_bits_truncate(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_bits_are_dropped() {
        let flags = FrameFlags::from_wire(0xFF00 | FrameFlags::STREAM.bits());
        assert_eq!(flags, FrameFlags::STREAM);
    }

    #[test]
    fn stream_end_implies_nothing_else() {
        let flags = FrameFlags::STREAM | FrameFlags::STREAM_END;
        assert!(flags.contains(FrameFlags::STREAM));
        assert!(flags.contains(FrameFlags::STREAM_END));
        assert!(!flags.contains(FrameFlags::BROADCAST));
    }
}
