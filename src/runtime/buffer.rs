//! Per-connection message reassembly buffer.
//!
//! Bytes arrive in arbitrary fragments; the buffer accumulates them until
//! the decoded content contains the terminator. The reference this replaces
//! used a fixed 2048-byte region and silently stopped accepting bytes at
//! capacity; here the buffer grows on demand and overflowing the configured
//! maximum is an explicit error.

use crate::codec;
use bytes::BytesMut;
use std::fmt;

/// Reassembly progress for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No bytes received yet.
    Empty,
    /// At least one fragment received, terminator not yet seen.
    Accumulating,
    /// Terminator observed in the decoded content; no further reads needed.
    Complete,
}

/// Accumulated message bytes would exceed the configured maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageTooLarge {
    pub limit: usize,
}

impl fmt::Display for MessageTooLarge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message exceeds {} byte limit", self.limit)
    }
}

impl std::error::Error for MessageTooLarge {}

/// Growable byte accumulator with terminator-based completion detection.
///
/// Mutated only by the worker thread that owns the connection.
#[derive(Debug)]
pub struct MessageBuffer {
    raw: BytesMut,
    max_bytes: usize,
    phase: Phase,
}

impl MessageBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            raw: BytesMut::new(),
            max_bytes,
            phase: Phase::Empty,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Raw (still encoded) bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Append one fragment and rescan the cumulative decoded content for
    /// the terminator. Returns the phase after the append.
    ///
    /// Once `Complete`, the phase latches and further fragments are ignored.
    pub fn push(&mut self, fragment: &[u8]) -> Result<Phase, MessageTooLarge> {
        if self.phase == Phase::Complete {
            return Ok(Phase::Complete);
        }
        if self.raw.len() + fragment.len() > self.max_bytes {
            return Err(MessageTooLarge {
                limit: self.max_bytes,
            });
        }

        self.raw.extend_from_slice(fragment);
        self.phase = if codec::has_terminator(&self.raw) {
            Phase::Complete
        } else {
            Phase::Accumulating
        };
        Ok(self.phase)
    }

    /// Lossily decoded view of the bytes so far, for observation hooks.
    ///
    /// Recomputed on each call; a fragment boundary may fall inside an
    /// escape sequence or a multi-byte code point.
    pub fn pending_text(&self) -> String {
        codec::decode_lossy(&self.raw)
    }

    /// Consume the completed message, resetting the buffer to `Empty`.
    ///
    /// UTF-8 validation is strict here; lenient decoding only applies to
    /// the in-progress view.
    pub fn take_message(&mut self) -> Result<String, codec::DecodeError> {
        let raw = self.raw.split();
        self.phase = Phase::Empty;
        codec::decode(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_progression() {
        let mut buf = MessageBuffer::new(1024);
        assert_eq!(buf.phase(), Phase::Empty);

        assert_eq!(buf.push(b"AB").unwrap(), Phase::Accumulating);
        assert_eq!(buf.push(b"CDov").unwrap(), Phase::Accumulating);
        assert_eq!(buf.push(b"er").unwrap(), Phase::Complete);

        assert_eq!(buf.take_message().unwrap(), "ABCDover");
        assert_eq!(buf.phase(), Phase::Empty);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_complete_latches() {
        let mut buf = MessageBuffer::new(1024);
        buf.push(b"done over").unwrap();
        assert_eq!(buf.phase(), Phase::Complete);

        // further fragments are ignored once complete
        assert_eq!(buf.push(b" trailing").unwrap(), Phase::Complete);
        assert_eq!(buf.take_message().unwrap(), "done over");
    }

    #[test]
    fn test_terminator_across_escape_boundary() {
        let mut buf = MessageBuffer::new(1024);
        // "%6F" = 'o', split so the escape itself straddles two fragments
        assert_eq!(buf.push(b"msg %6").unwrap(), Phase::Accumulating);
        assert_eq!(buf.push(b"Fver").unwrap(), Phase::Complete);
        assert_eq!(buf.take_message().unwrap(), "msg over");
    }

    #[test]
    fn test_pending_text_is_lossy() {
        let mut buf = MessageBuffer::new(1024);
        let encoded = codec::encode("第1个");
        // cut inside an escape sequence
        buf.push(&encoded.as_bytes()[..4]).unwrap();
        let pending = buf.pending_text();
        assert!(!pending.is_empty());
    }

    #[test]
    fn test_max_bytes_enforced() {
        let mut buf = MessageBuffer::new(8);
        buf.push(b"12345678").unwrap();
        let err = buf.push(b"9").unwrap_err();
        assert_eq!(err, MessageTooLarge { limit: 8 });
        // state before the oversized fragment is untouched
        assert_eq!(buf.len(), 8);
        assert_eq!(buf.phase(), Phase::Accumulating);
    }

    #[test]
    fn test_take_message_rejects_invalid_utf8() {
        let mut buf = MessageBuffer::new(64);
        buf.push(b"%FF%FEover").unwrap();
        assert_eq!(buf.phase(), Phase::Complete);
        assert!(buf.take_message().is_err());
    }
}
