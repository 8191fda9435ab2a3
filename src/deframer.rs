//! Byte-stream frame extractor sitting between the USB reader and the
//! dispatcher. A ring buffer (`VecDeque<u8>` — Rust's standard library
//! implements it as exactly that) holding bytes as they arrive; `next_frame`
//! pulls one complete wire frame at a time, resynchronizing past corruption.

use std::collections::VecDeque;

use crate::error::AntError;
use crate::protocol::SYNC;

/// Resumable byte-stream frame extractor. See spec §4.2: no partial frame is
/// ever consumed, and after a transient underflow the next call resumes from
/// the same sync byte.
#[derive(Debug, Default)]
pub struct Deframer {
    buf: VecDeque<u8>,
}

impl Deframer {
    pub fn new() -> Self {
        Self {
            buf: VecDeque::new(),
        }
    }

    /// Append freshly read bytes (in USB delivery order) to the buffer.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes.iter().copied());
    }

    /// Try to pull one complete wire frame (`sync | len | id | payload | xor`)
    /// out of the buffer.
    ///
    /// Returns `Err(AntError::NoFrameYet)` when there is not yet enough data —
    /// the buffer is left untouched in that case (except for non-sync bytes
    /// discarded while resynchronizing), so a subsequent call after more
    /// bytes arrive resumes from the same sync byte.
    pub fn next_frame(&mut self) -> Result<Vec<u8>, AntError> {
        // 1. discard non-sync bytes while searching for resync.
        loop {
            match self.buf.front() {
                Some(&b) if b == SYNC => break,
                Some(_) => {
                    self.buf.pop_front();
                }
                None => return Err(AntError::NoFrameYet),
            }
        }

        // 2. peek the length byte; if unavailable, leave the sync byte in
        // place and signal NoFrameYet.
        let len = match self.buf.get(1) {
            Some(&l) => l as usize,
            None => return Err(AntError::NoFrameYet),
        };

        // 3. id + payload + xor must all be present; if not, leave
        // everything in place (nothing has been consumed yet) and signal
        // NoFrameYet.
        let total = len + 4;
        if self.buf.len() < total {
            return Err(AntError::NoFrameYet);
        }

        // 4. the complete frame is present — drain it out.
        Ok(self.buf.drain(..total).collect())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{compose, decompose};
    use crate::protocol::MSG_ASSIGN_CHANNEL;

    #[test]
    fn extracts_single_frame() {
        let wire = compose(MSG_ASSIGN_CHANNEL, &[1, 2, 3]).unwrap();
        let mut d = Deframer::new();
        d.push_bytes(&wire);
        let extracted = d.next_frame().unwrap();
        assert_eq!(extracted, wire);
        assert_eq!(d.len(), 0);
    }

    #[test]
    fn discards_noise_before_sync() {
        let wire = compose(MSG_ASSIGN_CHANNEL, &[9, 9]).unwrap();
        let mut d = Deframer::new();
        d.push_bytes(&[0x00, 0xFF, 0x12]);
        d.push_bytes(&wire);
        let extracted = d.next_frame().unwrap();
        let frame = decompose(&extracted).unwrap();
        assert_eq!(frame.id, MSG_ASSIGN_CHANNEL);
        assert_eq!(frame.payload, vec![9, 9]);
    }

    #[test]
    fn truncated_length_byte_signals_no_frame_yet_and_resumes() {
        let wire = compose(MSG_ASSIGN_CHANNEL, &[1, 2, 3]).unwrap();
        let mut d = Deframer::new();
        // only the sync byte has arrived
        d.push_bytes(&wire[..1]);
        assert!(matches!(d.next_frame(), Err(AntError::NoFrameYet)));
        // rest of the frame arrives later
        d.push_bytes(&wire[1..]);
        let extracted = d.next_frame().unwrap();
        assert_eq!(extracted, wire);
    }

    #[test]
    fn truncated_mid_frame_signals_no_frame_yet_and_resumes() {
        let wire = compose(MSG_ASSIGN_CHANNEL, &[1, 2, 3, 4, 5]).unwrap();
        let mut d = Deframer::new();
        // sync + length + id arrive, but not the full payload
        d.push_bytes(&wire[..4]);
        assert!(matches!(d.next_frame(), Err(AntError::NoFrameYet)));
        assert!(matches!(d.next_frame(), Err(AntError::NoFrameYet)));
        d.push_bytes(&wire[4..]);
        let extracted = d.next_frame().unwrap();
        assert_eq!(extracted, wire);
    }

    #[test]
    fn byte_order_preserved_across_partial_underflow_restoration() {
        // Push a frame split into two chunks at an arbitrary midpoint and
        // verify the bytes come out in exactly the order they went in —
        // this is the corpus's Open Question about appendleft-of-reversed
        // restoration order; here nothing is ever removed speculatively, so
        // order preservation is structural rather than something to verify
        // after the fact.
        let wire = compose(MSG_ASSIGN_CHANNEL, &(0u8..20).collect::<Vec<_>>()).unwrap();
        let mut d = Deframer::new();
        d.push_bytes(&wire[..7]);
        assert!(matches!(d.next_frame(), Err(AntError::NoFrameYet)));
        d.push_bytes(&wire[7..]);
        let extracted = d.next_frame().unwrap();
        assert_eq!(extracted, wire);
    }

    #[test]
    fn multiple_frames_back_to_back() {
        let wire1 = compose(MSG_ASSIGN_CHANNEL, &[1]).unwrap();
        let wire2 = compose(MSG_ASSIGN_CHANNEL, &[2, 2]).unwrap();
        let mut d = Deframer::new();
        d.push_bytes(&wire1);
        d.push_bytes(&wire2);
        assert_eq!(d.next_frame().unwrap(), wire1);
        assert_eq!(d.next_frame().unwrap(), wire2);
        assert!(matches!(d.next_frame(), Err(AntError::NoFrameYet)));
    }

    #[test]
    fn noise_interleaved_with_split_frame_still_recovers() {
        let wire = compose(MSG_ASSIGN_CHANNEL, &[7, 8, 9]).unwrap();
        let mut d = Deframer::new();
        d.push_bytes(&[0x01, 0x02, 0x03]);
        d.push_bytes(&wire[..2]);
        assert!(matches!(d.next_frame(), Err(AntError::NoFrameYet)));
        d.push_bytes(&wire[2..]);
        assert_eq!(d.next_frame().unwrap(), wire);
    }
}
