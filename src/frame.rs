//! The ANT serial wire frame: `sync | len | id | payload.. | xor`.

use crate::error::AntError;
use crate::protocol::{MSG_BURST_DATA, SYNC};

/// A decoded ANT serial frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(id: u8, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    /// Pack this frame into its wire representation: `sync | len | id | payload | xor`.
    pub fn compose(&self) -> Result<Vec<u8>, AntError> {
        compose(self.id, &self.payload)
    }

    /// The data-page channel number, for `BroadcastData`/`AcknowledgedData` frames.
    /// For `BurstData` frames the low 5 bits carry the channel and bits 5-7 the
    /// burst sequence number.
    pub fn channel(&self) -> Option<u8> {
        self.payload.first().map(|&b| {
            if self.id == MSG_BURST_DATA {
                b & 0x1F
            } else {
                b
            }
        })
    }

    /// The burst sequence number, present only on `BurstData` frames.
    pub fn burst_seq(&self) -> Option<u8> {
        if self.id != MSG_BURST_DATA {
            return None;
        }
        self.payload.first().map(|&b| (b >> 5) & 0x07)
    }

    /// The data-page number (`payload[1]`), for data-carrying frames.
    pub fn page_number(&self) -> Option<u8> {
        self.payload.get(1).copied()
    }
}

/// Encode `id`/`payload` into a wire frame. Fails if `payload` exceeds 255 bytes.
pub fn compose(id: u8, payload: &[u8]) -> Result<Vec<u8>, AntError> {
    if payload.len() > 255 {
        return Err(AntError::InvalidFrame(format!(
            "payload too long: {} bytes",
            payload.len()
        )));
    }
    let len = payload.len() as u8;
    let mut packet = Vec::with_capacity(4 + payload.len());
    packet.push(SYNC);
    packet.push(len);
    packet.push(id);
    packet.extend_from_slice(payload);
    let xor = packet.iter().fold(0u8, |acc, &b| acc ^ b);
    packet.push(xor);
    Ok(packet)
}

/// Decode a single complete wire frame (as produced by `compose`) back into
/// its id and payload. `frame` must contain exactly one frame: `sync | len |
/// id | payload[len] | xor`, no leading or trailing bytes.
pub fn decompose(frame: &[u8]) -> Result<Frame, AntError> {
    if frame.len() < 4 {
        return Err(AntError::InvalidFrame(format!(
            "frame too short: {} bytes",
            frame.len()
        )));
    }
    if frame[0] != SYNC {
        return Err(AntError::InvalidFrame(format!(
            "bad sync byte {:#x}",
            frame[0]
        )));
    }
    let len = frame[1] as usize;
    if frame.len() != len + 4 {
        return Err(AntError::InvalidFrame(format!(
            "length mismatch: header says {}, frame is {} bytes",
            len,
            frame.len()
        )));
    }
    let id = frame[2];
    let payload = frame[3..3 + len].to_vec();
    let expected_xor = frame[..3 + len].iter().fold(0u8, |acc, &b| acc ^ b);
    let actual_xor = frame[3 + len];
    if expected_xor != actual_xor {
        return Err(AntError::InvalidFrame(format!(
            "checksum mismatch: expected {:#x}, found {:#x}",
            expected_xor, actual_xor
        )));
    }
    Ok(Frame { id, payload })
}
