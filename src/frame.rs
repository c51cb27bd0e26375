//! The frame codec: a 3- or 7-byte header plus an opaque payload tail.
//!
//! Wire format (all multi-byte fields little-endian):
//!
//! ```text
//! byte 0:      flags
//! bytes 1..2:  channel-id low 16 bits       (always present)
//! bytes 3..6:  channel-id bits 16..47       (absent if short-id flag set)
//! bytes 7..:   opaque payload               (may be empty)
//! ```
//
// SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use crate::config::{
    FLAG_COMMAND_MASK, FLAG_COMMAND_SHIFT, FLAG_SHORT_ID, FLAG_WARNING, RESERVED_BREAKING_MASK,
    SHORT_HEADER_LEN, SHORT_ID_THRESHOLD,
};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// A channel id: a 48-bit unsigned integer in practice, represented as `u64`.
pub type ChannelId = u64;

/// The 2-bit system command field (flags bits 4-5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemCommand {
    /// An ordinary data frame carrying a channel payload.
    Data,
    /// Requests a new channel; payload is the caller-supplied initial data.
    Open,
    /// Requests or confirms closing a channel.
    Close,
}

impl SystemCommand {
    #[inline]
    fn from_bits(bits: u8) -> Result<Self, FrameError> {
        match bits {
            0 => Ok(Self::Data),
            1 => Ok(Self::Open),
            2 => Ok(Self::Close),
            3 => Err(FrameError::ReservedCommand),
            _ => unreachable!("system command is a 2-bit field"),
        }
    }

    #[inline]
    fn to_bits(self) -> u8 {
        match self {
            Self::Data => 0,
            Self::Open => 1,
            Self::Close => 2,
        }
    }
}

/// Failure modes of the codec. All are fatal to the multiplexer that
/// encounters them on an inbound frame.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The message was shorter than the header its flags byte demands.
    #[error("frame shorter than its header")]
    ShortFrame,
    /// A breaking reserved bit (within `0xCD`) was set.
    #[error("breaking reserved flag bit set")]
    ReservedBit,
    /// The system command field was `3` (reserved).
    #[error("reserved system command")]
    ReservedCommand,
}

/// A decoded inbound frame: the system command, the channel id, a
/// zero-copy view of the payload, and whether the non-breaking warning bit
/// was set.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub command: SystemCommand,
    pub channel_id: ChannelId,
    pub payload: Bytes,
    /// Bit 7 (`0x80`) was set: a non-fatal, forward-compatible extension bit.
    pub warning: bool,
}

/// Decode one frame out of a complete transport message.
///
/// `payload` is a zero-copy slice of `msg` (via [`Bytes::slice`]), starting
/// immediately after the header.
pub fn decode(msg: &Bytes) -> Result<DecodedFrame, FrameError> {
    if msg.len() < SHORT_HEADER_LEN {
        return Err(FrameError::ShortFrame);
    }
    let flags = msg[0];
    if flags & RESERVED_BREAKING_MASK != 0 {
        return Err(FrameError::ReservedBit);
    }
    let command = SystemCommand::from_bits((flags & FLAG_COMMAND_MASK) >> FLAG_COMMAND_SHIFT)?;
    let short = flags & FLAG_SHORT_ID != 0;
    let header_len = if short {
        SHORT_HEADER_LEN
    } else {
        crate::config::MAX_HEADER_LEN
    };
    if msg.len() < header_len {
        return Err(FrameError::ShortFrame);
    }
    let low = u16::from_le_bytes([msg[1], msg[2]]) as u64;
    let channel_id = if short {
        low
    } else {
        let high = u32::from_le_bytes([msg[3], msg[4], msg[5], msg[6]]) as u64;
        low | (high << 16)
    };
    Ok(DecodedFrame {
        command,
        channel_id,
        payload: msg.slice(header_len..),
        warning: flags & FLAG_WARNING != 0,
    })
}

/// Encode a frame for `channel_id`/`command` with the given payload.
///
/// The sender sets the short-id flag iff `channel_id < 0x10000`, yielding a
/// 3-byte header; otherwise the header is 7 bytes. This implementation
/// always allocates a fresh buffer; the zero-copy "reserve a header prefix
/// in the payload buffer" trick described in the spec is a performance
/// invariant only, not a correctness one, and is not exercised here.
pub fn encode(channel_id: ChannelId, command: SystemCommand, payload: &[u8]) -> Bytes {
    let short = channel_id < SHORT_ID_THRESHOLD;
    let header_len = if short {
        SHORT_HEADER_LEN
    } else {
        crate::config::MAX_HEADER_LEN
    };
    let mut flags = command.to_bits() << FLAG_COMMAND_SHIFT;
    if short {
        flags |= FLAG_SHORT_ID;
    }
    let mut buf = BytesMut::with_capacity(header_len + payload.len());
    buf.put_u8(flags);
    buf.put_u16_le((channel_id & 0xFFFF) as u16);
    if !short {
        buf.put_u32_le((channel_id >> 16) as u32);
    }
    buf.extend_from_slice(payload);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_short_id() {
        let msg = encode(2, SystemCommand::Data, b"hello");
        let decoded = decode(&msg).unwrap();
        assert_eq!(decoded.channel_id, 2);
        assert_eq!(decoded.command, SystemCommand::Data);
        assert_eq!(&decoded.payload[..], b"hello");
        assert!(!decoded.warning);
    }

    #[test]
    fn round_trips_long_id() {
        let id = 0x1_0000;
        let msg = encode(id, SystemCommand::Open, b"");
        assert_eq!(msg.len(), 7);
        let decoded = decode(&msg).unwrap();
        assert_eq!(decoded.channel_id, id);
        assert_eq!(decoded.command, SystemCommand::Open);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn short_long_boundary() {
        let below = encode(0xFFFF, SystemCommand::Data, b"");
        assert_eq!(below.len(), 3);
        let at = encode(0x1_0000, SystemCommand::Data, b"");
        assert_eq!(at.len(), 7);
    }

    #[test]
    fn short_frame_is_fatal() {
        let msg = Bytes::from_static(&[0x00]);
        assert_eq!(decode(&msg), Err(FrameError::ShortFrame));
    }

    #[test]
    fn empty_frame_is_fatal() {
        let msg = Bytes::new();
        assert_eq!(decode(&msg), Err(FrameError::ShortFrame));
    }

    #[test]
    fn breaking_reserved_bit_is_fatal() {
        let msg = Bytes::from_static(&[0x01, 0x00, 0x00]);
        assert_eq!(decode(&msg), Err(FrameError::ReservedBit));
    }

    #[test]
    fn reserved_command_is_fatal() {
        // short-id flag set, command bits = 0b11 (3)
        let flags = FLAG_SHORT_ID | (0b11 << FLAG_COMMAND_SHIFT);
        let msg = Bytes::from(vec![flags, 0x00, 0x00]);
        assert_eq!(decode(&msg), Err(FrameError::ReservedCommand));
    }

    #[test]
    fn warning_bit_alone_is_processed_normally() {
        let msg = Bytes::from(vec![FLAG_SHORT_ID | FLAG_WARNING, 0x02, 0x00]);
        let decoded = decode(&msg).unwrap();
        assert!(decoded.warning);
        assert_eq!(decoded.channel_id, 2);
    }

    #[test]
    fn payload_view_is_zero_copy() {
        let msg = encode(2, SystemCommand::Data, b"xyz");
        let decoded = decode(&msg).unwrap();
        // Both point into the same backing allocation.
        assert_eq!(decoded.payload.as_ptr(), unsafe { msg.as_ptr().add(3) });
    }
}
