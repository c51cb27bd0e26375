//! Named constants standing in for the magic numbers of the wire format
//! and liveness policy.
//
// SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use std::time::Duration;

/// Bit 1 (`0x02`): the header is 3 bytes because the channel id fits in 16 bits.
pub const FLAG_SHORT_ID: u8 = 0x02;

/// Bits 4-5 (`0x30`): the system command field.
pub const FLAG_COMMAND_MASK: u8 = 0x30;
pub const FLAG_COMMAND_SHIFT: u32 = 4;

/// Bit 7 (`0x80`): non-breaking reserved extension bit. Set on an inbound
/// frame, it is a warning only; the frame is still processed.
pub const FLAG_WARNING: u8 = 0x80;

/// Bits 0, 2, 3, 6 (`0x01 | 0x04 | 0x08 | 0x40 = 0x4D`): breaking reserved
/// bits. Any of these set on an inbound frame is a fatal protocol error.
///
/// The source text names this mask `0xCD`, but `0xCD` includes bit 7
/// (`0x80`), which the very same source text documents as a *non-breaking*
/// warning bit (and §8's boundary test requires `flags = 0x80` alone to be
/// processed normally, not rejected). Bit 7 is excluded here so the two
/// requirements don't contradict each other; see DESIGN.md.
pub const RESERVED_BREAKING_MASK: u8 = 0x4D;

/// Channel ids are 48-bit unsigned integers; this is `2^48`, one past the
/// largest representable id.
pub const MAX_CHANNEL_ID: u64 = 1u64 << 48;

/// A channel id below this value is encoded with the 3-byte short header.
pub const SHORT_ID_THRESHOLD: u64 = 0x1_0000;

/// Maximum header length (flags + 48-bit channel id), in bytes.
///
/// This is what the source's `kReserveMuxConnectionHeaderSiwe` constant
/// reserves space for; its numeric value was not present in the inspected
/// source, so per spec this is treated as the maximum possible header
/// length.
pub const MAX_HEADER_LEN: usize = 7;

/// The short header length (flags + 16-bit channel id), in bytes.
pub const SHORT_HEADER_LEN: usize = 3;

/// Keep-alive interval programmed on the transport while at least one
/// channel exists and keep-alive is enabled.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// The source mentions a "10-second-after-last-channel" connection-idle
/// close timer (`_closeTimeoutTimer`) that no code ever arms. This constant
/// documents the value without a timer consuming it; see DESIGN.md.
pub const UNARMED_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-instance configuration, supplied at construction.
#[derive(Debug, Clone, Copy)]
pub struct MultiplexerConfig {
    /// `true` for the client role (even-parity ids starting at 2),
    /// `false` for the server role (odd-parity ids starting at 3).
    pub client: bool,
    /// When `true`, the multiplexer tears itself down the moment both the
    /// `open` and `closing` maps become empty (i.e. every channel that was
    /// ever opened has since closed). Checked at the same gating point as
    /// the keep-alive interval (after a channel is removed from either
    /// map).
    pub auto_close_empty: bool,
    /// Whether the transport's heartbeat interval should be programmed
    /// while channels exist.
    pub keep_alive: bool,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            client: true,
            auto_close_empty: false,
            keep_alive: true,
        }
    }
}

impl MultiplexerConfig {
    /// The initial value of the next-channel-id counter for this role.
    #[inline]
    #[must_use]
    pub fn initial_next_id(&self) -> u64 {
        if self.client {
            2
        } else {
            3
        }
    }
}
