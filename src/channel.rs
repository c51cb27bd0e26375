//! The `Channel` handle: one logical bidirectional byte-frame stream.
//
// SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Error, Result};
use crate::frame::ChannelId;
use crate::multiplexer::Shared;
use crate::transport::Transport;

/// The lifecycle state of a [`Channel`], shared between the handle and the
/// multiplexer's dispatch loop via an `Arc<AtomicU8>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    /// Neither side has requested a close.
    Open = 0,
    /// `Channel::close` was called; awaiting the peer's confirmation.
    LocalClosed = 1,
    /// The peer closed first; a confirmation has been sent back.
    RemoteClosed = 2,
    /// Fully closed, either by handshake completion or multiplexer teardown.
    Closed = 3,
}

impl ChannelState {
    #[inline]
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Open,
            1 => Self::LocalClosed,
            2 => Self::RemoteClosed,
            3 => Self::Closed,
            _ => unreachable!("invalid ChannelState byte"),
        }
    }
}

/// The bookkeeping a [`Channel`] and the multiplexer's maps share: the
/// inbound sender half and the live state.
pub(crate) struct ChannelEntry {
    pub(crate) sender: mpsc::UnboundedSender<Bytes>,
    pub(crate) state: Arc<AtomicU8>,
}

/// One logical channel multiplexed over the shared transport.
///
/// Obtained from [`Multiplexer::open_channel`](crate::Multiplexer::open_channel)
/// or delivered to an `on_channel` callback when the peer opens one.
pub struct Channel<T: Transport> {
    pub(crate) id: ChannelId,
    pub(crate) mux: Arc<Shared<T>>,
    pub(crate) inbound: mpsc::UnboundedReceiver<Bytes>,
    pub(crate) state: Arc<AtomicU8>,
}

impl<T: Transport> Channel<T> {
    /// This channel's id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Encode and transmit a data frame carrying `payload` on this channel.
    ///
    /// Fails with [`Error::ChannelClosed`] if the channel is not currently
    /// `open`.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        if self.state() != ChannelState::Open {
            return Err(Error::ChannelClosed);
        }
        trace!(channel_id = self.id, "sending data frame");
        self.mux
            .send_data(self.id, payload.into())
            .await
    }

    /// Request local close. Idempotent: calling this more than once, or on
    /// a channel that is already closing or closed, is a silent no-op.
    pub async fn close(&self) {
        let cas = self.state.compare_exchange(
            ChannelState::Open as u8,
            ChannelState::LocalClosed as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if cas.is_ok() {
            self.mux.close_channel(self.id).await;
        }
    }
}

/// The lazy, finite, non-restartable sequence of inbound payloads.
///
/// Terminates when the channel becomes `remote-closed` or the multiplexer
/// tears down (in both cases, the dispatcher drops the sender half, which
/// is observed here as the stream ending).
impl<T: Transport> Stream for Channel<T> {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.get_mut().inbound.poll_recv(cx)
    }
}

impl<T: Transport> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
