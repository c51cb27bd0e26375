//! A loopback [`Transport`] pairing two in-process `Multiplexer`s over
//! `tokio::sync::mpsc`, so the dispatch algorithm can be exercised
//! end-to-end without any real socket.
#![allow(dead_code)]

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chanmux::{Transport, TransportEvent};
use futures_util::Stream;
use tokio::sync::mpsc;

/// Every `set_heartbeat` call is forwarded here instead of just being
/// stashed in a field, since the transport is moved into `Multiplexer`'s
/// constructor and the test otherwise has no way to observe it afterwards.
pub struct MockTransport {
    outbound: mpsc::UnboundedSender<Bytes>,
    heartbeat: mpsc::UnboundedSender<Option<Duration>>,
}

#[async_trait]
impl Transport for MockTransport {
    type Error = Infallible;

    async fn send(&self, payload: Bytes) -> Result<(), Infallible> {
        let _ = self.outbound.send(payload);
        Ok(())
    }

    async fn close(&self) -> Result<(), Infallible> {
        Ok(())
    }

    fn set_heartbeat(&self, interval: Option<Duration>) {
        let _ = self.heartbeat.send(interval);
    }
}

pub struct RecvStream(mpsc::UnboundedReceiver<Bytes>);

impl Stream for RecvStream {
    type Item = TransportEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<TransportEvent>> {
        match self.get_mut().0.poll_recv(cx) {
            Poll::Ready(Some(bytes)) => Poll::Ready(Some(TransportEvent::Message(bytes))),
            Poll::Ready(None) => Poll::Ready(Some(TransportEvent::Done)),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub type HeartbeatRx = mpsc::UnboundedReceiver<Option<Duration>>;

/// Build two directly-connected transports: anything sent on one arrives
/// as an inbound event on the other. Also returns each side's heartbeat
/// observation channel.
pub fn mock_pair() -> (
    MockTransport,
    RecvStream,
    HeartbeatRx,
    MockTransport,
    RecvStream,
    HeartbeatRx,
) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    let (a_hb_tx, a_hb_rx) = mpsc::unbounded_channel();
    let (b_hb_tx, b_hb_rx) = mpsc::unbounded_channel();
    let a = MockTransport {
        outbound: a_tx,
        heartbeat: a_hb_tx,
    };
    let b = MockTransport {
        outbound: b_tx,
        heartbeat: b_hb_tx,
    };
    (a, RecvStream(a_rx), a_hb_rx, b, RecvStream(b_rx), b_hb_rx)
}

/// A single side whose inbound stream is driven directly by the test, for
/// exercising decode failures and other cases where the peer can't be a
/// well-behaved multiplexer.
pub fn mock_half() -> (MockTransport, RecvStream, mpsc::UnboundedSender<Bytes>, HeartbeatRx) {
    let (out_tx, _out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (hb_tx, hb_rx) = mpsc::unbounded_channel();
    let transport = MockTransport {
        outbound: out_tx,
        heartbeat: hb_tx,
    };
    (transport, RecvStream(in_rx), in_tx, hb_rx)
}
