//! A [`Transport`] adapter over `tokio_tungstenite::WebSocketStream` (or any
//! type with the same `Sink`/`Stream` shape). Feature-gated as `tungstenite`
//! so the core crate never forces an application onto a particular
//! WebSocket stack.
//
// SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use std::future::poll_fn;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::trace;

use crate::dupe::Dupe;
use crate::transport::{Transport, TransportEvent};

/// A `Sink<Message> + Stream<Item = Result<Message, WsError>>` guarded by a
/// `Mutex` so sender and receiver halves can share the same socket without
/// requiring it to be split. Every operation locks only for the duration of
/// a single poll, never across an `.await`.
struct LockedSocket<S>(Arc<Mutex<S>>);

impl<S> Dupe for LockedSocket<S> {
    #[inline]
    fn dupe(&self) -> Self {
        Self(self.0.dupe())
    }
}

impl<S> LockedSocket<S>
where
    S: Sink<Message, Error = WsError> + Stream<Item = Result<Message, WsError>> + Unpin,
{
    fn new(socket: S) -> Self {
        Self(Arc::new(Mutex::new(socket)))
    }

    async fn send(&self, msg: Message) -> Result<(), WsError> {
        poll_fn(|cx| self.0.lock().poll_ready_unpin(cx)).await?;
        self.0.lock().start_send_unpin(msg)?;
        poll_fn(|cx| self.0.lock().poll_flush_unpin(cx)).await
    }

    async fn close(&self) -> Result<(), WsError> {
        poll_fn(|cx| self.0.lock().poll_close_unpin(cx)).await
    }

    fn poll_next(&self, cx: &mut Context<'_>) -> Poll<Option<Result<Message, WsError>>> {
        self.0.lock().poll_next_unpin(cx)
    }

    async fn next(&self) -> Option<Result<Message, WsError>> {
        poll_fn(|cx| self.poll_next(cx)).await
    }
}

/// A [`Stream`] of [`TransportEvent`] backed by an unbounded channel fed by
/// the background receive task spawned in [`WebSocketTransport::new`].
struct EventStream(mpsc::UnboundedReceiver<TransportEvent>);

impl Stream for EventStream {
    type Item = TransportEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<TransportEvent>> {
        self.get_mut().0.poll_recv(cx)
    }
}

/// A [`Transport`] implementation wrapping any WebSocket-shaped
/// `Sink`/`Stream`, such as `tokio_tungstenite::WebSocketStream`.
pub struct WebSocketTransport<S> {
    socket: LockedSocket<S>,
    heartbeat: watch::Sender<Option<Duration>>,
}

impl<S> WebSocketTransport<S>
where
    S: Sink<Message, Error = WsError> + Stream<Item = Result<Message, WsError>> + Send + Unpin + 'static,
{
    /// Wrap `ws`, returning the transport handle plus the event stream to
    /// hand to [`crate::Multiplexer::construct`].
    ///
    /// Spawns two background tasks: one forwarding inbound WebSocket
    /// messages into [`TransportEvent`]s, one driving the heartbeat
    /// programmed through [`Transport::set_heartbeat`] (idle until a `Some`
    /// interval is set).
    pub fn new(ws: S) -> (Self, impl Stream<Item = TransportEvent> + Send + Unpin) {
        let socket = LockedSocket::new(ws);
        let (heartbeat_tx, heartbeat_rx) = watch::channel(None::<Duration>);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(heartbeat_task(socket.dupe(), heartbeat_rx));
        tokio::spawn(receive_task(socket.dupe(), events_tx));

        (
            Self {
                socket,
                heartbeat: heartbeat_tx,
            },
            EventStream(events_rx),
        )
    }
}

async fn heartbeat_task<S>(socket: LockedSocket<S>, mut interval: watch::Receiver<Option<Duration>>)
where
    S: Sink<Message, Error = WsError> + Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let current = *interval.borrow();
        match current {
            Some(period) => {
                tokio::select! {
                    () = tokio::time::sleep(period) => {
                        trace!("sending heartbeat ping");
                        if socket.send(Message::Ping(Bytes::new())).await.is_err() {
                            return;
                        }
                    }
                    changed = interval.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
            None => {
                if interval.changed().await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn receive_task<S>(socket: LockedSocket<S>, events: mpsc::UnboundedSender<TransportEvent>)
where
    S: Sink<Message, Error = WsError> + Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        match socket.next().await {
            Some(Ok(Message::Binary(data))) => {
                if events.send(TransportEvent::Message(data)).is_err() {
                    return;
                }
            }
            Some(Ok(Message::Text(text))) => {
                let data = Bytes::copy_from_slice(text.as_bytes());
                if events.send(TransportEvent::Message(data)).is_err() {
                    return;
                }
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                trace!("heartbeat frame received");
            }
            Some(Ok(Message::Close(_))) | None => {
                let _ = events.send(TransportEvent::Done);
                return;
            }
            Some(Ok(Message::Frame(_))) => {
                // Raw frames only surface through tungstenite's low-level
                // read_frame API, which this adapter never calls.
            }
            Some(Err(e)) => {
                let _ = events.send(TransportEvent::Error(Box::new(e)));
                return;
            }
        }
    }
}

#[async_trait]
impl<S> Transport for WebSocketTransport<S>
where
    S: Sink<Message, Error = WsError> + Stream<Item = Result<Message, WsError>> + Send + Unpin + 'static,
{
    type Error = WsError;

    async fn send(&self, payload: Bytes) -> Result<(), WsError> {
        self.socket.send(Message::Binary(payload)).await
    }

    async fn close(&self) -> Result<(), WsError> {
        self.socket.close().await
    }

    fn set_heartbeat(&self, interval: Option<Duration>) {
        let _ = self.heartbeat.send(interval);
    }
}
