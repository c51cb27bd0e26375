//! The connection-scoped coordinator: owns the transport, owns all open and
//! closing channels, allocates ids, dispatches inbound frames, drives the
//! close handshake, and manages keep-alive.
//
// SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::channel::{Channel, ChannelEntry, ChannelState};
use crate::config::{MultiplexerConfig, KEEPALIVE_INTERVAL, MAX_CHANNEL_ID};
use crate::dupe::Dupe;
use crate::error::{Error, Result};
use crate::frame::{self, ChannelId, DecodedFrame, SystemCommand};
use crate::transport::{Transport, TransportEvent};

/// Invoked with a channel the peer opened and its initial payload.
pub type OnChannel<T> = Box<dyn Fn(Channel<T>, Bytes) + Send + Sync>;
/// Invoked exactly once when the multiplexer tears down.
pub type OnClose = Box<dyn Fn() + Send + Sync>;

pub(crate) struct Shared<T: Transport> {
    transport: RwLock<Option<Arc<T>>>,
    open: RwLock<HashMap<ChannelId, ChannelEntry>>,
    closing: RwLock<HashMap<ChannelId, ChannelEntry>>,
    next_id: AtomicU64,
    config: MultiplexerConfig,
    on_channel: OnChannel<T>,
    on_close: OnClose,
    teardown_started: AtomicBool,
    warning_count: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("open_count", &self.open.read().len())
            .field("closing_count", &self.closing.read().len())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Shared<T> {
    fn is_empty(&self) -> bool {
        self.open.read().is_empty() && self.closing.read().is_empty()
    }

    /// Program or clear the heartbeat depending on whether any channel
    /// currently exists. Called at construction and every time a channel
    /// is inserted into or removed from either map, which reproduces the
    /// "10s on construction, on every open, cleared when both maps are
    /// empty" policy from a single rule instead of tracking each
    /// touchpoint separately.
    fn refresh_keepalive(&self) {
        if !self.config.keep_alive {
            return;
        }
        let Some(transport) = self.transport.read().clone() else {
            return;
        };
        if self.is_empty() {
            transport.set_heartbeat(None);
        } else {
            transport.set_heartbeat(Some(KEEPALIVE_INTERVAL));
        }
    }

    fn alloc_id(&self) -> Option<ChannelId> {
        loop {
            let cur = self.next_id.load(Ordering::Relaxed);
            if cur >= MAX_CHANNEL_ID {
                return None;
            }
            let next = cur + 2;
            if self
                .next_id
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(cur);
            }
        }
    }

    async fn send_frame(&self, id: ChannelId, command: SystemCommand, payload: Bytes) -> Result<()> {
        let transport = self.transport.read().clone();
        match transport {
            Some(t) => {
                let frame = frame::encode(id, command, &payload);
                t.send(frame)
                    .await
                    .map_err(|e| Error::Transport(Box::new(e)))
            }
            None => Err(Error::Closed),
        }
    }

    pub(crate) async fn send_data(&self, id: ChannelId, payload: Bytes) -> Result<()> {
        self.send_frame(id, SystemCommand::Data, payload).await
    }

    /// Invoked by `Channel::close`. Moves the entry from `open` to
    /// `closing` and sends a close-channel frame. No-op if the channel is
    /// not (no longer) in `open`.
    pub(crate) async fn close_channel(self: &Arc<Self>, id: ChannelId) {
        let entry = self.open.write().remove(&id);
        if let Some(entry) = entry {
            self.closing.write().insert(id, entry);
            if let Err(e) = self.send_frame(id, SystemCommand::Close, Bytes::new()).await {
                warn!(channel_id = id, error = %e, "failed to send close-channel frame");
            }
        }
    }

    /// Idempotent teardown: detach the transport, close it (errors
    /// ignored), drain both maps (dropping every sender ends the
    /// corresponding inbound sequence), and invoke `on_close` exactly
    /// once.
    async fn teardown(self: &Arc<Self>) {
        if self.teardown_started.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("tearing down multiplexer");
        let transport = self.transport.write().take();
        if let Some(t) = transport {
            let _ = t.close().await;
        }
        {
            let mut open = self.open.write();
            let mut closing = self.closing.write();
            for entry in open.values().chain(closing.values()) {
                entry.state.store(ChannelState::Closed as u8, Ordering::Release);
            }
            open.clear();
            closing.clear();
        }
        (self.on_close)();
    }

    /// The inbound dispatch algorithm (spec.md §4.3), applied to one
    /// decoded frame. Returns `ControlFlow::Break` for any fatal outcome.
    async fn dispatch(self: &Arc<Self>, decoded: DecodedFrame) -> ControlFlow<()> {
        let id = decoded.channel_id;
        match decoded.command {
            SystemCommand::Data => {
                let sender = {
                    let open = self.open.read();
                    open.get(&id).map(|e| e.sender.dupe())
                }
                .or_else(|| {
                    let closing = self.closing.read();
                    closing.get(&id).map(|e| e.sender.dupe())
                });
                match sender {
                    Some(s) => {
                        let _ = s.send(decoded.payload);
                        ControlFlow::Continue(())
                    }
                    None => {
                        error!(channel_id = id, "data frame for unknown channel");
                        ControlFlow::Break(())
                    }
                }
            }
            SystemCommand::Open => {
                let already_known =
                    self.open.read().contains_key(&id) || self.closing.read().contains_key(&id);
                if already_known {
                    error!(channel_id = id, "duplicate open-channel for live id");
                    return ControlFlow::Break(());
                }
                // §9 REDESIGN FLAGS: validate parity on inbound open, even
                // though the source never did. A remotely-opened id sharing
                // our own allocation parity can never be legitimate.
                let local_parity = self.config.initial_next_id() % 2;
                if id % 2 == local_parity {
                    error!(channel_id = id, "inbound open-channel has local allocation parity");
                    return ControlFlow::Break(());
                }
                let (sender, inbound) = mpsc::unbounded_channel();
                let state = Arc::new(AtomicU8::new(ChannelState::Open as u8));
                self.open.write().insert(
                    id,
                    ChannelEntry {
                        sender,
                        state: state.dupe(),
                    },
                );
                self.refresh_keepalive();
                let channel = Channel {
                    id,
                    mux: Arc::clone(self),
                    inbound,
                    state,
                };
                trace!(channel_id = id, "delivering remotely-opened channel");
                (self.on_channel)(channel, decoded.payload);
                ControlFlow::Continue(())
            }
            SystemCommand::Close => {
                let removed_open = self.open.write().remove(&id);
                if let Some(entry) = removed_open {
                    entry.state.store(ChannelState::RemoteClosed as u8, Ordering::Release);
                    drop(entry.sender);
                    self.refresh_keepalive();
                    if let Err(e) = self.send_frame(id, SystemCommand::Close, Bytes::new()).await {
                        warn!(channel_id = id, error = %e, "failed to send close confirmation");
                    }
                    entry.state.store(ChannelState::Closed as u8, Ordering::Release);
                } else {
                    let removed_closing = self.closing.write().remove(&id);
                    if let Some(entry) = removed_closing {
                        entry.state.store(ChannelState::Closed as u8, Ordering::Release);
                        drop(entry.sender);
                        self.refresh_keepalive();
                    } else {
                        error!(channel_id = id, "close-channel for unknown channel (double close)");
                        return ControlFlow::Break(());
                    }
                }
                if self.config.auto_close_empty && self.is_empty() {
                    debug!("auto-closing: no channels remain");
                    return ControlFlow::Break(());
                }
                ControlFlow::Continue(())
            }
        }
    }

    /// The dispatch loop. Runs until the inbound stream ends (peer
    /// close/EOF), a transport error arrives, or a protocol violation is
    /// detected; always ends by tearing down.
    async fn run(self: Arc<Self>, mut inbound: impl Stream<Item = TransportEvent> + Unpin) {
        loop {
            match inbound.next().await {
                Some(TransportEvent::Message(bytes)) => match frame::decode(&bytes) {
                    Ok(decoded) => {
                        if decoded.warning {
                            self.warning_count.fetch_add(1, Ordering::Relaxed);
                            warn!("non-breaking reserved bit set on inbound frame");
                        }
                        if self.dispatch(decoded).await.is_break() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "protocol violation, tearing down");
                        break;
                    }
                },
                Some(TransportEvent::Error(e)) => {
                    error!(error = %e, "transport error, tearing down");
                    break;
                }
                Some(TransportEvent::Done) | None => {
                    debug!("transport closed cleanly");
                    break;
                }
            }
        }
        self.teardown().await;
    }
}

/// The connection-scoped multiplexer handle. Cheap to [`Dupe`].
pub struct Multiplexer<T: Transport>(Arc<Shared<T>>);

impl<T: Transport> Dupe for Multiplexer<T> {
    #[inline]
    fn dupe(&self) -> Self {
        Self(self.0.dupe())
    }
}

impl<T: Transport> fmt::Debug for Multiplexer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Multiplexer").field(&self.0).finish()
    }
}

impl<T: Transport> Multiplexer<T> {
    /// Take ownership of `transport`, begin dispatching frames from
    /// `inbound`, and optionally program the heartbeat interval.
    ///
    /// `config.client` selects even-parity ids starting at 2 (client role)
    /// or odd-parity ids starting at 3 (server role).
    pub fn construct<S>(
        transport: T,
        inbound: S,
        on_channel: impl Fn(Channel<T>, Bytes) + Send + Sync + 'static,
        on_close: impl Fn() + Send + Sync + 'static,
        config: MultiplexerConfig,
    ) -> Self
    where
        S: Stream<Item = TransportEvent> + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            transport: RwLock::new(Some(Arc::new(transport))),
            open: RwLock::new(HashMap::new()),
            closing: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(config.initial_next_id()),
            config,
            on_channel: Box::new(on_channel),
            on_close: Box::new(on_close),
            teardown_started: AtomicBool::new(false),
            warning_count: AtomicU64::new(0),
            task: Mutex::new(None),
        });
        shared.refresh_keepalive();
        let run_shared = Arc::clone(&shared);
        let handle = tokio::spawn(async move { run_shared.run(inbound).await });
        *shared.task.lock() = Some(handle);
        Self(shared)
    }

    /// Allocate a new local channel and send an open-channel frame carrying
    /// `initial_payload`. Returns `None` only if the id space is exhausted;
    /// this is the sole non-fatal refusal in the API.
    pub async fn open_channel(&self, initial_payload: impl Into<Bytes>) -> Option<Channel<T>> {
        let id = self.0.alloc_id()?;
        let (sender, inbound) = mpsc::unbounded_channel();
        let state = Arc::new(AtomicU8::new(ChannelState::Open as u8));
        self.0.open.write().insert(
            id,
            ChannelEntry {
                sender,
                state: state.dupe(),
            },
        );
        self.0.refresh_keepalive();
        let payload = initial_payload.into();
        trace!(channel_id = id, "opening local channel");
        if let Err(e) = self.0.send_frame(id, SystemCommand::Open, payload).await {
            warn!(channel_id = id, error = %e, "failed to send open-channel frame");
        }
        Some(Channel {
            id,
            mux: self.0.dupe(),
            inbound,
            state,
        })
    }

    /// Idempotent. Detaches the transport (if held), closes it (errors
    /// ignored), then invokes `on_close` exactly once.
    pub async fn close(&self) {
        if let Some(handle) = self.0.task.lock().take() {
            handle.abort();
        }
        self.0.teardown().await;
    }

    /// `true` iff another local channel can still be allocated.
    #[must_use]
    pub fn channels_available(&self) -> bool {
        self.0.next_id.load(Ordering::Relaxed) < MAX_CHANNEL_ID
    }

    /// `true` iff the transport is still held (the multiplexer has not
    /// been closed).
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.0.transport.read().is_some()
    }

    /// Number of inbound frames seen so far with the non-breaking reserved
    /// bit (0x80) set. A diagnostics counter, not part of the protocol.
    #[must_use]
    pub fn warning_count(&self) -> u64 {
        self.0.warning_count.load(Ordering::Relaxed)
    }
}
