//! The transport capability the core consumes (spec.md §6).
//!
//! The multiplexer never touches a socket, TLS, or ping/pong mechanics
//! directly — those live entirely on the other side of this trait, in
//! whatever the application wires up (see `src/ws.rs` for a concrete
//! adapter over `tokio-tungstenite`, behind the `tungstenite` feature).
//
// SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

/// A reliable, ordered, message-oriented connection capable of framing
/// binary messages and (optionally) an application-programmed heartbeat.
///
/// Implementations are expected to be cheap to share (e.g. an `Arc`-backed
/// handle internally) since the multiplexer holds one behind its own
/// `Arc`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The error type `send`/`close` may fail with.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send one binary message. Assumed reliable and ordered: the
    /// multiplexor does not retry or reorder.
    async fn send(&self, payload: Bytes) -> Result<(), Self::Error>;

    /// Close the transport. Idempotent; the multiplexor ignores errors
    /// from this call (per spec.md §4.3: "errors ignored").
    async fn close(&self) -> Result<(), Self::Error>;

    /// Program (or clear, with `None`) the transport's periodic heartbeat.
    fn set_heartbeat(&self, interval: Option<Duration>);
}

/// Inbound events the multiplexer's dispatch loop consumes from the
/// transport's inbound stream.
#[derive(Debug)]
pub enum TransportEvent {
    /// A complete binary message arrived.
    Message(Bytes),
    /// The transport reported a terminal error. Translated to the same
    /// teardown path as a protocol violation (spec.md §7: transport-fatal).
    Error(Box<dyn std::error::Error + Send + Sync>),
    /// The transport reached a clean EOF.
    Done,
}
