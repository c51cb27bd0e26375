//! `chanmux`: a stream multiplexer layering many independent bidirectional
//! byte-frame channels over a single reliable, message-oriented transport.
//!
//! The core (this crate, minus the optional `tungstenite` feature) has no
//! knowledge of WebSockets, TLS, or any particular transport — it consumes
//! only the [`Transport`] capability. Hand it something that can send binary
//! messages and report inbound events, and it provides channel
//! multiplexing, a close handshake, and keep-alive gating on top.
//!
//! ```ignore
//! let mux = Multiplexer::construct(
//!     transport,
//!     inbound_events,
//!     |channel, initial_payload| { /* peer opened a channel */ },
//!     || { /* multiplexer tore down */ },
//!     MultiplexerConfig::default(),
//! );
//! let channel = mux.open_channel(Bytes::new()).await.expect("id space exhausted");
//! channel.send(b"hello".to_vec()).await?;
//! ```
//
// SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

mod channel;
mod config;
mod dupe;
mod error;
/// The frame codec. Public only so the `fuzz/` crate can exercise
/// [`frame::decode`] directly; application code never needs this module.
pub mod frame;
mod multiplexer;
mod transport;

#[cfg(feature = "tungstenite")]
mod ws;

pub use channel::{Channel, ChannelState};
pub use config::MultiplexerConfig;
pub use dupe::Dupe;
pub use error::{Error, Result};
pub use frame::ChannelId;
pub use multiplexer::{Multiplexer, OnChannel, OnClose};
pub use transport::{Transport, TransportEvent};

#[cfg(feature = "tungstenite")]
pub use ws::WebSocketTransport;
