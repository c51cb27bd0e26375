//! Crate-level error taxonomy.
//
// SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use thiserror::Error;

/// Errors surfaced across the `Channel`/`Multiplexer` API boundary.
///
/// Protocol- and transport-fatal conditions (§7 of the spec) are *not*
/// represented here: they never unwind to the caller. They tear down the
/// multiplexer and are only observable through the `on_close` callback and
/// `tracing` output.
#[derive(Debug, Error)]
pub enum Error {
    /// A `Channel::send` was attempted while the channel is not in the
    /// `open` state.
    #[error("channel is not open")]
    ChannelClosed,
    /// The multiplexer has no transport (it has been closed).
    #[error("multiplexer is closed")]
    Closed,
    /// The underlying transport rejected a send or close.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A `Result` defaulting to [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
