// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! TCP realizations of the six socket roles spec.md §4.5 names: collector,
//! publisher, snapshot server (broker side), and pusher, subscriber,
//! snapshot client (worker side).
//!
//! The original runs these over a messaging library's pull/pub/router and
//! push/sub/dealer sockets. This crate hand-rolls the same fan-in,
//! fan-out, and addressed-reply shapes over plain `tokio` TCP with a
//! length-prefixed frame, since no messaging-socket crate appears anywhere
//! in the reference stack.

mod outbox;

pub mod collector;
pub mod framing;
pub mod publisher;
pub mod pusher;
pub mod snapshot_client;
pub mod snapshot_server;
pub mod subscriber;

use thiserror::Error;

pub use collector::Collector;
pub use publisher::Publisher;
pub use pusher::Pusher;
pub use snapshot_client::SnapshotClient;
pub use snapshot_server::SnapshotServer;
pub use subscriber::Subscriber;

/// Errors raised by the socket roles in this crate.
#[derive(Debug, Error)]
pub enum NetError {
    /// Underlying I/O failure (connect, accept, read, write).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A frame (or one of its parts) exceeded [`framing::MAX_FRAME_LEN`].
    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),
    /// The peer closed the connection, or the local outbox was dropped.
    #[error("connection closed")]
    Closed,
    /// A snapshot-client request did not receive a reply before its
    /// configured timeout. Callers (meru-runtime, meru-worker) surface
    /// this as their own `PingTimeout` error.
    #[error("receive timed out")]
    Timeout,
}
