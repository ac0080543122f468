// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Errors a worker can raise at startup or while running (spec.md §7).

use meru_config::ConfigError;
use meru_net::NetError;
use meru_proto::{CodecError, RegistryError};
use meru_runtime::HandlerError;
use thiserror::Error;

/// Everything that can go wrong building or running a [`crate::Worker`].
///
/// [`WorkerError::Config`] and [`WorkerError::PingTimeout`] are the
/// two kinds spec.md §7 says a worker bubbles to its supervisor and exits
/// on; every other variant is either fatal at registration time (raised
/// from [`crate::WorkerBuilder`]) or would already have been logged by the
/// component that produced it before reaching here.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Startup configuration was invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A socket operation failed (connect, send, or receive).
    #[error(transparent)]
    Net(#[from] NetError),
    /// A payload failed to encode or decode.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A type-registry operation failed (duplicate or unknown tag).
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// A handler was registered with an invalid signature.
    #[error(transparent)]
    Handler(#[from] HandlerError),
    /// The broker reported one or more requested state-node names as
    /// unresolvable during the startup snapshot handshake.
    #[error("broker could not resolve requested state node(s): {0:?}")]
    UnknownStateNodes(Vec<String>),
    /// A snapshot-channel receive (the startup handshake or a liveness
    /// ping) exceeded its configured timeout.
    #[error("snapshot channel receive timed out")]
    PingTimeout,
}
