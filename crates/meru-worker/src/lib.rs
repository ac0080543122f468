// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-process Meru client (spec.md §4.2, §4.7): accumulate type, state,
//! reducer, and handler registrations with [`WorkerBuilder`], connect to a
//! broker, and run the subscribe-dispatch-push loop with [`Worker`].

mod builder;
mod error;
mod worker;

pub use builder::{WorkerBuilder, DEFAULT_PING_INTERVAL};
pub use error::WorkerError;
pub use worker::Worker;
