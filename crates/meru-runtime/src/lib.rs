// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Handler registry, state registry, and reducer/handler dispatch for the
//! Meru messaging substrate (spec.md §4.3, §4.4).
//!
//! A process holds one [`StateRegistry`] (its state-node singletons plus
//! the reducers registered against them) and one [`HandlerRegistry`] (at
//! most one user handler per action type). Dispatching an incoming action
//! runs its reducers first, synchronously and to completion, then its
//! handler, per spec.md §5's ordering guarantee.

pub mod handler;
pub mod state;

pub use handler::{ActionHandler, HandlerError, HandlerRegistry, StateSet};
pub use state::{ReducerError, Reduces, StateRegistry};
