// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Wire schema, self-describing codec, and type registry for the Meru
//! messaging substrate.
//!
//! Every object that crosses a socket — an [`Action`] or a [`StateNode`] —
//! carries a reserved `object_type` tag identifying its concrete Rust type.
//! A [`registry::TypeRegistry`] maps that tag back to a constructor so a
//! process can decode objects it didn't define itself (chiefly, a broker
//! relaying actions between workers it has no static knowledge of).

pub mod actions;
pub mod codec;
mod macros;
pub mod object;
pub mod registry;

pub use actions::{Ping, Pong, RequireState, SnapshotError};
pub use codec::{Backend, CodecError};
pub use object::{Action, Envelope, MeruObject, StateNode, Topic, WireSerialize};
pub use registry::{Registrar, RegistryError, TypeRegistry};
