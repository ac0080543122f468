// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Core record kinds carried over the wire: [`MeruObject`], [`Action`], [`StateNode`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::Debug;

use crate::codec::{BinaryValue, CodecError, JsonValue};

/// Short opaque byte string used for subscriber-side prefix filtering.
///
/// Every action the core sees (`Ping`/`Pong`, user actions, and the two
/// distinguished actions) carries one; the empty topic means "no topic".
/// Topics are restricted to valid UTF-8 on the wire, which every topic in
/// this system is in practice (`""`, `"state"`, `"StateUpdate"`, and
/// whatever short tag a handler's caller chooses).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Topic(pub Vec<u8>);

impl Topic {
    /// The empty topic ("no topic").
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Build a topic from a UTF-8 string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().into_bytes())
    }

    /// Whether `self` is a byte-prefix of `other`.
    pub fn is_prefix_of(&self, other: &Topic) -> bool {
        other.0.starts_with(&self.0)
    }
}

impl Serialize for Topic {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = String::from_utf8_lossy(&self.0);
        serializer.serialize_str(&s)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Topic(s.into_bytes()))
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Topic::new(s)
    }
}

/// Reserved attributes carried by every [`Action`].
///
/// `timestamp` and `origin` are filled in at construction time
/// (`Envelope::new`) and are never touched by user code afterward; `topic`
/// defaults to empty unless the concrete action overrides it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Prefix-filter topic for the egress channel.
    pub topic: Topic,
    /// Milliseconds since the UNIX epoch, filled on construction.
    pub timestamp: i64,
    /// Identity string of the sending process, filled on construction.
    pub origin: String,
}

impl Envelope {
    /// Build a new envelope for an action about to be sent by `origin`,
    /// stamping the current wall-clock time.
    pub fn new(origin: impl Into<String>, topic: Topic) -> Self {
        Self {
            topic,
            timestamp: now_millis(),
            origin: origin.into(),
        }
    }

    /// Build an envelope with an explicit timestamp (used by the broker,
    /// which never originates actions with a fresh clock reading of its
    /// own, and by tests that pin time).
    pub fn with_timestamp(origin: impl Into<String>, topic: Topic, timestamp: i64) -> Self {
        Self {
            topic,
            timestamp,
            origin: origin.into(),
        }
    }
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// The abstract supertype of everything sent on the wire.
///
/// Every concrete type carries a stable string tag (its [`MeruObject::TAG`])
/// used for wire dispatch by the [`crate::registry::TypeRegistry`].
pub trait MeruObject: Debug + Send + Sync {
    /// Stable wire tag for this type (its simple type name).
    const TAG: &'static str
    where
        Self: Sized;

    /// Object-safe accessor for [`MeruObject::TAG`].
    fn object_type(&self) -> &'static str;

    /// Upcast to `&dyn Any` for downcasting back to a concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// Immutable record describing a thing that happened or a request.
///
/// Actions are value-equal by their full attribute tuple; dispatch, wire
/// encoding, and topic filtering all key off [`MeruObject::object_type`]
/// and [`Action::envelope`].
pub trait Action: MeruObject {
    /// The envelope of reserved attributes (`timestamp`, `origin`, `topic`).
    fn envelope(&self) -> &Envelope;

    /// Clone `self` into a boxed trait object.
    fn clone_boxed(&self) -> Box<dyn Action>;

    /// Structural equality against another boxed action.
    fn equals(&self, other: &dyn Action) -> bool;

    /// Encode this action's fields (including the envelope) to a JSON value,
    /// without the reserved `object_type` tag.
    fn to_json(&self) -> Result<JsonValue, CodecError>;

    /// Encode this action's fields to a CBOR value, without the reserved
    /// `object_type` tag.
    fn to_binary(&self) -> Result<BinaryValue, CodecError>;
}

impl Clone for Box<dyn Action> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

impl PartialEq for dyn Action {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

/// Mutable record holding a slice of the global shared state.
///
/// A state node is value-equal by its full attribute tuple, instantiated at
/// most once per process (singleton per process, enforced by
/// [`crate::registry::TypeRegistry`] and the runtime's state registry), and
/// mutated only through its own reducer methods.
pub trait StateNode: MeruObject {
    /// Downcast handle used by reducers to mutate the concrete type.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Clone `self` into a boxed trait object.
    fn clone_boxed(&self) -> Box<dyn StateNode>;

    /// Structural equality against another boxed state node.
    fn equals(&self, other: &dyn StateNode) -> bool;

    /// Encode this node's fields to a JSON value, without the reserved
    /// `object_type` tag.
    fn to_json(&self) -> Result<JsonValue, CodecError>;

    /// Encode this node's fields to a CBOR value, without the reserved
    /// `object_type` tag.
    fn to_binary(&self) -> Result<BinaryValue, CodecError>;
}

impl Clone for Box<dyn StateNode> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

impl PartialEq for dyn StateNode {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

/// Blanket plumbing shared by every concrete [`Action`] and [`StateNode`].
///
/// Implemented by the `meru_proto::impl_action!` / `impl_state_node!`
/// macros so concrete record types only declare their own fields plus one
/// macro invocation, rather than hand-writing `to_json`/`to_binary`/`clone`.
pub trait WireSerialize: Serialize + DeserializeOwned + Clone + PartialEq + 'static {
    /// Serialize `self` to a JSON value.
    fn wire_to_json(&self) -> Result<JsonValue, CodecError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Serialize `self` to a CBOR value.
    fn wire_to_binary(&self) -> Result<BinaryValue, CodecError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)?;
        Ok(ciborium::from_reader(bytes.as_slice())?)
    }
}

impl<T> WireSerialize for T where T: Serialize + DeserializeOwned + Clone + PartialEq + 'static {}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::codec::{decode_action, encode_action, Backend};
    use crate::registry::TypeRegistry;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct DummyAction {
        #[serde(flatten)]
        envelope: Envelope,
    }
    crate::meru_action!(DummyAction);

    #[test]
    fn codec_round_trip_matches_the_documented_byte_payload() {
        let action = DummyAction {
            envelope: Envelope::with_timestamp("host-w1", Topic::empty(), 1_495_584_000_000),
        };

        let encoded = encode_action(&action, Backend::Json).unwrap();
        let text = String::from_utf8(encoded.clone()).unwrap();
        assert_eq!(
            text,
            r#"{"object_type":"DummyAction","topic":"","timestamp":1495584000000,"origin":"host-w1"}"#
        );

        let mut registry = TypeRegistry::new();
        registry.register_action::<DummyAction>().unwrap();
        let decoded = decode_action(&encoded, Backend::Json, &registry).unwrap();
        let decoded = decoded.as_any().downcast_ref::<DummyAction>().unwrap();
        assert_eq!(decoded, &action);
    }
}
