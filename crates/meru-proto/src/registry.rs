// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Dynamic type registry mapping wire tags to per-backend constructors.
//!
//! Rust has no runtime reflection over "the set of `Action`/`StateNode`
//! subclasses a module defines", so the module-discovery step of the
//! original is replaced with an explicit registry that types are added to
//! one at a time, either directly or through a [`Registrar`] function
//! supplied by a crate that bundles several related types together.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::codec::{BinaryValue, CodecError, JsonValue};
use crate::object::{Action, MeruObject, StateNode};

/// A function that registers one or more types into a [`TypeRegistry`].
///
/// Lets a crate ship a `pub fn register(registry: &mut TypeRegistry)` and
/// have callers fold it into their own registry with [`TypeRegistry::apply`]
/// instead of importing every individual type.
pub type Registrar = fn(&mut TypeRegistry);

/// Errors raised while registering or resolving wire types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// An action tag was registered more than once.
    #[error("action type '{0}' is already registered")]
    DuplicateAction(String),
    /// A state node tag was registered more than once.
    #[error("state node type '{0}' is already registered")]
    DuplicateStateNode(String),
    /// A decoded tag has no matching registration.
    #[error("unknown wire type '{0}'")]
    UnknownTag(String),
}

type ActionFromJson = fn(JsonValue) -> Result<Box<dyn Action>, CodecError>;
type ActionFromBinary = fn(BinaryValue) -> Result<Box<dyn Action>, CodecError>;
type StateFromJson = fn(JsonValue) -> Result<Box<dyn StateNode>, CodecError>;
type StateFromBinary = fn(BinaryValue) -> Result<Box<dyn StateNode>, CodecError>;

struct ActionDescriptor {
    from_json: ActionFromJson,
    from_binary: ActionFromBinary,
}

struct StateDescriptor {
    from_json: StateFromJson,
    from_binary: StateFromBinary,
}

/// Maps wire tags (`object_type` values) to constructors for the concrete
/// [`Action`] and [`StateNode`] types a process knows how to decode.
///
/// A worker builds one at startup from its own types plus [`Ping`]/[`Pong`]
/// and the two distinguished actions' node vocabulary; a broker's registry
/// only ever needs to resolve the state nodes it has been told about by
/// workers, since it relays everything else opaquely.
///
/// [`Ping`]: crate::actions::Ping
/// [`Pong`]: crate::actions::Pong
#[derive(Default)]
pub struct TypeRegistry {
    actions: HashMap<&'static str, ActionDescriptor>,
    states: HashMap<&'static str, StateDescriptor>,
    state_fqns: HashMap<String, &'static str>,
}

impl TypeRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a [`Registrar`] function's registrations into `self`.
    pub fn apply(&mut self, registrar: Registrar) {
        registrar(self);
    }

    /// Register a concrete action type under its [`MeruObject::TAG`].
    ///
    /// # Errors
    /// Returns [`RegistryError::DuplicateAction`] if the tag is already taken.
    pub fn register_action<A>(&mut self) -> Result<(), RegistryError>
    where
        A: Action + MeruObject + DeserializeOwned + 'static,
    {
        if self.actions.contains_key(A::TAG) {
            return Err(RegistryError::DuplicateAction(A::TAG.to_string()));
        }
        self.actions.insert(
            A::TAG,
            ActionDescriptor {
                from_json: |v| Ok(Box::new(serde_json::from_value::<A>(v)?)),
                from_binary: |v| {
                    let mut bytes = Vec::new();
                    ciborium::into_writer(&v, &mut bytes)?;
                    Ok(Box::new(ciborium::from_reader::<A, _>(bytes.as_slice())?))
                },
            },
        );
        Ok(())
    }

    /// Register a concrete state node type under its [`MeruObject::TAG`],
    /// also recording its Rust-path "fully-qualified name" (`std::any::type_name`)
    /// so a [`crate::actions::RequireState`] request naming it by that path
    /// can be resolved back to the tag (spec.md §3: "`RequireState`
    /// identifies nodes by fully-qualified name").
    ///
    /// # Errors
    /// Returns [`RegistryError::DuplicateStateNode`] if the tag is already
    /// taken; the spec's "first registration wins, later ones log a
    /// warning" rule is enforced by the caller ([`crate::registry`] only
    /// reports the conflict).
    pub fn register_state_node<S>(&mut self) -> Result<(), RegistryError>
    where
        S: StateNode + MeruObject + DeserializeOwned + 'static,
    {
        if self.states.contains_key(S::TAG) {
            return Err(RegistryError::DuplicateStateNode(S::TAG.to_string()));
        }
        self.states.insert(
            S::TAG,
            StateDescriptor {
                from_json: |v| Ok(Box::new(serde_json::from_value::<S>(v)?)),
                from_binary: |v| {
                    let mut bytes = Vec::new();
                    ciborium::into_writer(&v, &mut bytes)?;
                    Ok(Box::new(ciborium::from_reader::<S, _>(bytes.as_slice())?))
                },
            },
        );
        self.state_fqns.insert(std::any::type_name::<S>().to_string(), S::TAG);
        Ok(())
    }

    /// Resolve a [`crate::actions::RequireState`]-style fully-qualified
    /// name (`std::any::type_name::<S>()`) back to the tag it was
    /// registered under.
    pub fn resolve_fqn(&self, fqn: &str) -> Option<&'static str> {
        self.state_fqns.get(fqn).copied()
    }

    /// The fully-qualified name a state node type was registered under,
    /// for building a [`crate::actions::RequireState`] request.
    pub fn fqn_of<S>() -> String
    where
        S: StateNode + MeruObject + 'static,
    {
        std::any::type_name::<S>().to_string()
    }

    /// Decode an action's remaining fields given its already-stripped `tag`.
    ///
    /// # Errors
    /// Returns [`CodecError::Registry`] if `tag` is unknown, or whatever the
    /// concrete type's own deserialization returns.
    pub fn decode_action_json(&self, tag: &str, value: JsonValue) -> Result<Box<dyn Action>, CodecError> {
        let desc = self
            .actions
            .get(tag)
            .ok_or_else(|| RegistryError::UnknownTag(tag.to_string()))?;
        (desc.from_json)(value)
    }

    /// Binary-backend counterpart to [`TypeRegistry::decode_action_json`].
    ///
    /// # Errors
    /// Same as [`TypeRegistry::decode_action_json`].
    pub fn decode_action_binary(
        &self,
        tag: &str,
        value: BinaryValue,
    ) -> Result<Box<dyn Action>, CodecError> {
        let desc = self
            .actions
            .get(tag)
            .ok_or_else(|| RegistryError::UnknownTag(tag.to_string()))?;
        (desc.from_binary)(value)
    }

    /// Decode a state node's remaining fields given its already-stripped `tag`.
    ///
    /// # Errors
    /// Returns [`CodecError::Registry`] if `tag` is unknown, or whatever the
    /// concrete type's own deserialization returns.
    pub fn decode_state_json(&self, tag: &str, value: JsonValue) -> Result<Box<dyn StateNode>, CodecError> {
        let desc = self
            .states
            .get(tag)
            .ok_or_else(|| RegistryError::UnknownTag(tag.to_string()))?;
        (desc.from_json)(value)
    }

    /// Binary-backend counterpart to [`TypeRegistry::decode_state_json`].
    ///
    /// # Errors
    /// Same as [`TypeRegistry::decode_state_json`].
    pub fn decode_state_binary(
        &self,
        tag: &str,
        value: BinaryValue,
    ) -> Result<Box<dyn StateNode>, CodecError> {
        let desc = self
            .states
            .get(tag)
            .ok_or_else(|| RegistryError::UnknownTag(tag.to_string()))?;
        (desc.from_binary)(value)
    }

    /// Whether an action tag is registered.
    pub fn has_action(&self, tag: &str) -> bool {
        self.actions.contains_key(tag)
    }

    /// Whether a state node tag is registered.
    pub fn has_state_node(&self, tag: &str) -> bool {
        self.states.contains_key(tag)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::actions::{Ping, Pong, RequireState};

    #[test]
    fn register_and_decode_roundtrip() {
        let mut registry = TypeRegistry::new();
        registry.register_action::<Ping>().unwrap();
        registry.register_action::<Pong>().unwrap();

        let ping = Ping::new("worker-1");
        let encoded = crate::codec::encode_action(&ping, crate::codec::Backend::Json).unwrap();
        let decoded = crate::codec::decode_action(&encoded, crate::codec::Backend::Json, &registry).unwrap();
        assert_eq!(decoded.object_type(), "Ping");
    }

    #[test]
    fn decode_recovers_a_value_equal_to_the_original_on_both_backends() {
        let mut registry = TypeRegistry::new();
        registry.register_action::<RequireState>().unwrap();

        let original = RequireState::new("worker-1", vec!["pkg.FooState".to_string(), "pkg.BarState".to_string()]);

        for backend in [crate::codec::Backend::Json, crate::codec::Backend::Binary] {
            let encoded = crate::codec::encode_action(&original, backend).unwrap();
            let decoded = crate::codec::decode_action(&encoded, backend, &registry).unwrap();
            let decoded = decoded.as_any().downcast_ref::<RequireState>().unwrap();
            assert_eq!(decoded, &original, "{backend:?} round trip changed the value");
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = TypeRegistry::new();
        registry.register_action::<Ping>().unwrap();
        assert_eq!(
            registry.register_action::<Ping>().unwrap_err(),
            RegistryError::DuplicateAction("Ping".to_string())
        );
    }

    #[test]
    fn unknown_tag_is_reported() {
        let registry = TypeRegistry::new();
        let err = registry
            .decode_action_json("Bogus", JsonValue::Object(Default::default()))
            .unwrap_err();
        assert!(matches!(err, CodecError::Registry(RegistryError::UnknownTag(_))));
    }
}
