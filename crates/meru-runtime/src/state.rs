// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! State registry and reducer dispatch (spec.md §4.4).
//!
//! Reflection-based reducer discovery (scan a state node's methods for an
//! `Action`-typed parameter) has no Rust equivalent, so a concrete state
//! node instead implements [`Reduces<A>`] once per action type it reacts
//! to, and the runtime is told about that relationship explicitly via
//! [`StateRegistry::register_reducer`].

use std::any::Any;
use std::collections::HashMap;

use meru_proto::{Action, MeruObject, StateNode};
use thiserror::Error;

/// Implemented by a state node for each action type that mutates it.
///
/// Reducers run to completion synchronously, mutate `self` only, and
/// never send messages or block (spec.md §4.4).
pub trait Reduces<A: Action>: StateNode {
    /// Apply `action`'s effect to `self`.
    fn reduce(&mut self, action: &A);
}

/// Errors raised registering or dispatching through the state registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReducerError {
    /// A state node type was registered more than once.
    #[error("state node '{0}' is already registered")]
    DuplicateState(String),
    /// Dispatch found a reducer entry whose state or action type no
    /// longer matches what's stored — indicates a registration bug, not a
    /// runtime condition callers can hit through the public API.
    #[error("reducer type mismatch for state '{state}' / action '{action}'")]
    TypeMismatch {
        /// The state node's tag.
        state: &'static str,
        /// The action's tag.
        action: &'static str,
    },
}

type ReducerFn = fn(&mut dyn StateNode, &dyn Action) -> Result<(), ReducerError>;

struct ReducerEntry {
    state_tag: &'static str,
    action_tag: &'static str,
    reduce: ReducerFn,
}

/// Holds the process's singleton state-node instances and the reducers
/// registered against them.
#[derive(Default)]
pub struct StateRegistry {
    instances: HashMap<&'static str, Box<dyn StateNode>>,
    reducers: HashMap<&'static str, Vec<ReducerEntry>>,
}

impl StateRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `S`'s singleton instance (its `Default` value) under its
    /// tag. Idempotent registration of handlers calls this transitively
    /// for every state node their signature names.
    ///
    /// # Errors
    /// Returns [`ReducerError::DuplicateState`] if `S::TAG` is already
    /// registered.
    pub fn register_state<S>(&mut self) -> Result<(), ReducerError>
    where
        S: StateNode + MeruObject + Default + 'static,
    {
        if self.instances.contains_key(S::TAG) {
            return Err(ReducerError::DuplicateState(S::TAG.to_string()));
        }
        self.instances.insert(S::TAG, Box::new(S::default()));
        Ok(())
    }

    /// Replace `S`'s instance with `node` (used after a `StateUpdate`
    /// snapshot reply replaces every requested state node).
    pub fn replace_state(&mut self, tag: &'static str, node: Box<dyn StateNode>) {
        self.instances.insert(tag, node);
    }

    /// Register the reducer relationship `S: Reduces<A>` so that future
    /// `A` actions mutate `S`'s instance.
    pub fn register_reducer<S, A>(&mut self)
    where
        S: Reduces<A> + StateNode + MeruObject + 'static,
        A: Action + MeruObject + 'static,
    {
        self.reducers.entry(A::TAG).or_default().push(ReducerEntry {
            state_tag: S::TAG,
            action_tag: A::TAG,
            reduce: |state, action| {
                let state = state
                    .as_any_mut()
                    .downcast_mut::<S>()
                    .ok_or(ReducerError::TypeMismatch {
                        state: S::TAG,
                        action: A::TAG,
                    })?;
                let action = Any::downcast_ref::<A>(action.as_any()).ok_or(ReducerError::TypeMismatch {
                    state: S::TAG,
                    action: A::TAG,
                })?;
                state.reduce(action);
                Ok(())
            },
        });
    }

    /// Dispatch `action` through every reducer registered for its type,
    /// in registration order. Every reducer runs even if an earlier one
    /// errors (spec.md §4.4: "errors are isolated per reducer").
    pub fn dispatch(&mut self, action: &dyn Action) -> Vec<ReducerError> {
        let Some(entries) = self.reducers.get(action.object_type()) else {
            return Vec::new();
        };
        let mut errors = Vec::new();
        for entry in entries {
            if let Some(state) = self.instances.get_mut(entry.state_tag) {
                if let Err(err) = (entry.reduce)(state.as_mut(), action) {
                    errors.push(err);
                }
            }
        }
        errors
    }

    /// Clone out the current instance of `S`, for a handler's read-only
    /// state view or for serving a snapshot request.
    pub fn get<S>(&self) -> Option<S>
    where
        S: StateNode + MeruObject + Clone + 'static,
    {
        self.instances
            .get(S::TAG)
            .and_then(|node| node.as_any().downcast_ref::<S>())
            .cloned()
    }

    /// Borrow the current boxed instance for `tag`, for serving a
    /// snapshot request without knowing the concrete type.
    pub fn get_dyn(&self, tag: &str) -> Option<&dyn StateNode> {
        self.instances.get(tag).map(AsRef::as_ref)
    }

    /// Whether a state node tag is registered.
    pub fn has(&self, tag: &str) -> bool {
        self.instances.contains_key(tag)
    }

    /// Every registered state node's tag, in no particular order.
    pub fn tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.instances.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use meru_proto::{meru_action, meru_state_node, Envelope, Topic};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct FooState {
        field: String,
    }
    meru_state_node!(FooState);

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct SetField {
        #[serde(flatten)]
        envelope: Envelope,
        value: String,
    }
    meru_action!(SetField);

    impl Reduces<SetField> for FooState {
        fn reduce(&mut self, action: &SetField) {
            self.field = action.value.clone();
        }
    }

    #[test]
    fn reducer_mutates_registered_instance() {
        let mut registry = StateRegistry::new();
        registry.register_state::<FooState>().unwrap();
        registry.register_reducer::<FooState, SetField>();

        let action = SetField {
            envelope: Envelope::new("tester", Topic::empty()),
            value: "hello".to_string(),
        };
        let errors = registry.dispatch(&action);
        assert!(errors.is_empty());
        assert_eq!(registry.get::<FooState>().unwrap().field, "hello");
    }

    #[test]
    fn duplicate_state_registration_is_rejected() {
        let mut registry = StateRegistry::new();
        registry.register_state::<FooState>().unwrap();
        assert_eq!(
            registry.register_state::<FooState>().unwrap_err(),
            ReducerError::DuplicateState("FooState".to_string())
        );
    }
}
