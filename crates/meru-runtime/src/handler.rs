// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Handler registry & introspection (spec.md §4.3).
//!
//! Rust has no parameter-name/type introspection, so the builder-style
//! replacement from spec.md §9 is load-bearing here: a handler is
//! registered via [`HandlerRegistry::register`] against an
//! [`ActionHandler<A>`] impl, whose associated `State` tuple type names
//! the read-only state-node views the dispatcher injects. "Exactly one
//! Action parameter" and "no Action parameter" / "more than one" are
//! enforced by the `ActionHandler<A>` shape itself rather than at
//! runtime; the runtime checks that remain are duplicate state-node
//! types within one handler's signature and duplicate handlers per
//! action type.

use std::any::TypeId;
use std::collections::HashMap;

use meru_proto::{Action, MeruObject, StateNode};
use thiserror::Error;

use crate::state::StateRegistry;

/// Errors raised registering a handler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The same state-node type appears more than once in a handler's
    /// declared `State` tuple.
    #[error("state type '{0}' appears twice in the same handler's signature")]
    DuplicateState(&'static str),
    /// A handler is already registered for this action type and the
    /// caller did not pass `allow_override = true`.
    #[error("a handler is already registered for action '{0}'")]
    DuplicateHandler(&'static str),
}

/// A user callback bound to one action type, optionally reading a tuple
/// of state-node views the dispatcher injects.
///
/// The handler may return zero, one, or many actions; each is pushed to
/// the broker via the worker's ingress socket in return order (spec.md
/// §9 "Handler-returned action streams").
pub trait ActionHandler<A: Action + MeruObject>: Send + Sync + 'static {
    /// The read-only state-node views this handler requires, as a tuple
    /// of concrete [`StateNode`] types (`()`, `(S1,)`, `(S1, S2)`, …).
    type State: StateSet;

    /// React to `action`, given the current values of the declared state
    /// views. Must not mutate state — only reducers do (spec.md §4.3).
    fn handle(&self, action: &A, state: Self::State) -> Vec<Box<dyn Action>>;
}

/// Sealed: the Rust-native stand-in for "a handler's list of non-Action,
/// non-duplicate parameter types", implemented for tuples up to a small
/// fixed arity.
pub trait StateSet: Send + sealed::Sealed + 'static {
    /// Tags of every state-node type named by this set, used to detect
    /// duplicates and to register singletons transitively.
    fn tags() -> Vec<&'static str>;

    /// `TypeId`s of every state-node type named by this set; duplicate
    /// detection uses this rather than tags alone, since two
    /// differently-named types could never collide on a tag (tags are
    /// already unique per [`crate::TypeRegistry`]) but a *repeated* type
    /// in the same tuple must still be rejected.
    fn type_ids() -> Vec<TypeId>;

    /// Register every component type's singleton into `registry`, per
    /// spec.md §9 Open Question (c): a second registration of an
    /// already-registered type logs a warning and the first instance
    /// wins, rather than erroring.
    fn register_singletons(registry: &mut StateRegistry);

    /// Clone out the current value of every component type from
    /// `registry`, for a handler invocation's read-only view.
    fn load(registry: &StateRegistry) -> Self;
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for () {}
    impl<S1> Sealed for (S1,) {}
    impl<S1, S2> Sealed for (S1, S2) {}
    impl<S1, S2, S3> Sealed for (S1, S2, S3) {}
}

impl StateSet for () {
    fn tags() -> Vec<&'static str> {
        Vec::new()
    }

    fn type_ids() -> Vec<TypeId> {
        Vec::new()
    }

    fn register_singletons(_registry: &mut StateRegistry) {}

    fn load(_registry: &StateRegistry) {}
}

macro_rules! impl_state_set {
    ($($s:ident),+) => {
        impl<$($s),+> StateSet for ($($s,)+)
        where
            $($s: StateNode + MeruObject + Default + Clone + 'static,)+
        {
            fn tags() -> Vec<&'static str> {
                vec![$($s::TAG),+]
            }

            fn type_ids() -> Vec<TypeId> {
                vec![$(TypeId::of::<$s>()),+]
            }

            fn register_singletons(registry: &mut StateRegistry) {
                $(
                    if let Err(err) = registry.register_state::<$s>() {
                        tracing::warn!(%err, "state node already registered, keeping first instance");
                    }
                )+
            }

            #[allow(non_snake_case)]
            fn load(registry: &StateRegistry) -> Self {
                $(
                    let $s = registry.get::<$s>().unwrap_or_default();
                )+
                ($($s,)+)
            }
        }
    };
}

impl_state_set!(S1);
impl_state_set!(S1, S2);
impl_state_set!(S1, S2, S3);

fn duplicate_state_tag<S: StateSet>() -> Option<&'static str> {
    let ids = S::type_ids();
    let tags = S::tags();
    for i in 0..ids.len() {
        if ids[i + 1..].contains(&ids[i]) {
            return Some(tags[i]);
        }
    }
    None
}

trait ErasedHandler: Send + Sync {
    fn call(&self, state: &StateRegistry, action: &dyn Action) -> Vec<Box<dyn Action>>;
}

struct TypedHandler<A, H> {
    handler: H,
    _action: std::marker::PhantomData<fn(&A)>,
}

impl<A, H> ErasedHandler for TypedHandler<A, H>
where
    A: Action + MeruObject + 'static,
    H: ActionHandler<A>,
{
    fn call(&self, state: &StateRegistry, action: &dyn Action) -> Vec<Box<dyn Action>> {
        let Some(action) = action.as_any().downcast_ref::<A>() else {
            return Vec::new();
        };
        let state = H::State::load(state);
        self.handler.handle(action, state)
    }
}

struct HandlerEntry {
    handler: Box<dyn ErasedHandler>,
}

/// Maps an action type to the one handler (if any) registered for it,
/// plus the state-node types that handler's signature declares.
///
/// At most one handler is registered per action type (spec.md §4.3); the
/// state-node types a handler names are registered into the paired
/// [`StateRegistry`] as a side effect of [`HandlerRegistry::register`].
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, HandlerEntry>,
}

impl HandlerRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` against action type `A`, transitively
    /// registering every state-node type in `H::State` into
    /// `state_registry`.
    ///
    /// # Errors
    /// Returns [`HandlerError::DuplicateState`] if `H::State` names the
    /// same state-node type twice, or [`HandlerError::DuplicateHandler`]
    /// if a handler is already registered for `A` and `allow_override` is
    /// `false`.
    pub fn register<A, H>(
        &mut self,
        state_registry: &mut StateRegistry,
        handler: H,
        allow_override: bool,
    ) -> Result<(), HandlerError>
    where
        A: Action + MeruObject + 'static,
        H: ActionHandler<A>,
    {
        if let Some(tag) = duplicate_state_tag::<H::State>() {
            return Err(HandlerError::DuplicateState(tag));
        }
        if self.handlers.contains_key(A::TAG) && !allow_override {
            return Err(HandlerError::DuplicateHandler(A::TAG));
        }

        H::State::register_singletons(state_registry);
        self.handlers.insert(
            A::TAG,
            HandlerEntry {
                handler: Box::new(TypedHandler::<A, H> {
                    handler,
                    _action: std::marker::PhantomData,
                }),
            },
        );
        Ok(())
    }

    /// Dispatch `action` to its registered handler, if any, returning
    /// whatever actions it yields. An action with no registered handler
    /// still feeds reducers elsewhere; here it simply produces no reply
    /// (spec.md §4.3 dispatch contract).
    pub fn dispatch(&self, state_registry: &StateRegistry, action: &dyn Action) -> Vec<Box<dyn Action>> {
        match self.handlers.get(action.object_type()) {
            Some(entry) => entry.handler.call(state_registry, action),
            None => Vec::new(),
        }
    }

    /// Whether a handler is registered for action tag `tag`.
    pub fn has_handler(&self, tag: &str) -> bool {
        self.handlers.contains_key(tag)
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

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ack {
        #[serde(flatten)]
        envelope: Envelope,
    }
    meru_action!(Ack);

    struct OnSet;

    impl ActionHandler<SetField> for OnSet {
        type State = (FooState,);

        fn handle(&self, action: &SetField, (foo,): (FooState,)) -> Vec<Box<dyn Action>> {
            assert_eq!(foo.field, String::new());
            vec![Box::new(Ack {
                envelope: Envelope::new(action.envelope().origin.clone(), Topic::empty()),
            })]
        }
    }

    #[test]
    fn handler_dispatch_yields_its_replies() {
        let mut states = StateRegistry::new();
        let mut handlers = HandlerRegistry::new();
        handlers
            .register::<SetField, _>(&mut states, OnSet, false)
            .unwrap();

        assert!(states.has("FooState"));

        let action = SetField {
            envelope: Envelope::new("tester", Topic::empty()),
            value: "hello".to_string(),
        };
        let replies = handlers.dispatch(&states, &action);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].object_type(), "Ack");
    }

    #[test]
    fn second_registration_without_override_is_rejected() {
        let mut states = StateRegistry::new();
        let mut handlers = HandlerRegistry::new();
        handlers
            .register::<SetField, _>(&mut states, OnSet, false)
            .unwrap();
        let err = handlers
            .register::<SetField, _>(&mut states, OnSet, false)
            .unwrap_err();
        assert_eq!(err, HandlerError::DuplicateHandler("SetField"));
    }

    #[test]
    fn second_registration_with_override_replaces_the_first() {
        let mut states = StateRegistry::new();
        let mut handlers = HandlerRegistry::new();
        handlers
            .register::<SetField, _>(&mut states, OnSet, false)
            .unwrap();
        handlers
            .register::<SetField, _>(&mut states, OnSet, true)
            .unwrap();
    }

    #[test]
    fn duplicate_state_in_signature_is_rejected() {
        struct Bad;
        impl ActionHandler<SetField> for Bad {
            type State = (FooState, FooState);

            fn handle(&self, _action: &SetField, _state: (FooState, FooState)) -> Vec<Box<dyn Action>> {
                Vec::new()
            }
        }

        let mut states = StateRegistry::new();
        let mut handlers = HandlerRegistry::new();
        let err = handlers
            .register::<SetField, _>(&mut states, Bad, false)
            .unwrap_err();
        assert_eq!(err, HandlerError::DuplicateState("FooState"));
    }

    #[test]
    fn action_with_no_handler_dispatches_to_nothing() {
        let states = StateRegistry::new();
        let handlers = HandlerRegistry::new();
        let action = SetField {
            envelope: Envelope::new("tester", Topic::empty()),
            value: "hello".to_string(),
        };
        assert!(handlers.dispatch(&states, &action).is_empty());
    }
}
