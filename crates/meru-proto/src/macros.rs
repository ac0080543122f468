// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Boilerplate-reducing macros for declaring concrete [`crate::Action`] and
//! [`crate::StateNode`] record types.
//!
//! A concrete record derives the usual `Debug, Clone, PartialEq, Serialize,
//! Deserialize` and then invokes one of these macros to pick up the
//! `MeruObject`/`Action`/`StateNode` plumbing (tag, dynamic clone/equality,
//! and per-backend encoding) without hand-writing it per type.

/// Implement [`crate::MeruObject`] and [`crate::Action`] for a record type
/// that has an `envelope: Envelope` field.
#[macro_export]
macro_rules! meru_action {
    ($ty:ty) => {
        impl $crate::MeruObject for $ty {
            const TAG: &'static str = stringify!($ty);

            fn object_type(&self) -> &'static str {
                stringify!($ty)
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }

        impl $crate::Action for $ty {
            fn envelope(&self) -> &$crate::Envelope {
                &self.envelope
            }

            fn clone_boxed(&self) -> ::std::boxed::Box<dyn $crate::Action> {
                ::std::boxed::Box::new(::std::clone::Clone::clone(self))
            }

            fn equals(&self, other: &dyn $crate::Action) -> bool {
                match other.as_any().downcast_ref::<$ty>() {
                    Some(o) => o == self,
                    None => false,
                }
            }

            fn to_json(&self) -> ::std::result::Result<$crate::codec::JsonValue, $crate::CodecError> {
                $crate::object::WireSerialize::wire_to_json(self)
            }

            fn to_binary(
                &self,
            ) -> ::std::result::Result<$crate::codec::BinaryValue, $crate::CodecError> {
                $crate::object::WireSerialize::wire_to_binary(self)
            }
        }
    };
}

/// Implement [`crate::MeruObject`] and [`crate::StateNode`] for a plain
/// record type (no reserved envelope).
#[macro_export]
macro_rules! meru_state_node {
    ($ty:ty) => {
        impl $crate::MeruObject for $ty {
            const TAG: &'static str = stringify!($ty);

            fn object_type(&self) -> &'static str {
                stringify!($ty)
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }

        impl $crate::StateNode for $ty {
            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }

            fn clone_boxed(&self) -> ::std::boxed::Box<dyn $crate::StateNode> {
                ::std::boxed::Box::new(::std::clone::Clone::clone(self))
            }

            fn equals(&self, other: &dyn $crate::StateNode) -> bool {
                match other.as_any().downcast_ref::<$ty>() {
                    Some(o) => o == self,
                    None => false,
                }
            }

            fn to_json(&self) -> ::std::result::Result<$crate::codec::JsonValue, $crate::CodecError> {
                $crate::object::WireSerialize::wire_to_json(self)
            }

            fn to_binary(
                &self,
            ) -> ::std::result::Result<$crate::codec::BinaryValue, $crate::CodecError> {
                $crate::object::WireSerialize::wire_to_binary(self)
            }
        }
    };
}
