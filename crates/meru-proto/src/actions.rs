// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Concrete action types every Meru process understands out of the box:
//! the snapshot handshake pair ([`RequireState`], `StateUpdate`) and the
//! liveness pair ([`Ping`], [`Pong`]).
//!
//! `StateUpdate` is not defined here as an ordinary struct — it carries
//! `Vec<Box<dyn StateNode>>`, which can't derive `Serialize`, so it is
//! encoded and decoded through [`crate::codec::encode_state_update`] /
//! [`crate::codec::decode_state_update`] instead of the
//! [`crate::meru_action!`] machinery.

use serde::{Deserialize, Serialize};

use crate::object::{Envelope, Topic};
use crate::{meru_action, Action};

/// Sent by a worker over the snapshot channel to request the broker's
/// current instances of the named state-node types.
///
/// Nodes are identified by fully-qualified name here (the registry hasn't
/// resolved anything yet); the reply, `StateUpdate`, carries live
/// instances whose tags the receiver resolves back to its own local type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequireState {
    #[serde(flatten)]
    envelope: Envelope,
    /// Fully-qualified names of the requested state-node types.
    pub nodes: Vec<String>,
}

meru_action!(RequireState);

impl RequireState {
    /// Build a new request, stamping `origin`'s current time and the
    /// reserved `"state"` topic.
    pub fn new(origin: impl Into<String>, nodes: Vec<String>) -> Self {
        Self {
            envelope: Envelope::new(origin, Topic::new("state")),
            nodes,
        }
    }
}

/// Liveness probe emitted on the snapshot channel; the receiver replies
/// with [`Pong`] addressed back to the sender's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    #[serde(flatten)]
    envelope: Envelope,
}

meru_action!(Ping);

impl Ping {
    /// Build a new ping from `origin`, stamped with the current time.
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::new(origin, Topic::empty()),
        }
    }
}

/// Sent back on the snapshot channel when one or more names in a
/// [`RequireState`] request did not resolve to a registered state-node
/// type (spec.md §7: "unknown state-node name in a request; surfaced in
/// the reply and logged on the broker").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotError {
    #[serde(flatten)]
    envelope: Envelope,
    /// The fully-qualified names that had no matching registration.
    pub missing: Vec<String>,
}

meru_action!(SnapshotError);

impl SnapshotError {
    /// Build a new error reply naming the `missing` fully-qualified names.
    pub fn new(origin: impl Into<String>, missing: Vec<String>) -> Self {
        Self {
            envelope: Envelope::new(origin, Topic::new("SnapshotError")),
            missing,
        }
    }
}

/// Reply to a [`Ping`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    #[serde(flatten)]
    envelope: Envelope,
}

meru_action!(Pong);

impl Pong {
    /// Build a reply from `origin`, stamped with the current time.
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::new(origin, Topic::empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::codec::{encode_action, Backend};

    #[test]
    fn require_state_carries_state_topic() {
        let req = RequireState::new("worker-1", vec!["pkg.FooState".to_string()]);
        assert_eq!(req.envelope().topic, Topic::new("state"));
        assert_eq!(req.nodes, vec!["pkg.FooState".to_string()]);
    }

    #[test]
    fn ping_encodes_with_reserved_tag_first() {
        let ping = Ping::new("worker-1");
        let bytes = encode_action(&ping, Backend::Json).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with(r#"{"object_type":"Ping""#));
    }

    #[test]
    fn snapshot_error_carries_its_own_reserved_topic_and_missing_names() {
        let err = SnapshotError::new("broker", vec!["pkg.FooState".to_string(), "pkg.BarState".to_string()]);
        assert_eq!(err.envelope().topic, Topic::new("SnapshotError"));
        assert_eq!(err.envelope().origin, "broker");
        assert_eq!(err.missing, vec!["pkg.FooState".to_string(), "pkg.BarState".to_string()]);

        let bytes = encode_action(&err, Backend::Json).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with(r#"{"object_type":"SnapshotError""#));
        assert!(text.contains("pkg.BarState"));
    }
}
