// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Self-describing wire codec: the `object_type` tag plus the two pluggable
//! backends (JSON and CBOR) that every [`crate::Action`] and
//! [`crate::StateNode`] encode through.

use serde_json::Map as JsonMap;
use thiserror::Error;

use crate::object::{Action, MeruObject, StateNode};
use crate::registry::{RegistryError, TypeRegistry};

/// JSON value used by the JSON backend.
pub type JsonValue = serde_json::Value;

/// CBOR value used by the binary backend.
pub type BinaryValue = ciborium::value::Value;

/// Reserved map key every encoded object carries as its first field.
pub const OBJECT_TYPE_KEY: &str = "object_type";

/// Which of the two wire formats to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Human-readable, order-preserving JSON (`serde_json`).
    Json,
    /// Compact binary CBOR (`ciborium`).
    Binary,
}

/// Anything that can go wrong encoding or decoding a wire object.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The JSON backend failed to serialize or deserialize a value.
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),
    /// The CBOR backend failed to serialize a value.
    #[error("cbor serialize error: {0}")]
    CborSer(#[from] ciborium::ser::Error<std::io::Error>),
    /// The CBOR backend failed to deserialize a value.
    #[error("cbor deserialize error: {0}")]
    CborDe(#[from] ciborium::de::Error<std::io::Error>),
    /// A decoded payload was missing or had a malformed `object_type` tag.
    #[error("missing or malformed '{OBJECT_TYPE_KEY}' tag")]
    MissingTag,
    /// A decoded payload was not a map/object at the top level.
    #[error("top-level wire value is not an object")]
    NotAnObject,
    /// The type registry has no entry for a tag encountered on the wire.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Encode a concrete action to bytes, prefixing its fields with the
/// reserved `object_type` tag.
///
/// # Errors
/// Returns [`CodecError`] if the concrete type's own serialization fails.
pub fn encode_action(action: &dyn Action, backend: Backend) -> Result<Vec<u8>, CodecError> {
    match backend {
        Backend::Json => {
            let mut map = JsonMap::new();
            map.insert(
                OBJECT_TYPE_KEY.to_string(),
                JsonValue::String(action.object_type().to_string()),
            );
            if let JsonValue::Object(fields) = action.to_json()? {
                map.extend(fields);
            }
            Ok(serde_json::to_vec(&JsonValue::Object(map))?)
        }
        Backend::Binary => {
            let mut entries = vec![(
                BinaryValue::Text(OBJECT_TYPE_KEY.to_string()),
                BinaryValue::Text(action.object_type().to_string()),
            )];
            if let BinaryValue::Map(fields) = action.to_binary()? {
                entries.extend(fields);
            }
            let mut out = Vec::new();
            ciborium::into_writer(&BinaryValue::Map(entries), &mut out)?;
            Ok(out)
        }
    }
}

/// Decode an action from bytes using `registry` to resolve the
/// `object_type` tag to a concrete constructor.
///
/// # Errors
/// Returns [`CodecError`] if the bytes are malformed, the tag is missing,
/// or the registry has no entry for the decoded tag.
pub fn decode_action(
    bytes: &[u8],
    backend: Backend,
    registry: &TypeRegistry,
) -> Result<Box<dyn Action>, CodecError> {
    match backend {
        Backend::Json => {
            let value: JsonValue = serde_json::from_slice(bytes)?;
            let (tag, value) = split_tag_json(value)?;
            registry.decode_action_json(&tag, value)
        }
        Backend::Binary => {
            let value: BinaryValue = ciborium::from_reader(bytes)?;
            let (tag, value) = split_tag_binary(value)?;
            registry.decode_action_binary(&tag, value)
        }
    }
}

/// Encode a concrete state node to bytes, prefixing its fields with the
/// reserved `object_type` tag. Used both standalone and by
/// [`encode_state_update`].
///
/// # Errors
/// Returns [`CodecError`] if the concrete type's own serialization fails.
pub fn encode_state_node(node: &dyn StateNode, backend: Backend) -> Result<JsonOrBinary, CodecError> {
    match backend {
        Backend::Json => {
            let mut map = JsonMap::new();
            map.insert(
                OBJECT_TYPE_KEY.to_string(),
                JsonValue::String(node.object_type().to_string()),
            );
            if let JsonValue::Object(fields) = node.to_json()? {
                map.extend(fields);
            }
            Ok(JsonOrBinary::Json(JsonValue::Object(map)))
        }
        Backend::Binary => {
            let mut entries = vec![(
                BinaryValue::Text(OBJECT_TYPE_KEY.to_string()),
                BinaryValue::Text(node.object_type().to_string()),
            )];
            if let BinaryValue::Map(fields) = node.to_binary()? {
                entries.extend(fields);
            }
            Ok(JsonOrBinary::Binary(BinaryValue::Map(entries)))
        }
    }
}

/// Either backend's value, returned by [`encode_state_node`] so its one
/// caller ([`encode_state_update`]) doesn't need a second decode path.
pub enum JsonOrBinary {
    /// A JSON-backend value.
    Json(JsonValue),
    /// A binary-backend value.
    Binary(BinaryValue),
}

/// Decode a single tagged state node using `registry`.
///
/// # Errors
/// Returns [`CodecError`] if the tag is missing or unknown to `registry`.
pub fn decode_state_node(
    value: JsonOrBinary,
    registry: &TypeRegistry,
) -> Result<Box<dyn StateNode>, CodecError> {
    match value {
        JsonOrBinary::Json(value) => {
            let (tag, value) = split_tag_json(value)?;
            registry.decode_state_json(&tag, value)
        }
        JsonOrBinary::Binary(value) => {
            let (tag, value) = split_tag_binary(value)?;
            registry.decode_state_binary(&tag, value)
        }
    }
}

/// Encode the distinguished `StateUpdate` action: its envelope fields plus
/// a `nodes` array of fully tagged state nodes.
///
/// `StateUpdate` can't derive `Serialize` like an ordinary action because
/// it carries `Vec<Box<dyn StateNode>>`, so it gets its own encode/decode
/// pair instead of going through [`encode_action`]/[`decode_action`].
///
/// # Errors
/// Returns [`CodecError`] if any carried node fails to serialize.
pub fn encode_state_update(
    origin: &str,
    timestamp: i64,
    topic: &crate::object::Topic,
    nodes: &[Box<dyn StateNode>],
    backend: Backend,
) -> Result<Vec<u8>, CodecError> {
    match backend {
        Backend::Json => {
            let mut map = JsonMap::new();
            map.insert(
                OBJECT_TYPE_KEY.to_string(),
                JsonValue::String("StateUpdate".to_string()),
            );
            map.insert("topic".to_string(), serde_json::to_value(topic)?);
            map.insert("timestamp".to_string(), JsonValue::from(timestamp));
            map.insert("origin".to_string(), JsonValue::String(origin.to_string()));
            let mut encoded_nodes = Vec::with_capacity(nodes.len());
            for node in nodes {
                match encode_state_node(node.as_ref(), backend)? {
                    JsonOrBinary::Json(v) => encoded_nodes.push(v),
                    JsonOrBinary::Binary(_) => unreachable!("backend is Json"),
                }
            }
            map.insert("nodes".to_string(), JsonValue::Array(encoded_nodes));
            Ok(serde_json::to_vec(&JsonValue::Object(map))?)
        }
        Backend::Binary => {
            let mut entries = vec![
                (
                    BinaryValue::Text(OBJECT_TYPE_KEY.to_string()),
                    BinaryValue::Text("StateUpdate".to_string()),
                ),
                (
                    BinaryValue::Text("topic".to_string()),
                    BinaryValue::Text(String::from_utf8_lossy(&topic.0).to_string()),
                ),
                (
                    BinaryValue::Text("timestamp".to_string()),
                    BinaryValue::Integer(timestamp.into()),
                ),
                (
                    BinaryValue::Text("origin".to_string()),
                    BinaryValue::Text(origin.to_string()),
                ),
            ];
            let mut encoded_nodes = Vec::with_capacity(nodes.len());
            for node in nodes {
                match encode_state_node(node.as_ref(), backend)? {
                    JsonOrBinary::Binary(v) => encoded_nodes.push(v),
                    JsonOrBinary::Json(_) => unreachable!("backend is Binary"),
                }
            }
            entries.push((
                BinaryValue::Text("nodes".to_string()),
                BinaryValue::Array(encoded_nodes),
            ));
            let mut out = Vec::new();
            ciborium::into_writer(&BinaryValue::Map(entries), &mut out)?;
            Ok(out)
        }
    }
}

/// Decoded `StateUpdate` contents, returned by [`decode_state_update`].
pub struct DecodedStateUpdate {
    /// Egress topic the update was published on.
    pub topic: crate::object::Topic,
    /// Sender's construction-time timestamp.
    pub timestamp: i64,
    /// Sender's identity string.
    pub origin: String,
    /// The carried state node snapshots, each resolved through `registry`.
    pub nodes: Vec<Box<dyn StateNode>>,
}

/// Decode a `StateUpdate` action, resolving every carried node's tag
/// through `registry`.
///
/// # Errors
/// Returns [`CodecError`] if the envelope fields are missing/malformed or
/// any node's tag is unknown to `registry`.
pub fn decode_state_update(
    bytes: &[u8],
    backend: Backend,
    registry: &TypeRegistry,
) -> Result<DecodedStateUpdate, CodecError> {
    match backend {
        Backend::Json => {
            let value: JsonValue = serde_json::from_slice(bytes)?;
            let JsonValue::Object(mut map) = value else {
                return Err(CodecError::NotAnObject);
            };
            let topic: crate::object::Topic = map
                .remove("topic")
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default();
            let timestamp = map
                .get("timestamp")
                .and_then(JsonValue::as_i64)
                .ok_or(CodecError::MissingTag)?;
            let origin = map
                .get("origin")
                .and_then(JsonValue::as_str)
                .ok_or(CodecError::MissingTag)?
                .to_string();
            let raw_nodes = match map.remove("nodes") {
                Some(JsonValue::Array(a)) => a,
                _ => return Err(CodecError::MissingTag),
            };
            let mut nodes = Vec::with_capacity(raw_nodes.len());
            for raw in raw_nodes {
                nodes.push(decode_state_node(JsonOrBinary::Json(raw), registry)?);
            }
            Ok(DecodedStateUpdate {
                topic,
                timestamp,
                origin,
                nodes,
            })
        }
        Backend::Binary => {
            let value: BinaryValue = ciborium::from_reader(bytes)?;
            let BinaryValue::Map(entries) = value else {
                return Err(CodecError::NotAnObject);
            };
            let mut topic = crate::object::Topic::empty();
            let mut timestamp = None;
            let mut origin = None;
            let mut nodes_raw = None;
            for (k, v) in entries {
                let BinaryValue::Text(key) = k else { continue };
                match key.as_str() {
                    "topic" => {
                        if let BinaryValue::Text(t) = v {
                            topic = crate::object::Topic::new(t);
                        }
                    }
                    "timestamp" => {
                        if let BinaryValue::Integer(i) = v {
                            timestamp = i128::from(i).try_into().ok();
                        }
                    }
                    "origin" => {
                        if let BinaryValue::Text(t) = v {
                            origin = Some(t);
                        }
                    }
                    "nodes" => {
                        if let BinaryValue::Array(a) = v {
                            nodes_raw = Some(a);
                        }
                    }
                    _ => {}
                }
            }
            let mut nodes = Vec::new();
            for raw in nodes_raw.unwrap_or_default() {
                nodes.push(decode_state_node(JsonOrBinary::Binary(raw), registry)?);
            }
            Ok(DecodedStateUpdate {
                topic,
                timestamp: timestamp.ok_or(CodecError::MissingTag)?,
                origin: origin.ok_or(CodecError::MissingTag)?,
                nodes,
            })
        }
    }
}

/// Read just the `object_type` tag off an encoded payload, without
/// resolving it against a registry or constructing anything.
///
/// Used by the broker relay (spec.md §4.6) to decide whether a forwarded
/// action is worth fully decoding for reducer dispatch, without paying
/// that cost for action types the broker has no reducers for.
///
/// # Errors
/// Returns [`CodecError`] if the bytes are malformed or the tag is missing.
pub fn peek_tag(bytes: &[u8], backend: Backend) -> Result<String, CodecError> {
    match backend {
        Backend::Json => {
            let value: JsonValue = serde_json::from_slice(bytes)?;
            Ok(split_tag_json(value)?.0)
        }
        Backend::Binary => {
            let value: BinaryValue = ciborium::from_reader(bytes)?;
            Ok(split_tag_binary(value)?.0)
        }
    }
}

fn split_tag_json(value: JsonValue) -> Result<(String, JsonValue), CodecError> {
    let JsonValue::Object(mut map) = value else {
        return Err(CodecError::NotAnObject);
    };
    let tag = match map.remove(OBJECT_TYPE_KEY) {
        Some(JsonValue::String(s)) => s,
        _ => return Err(CodecError::MissingTag),
    };
    Ok((tag, JsonValue::Object(map)))
}

fn split_tag_binary(value: BinaryValue) -> Result<(String, BinaryValue), CodecError> {
    let BinaryValue::Map(entries) = value else {
        return Err(CodecError::NotAnObject);
    };
    let mut tag = None;
    let mut rest = Vec::with_capacity(entries.len());
    for (k, v) in entries {
        if let BinaryValue::Text(key) = &k {
            if key == OBJECT_TYPE_KEY {
                if let BinaryValue::Text(t) = v {
                    tag = Some(t);
                    continue;
                }
            }
        }
        rest.push((k, v));
    }
    Ok((tag.ok_or(CodecError::MissingTag)?, BinaryValue::Map(rest)))
}
