// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The Meru broker: binds the three well-known ports and runs relay,
//! snapshot service, and liveness as one cooperative loop (spec.md §4.6).
//!
//! This binary ships with no application state-node types registered —
//! Rust has no module-discovery step to stand in for the original's
//! "import every state module named in config" startup. It still relays
//! every action byte-for-byte regardless (the relay only needs to decode
//! a frame when it has a reducer for that action's tag), and still
//! answers `RequireState`/`Ping` on the snapshot channel; any requested
//! state-node name that isn't registered resolves as not found, which is
//! the `SnapshotError` path spec.md §4.6 already describes. An embedder
//! that needs the broker to hold application state links this crate as a
//! library and builds a [`Broker`] with its own types registered instead
//! of running this binary directly.

use std::sync::Arc;

use meru_config::{Config, ConfigError, COLLECTOR_PORT, PUBLISHER_PORT, SNAPSHOT_PORT};
use meru_net::{Collector, NetError, Publisher, SnapshotServer};
use meru_proto::codec::{encode_action, encode_state_update, peek_tag, CodecError};
use meru_proto::{Action, Backend, Envelope, MeruObject, Ping, Pong, RequireState, SnapshotError, StateNode, Topic, TypeRegistry};
use meru_runtime::StateRegistry;
use thiserror::Error;
use tracing::{info, warn};

/// Identity the broker uses as `origin` on every action it originates
/// itself (`Pong`, `SnapshotError`, the `StateUpdate` reply envelope).
const BROKER_IDENTITY: &str = "broker";

/// Everything that can go wrong standing up a [`Broker`].
#[derive(Debug, Error)]
enum BrokerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Net(#[from] NetError),
}

/// The type registry and state replica the relay and snapshot service
/// share. Split out from [`Broker`] so the decode/dispatch/reply logic
/// can be unit tested without binding any real sockets.
struct BrokerRegistry {
    types: TypeRegistry,
    states: StateRegistry,
    backend: Backend,
}

impl BrokerRegistry {
    fn new(backend: Backend) -> Self {
        let mut types = TypeRegistry::new();
        types.register_action::<Ping>().expect("fresh registry");
        types.register_action::<Pong>().expect("fresh registry");
        types.register_action::<RequireState>().expect("fresh registry");
        types.register_action::<SnapshotError>().expect("fresh registry");

        Self {
            types,
            states: StateRegistry::new(),
            backend,
        }
    }

    /// Decode and dispatch only if a reducer might care (spec.md §4.6
    /// item 1: "no deduplication, no reordering" — the relay never
    /// re-encodes, so the caller always forwards `payload` unchanged
    /// regardless of what happens here).
    fn decode_and_dispatch(&mut self, payload: &[u8]) {
        let Ok(tag) = peek_tag(payload, self.backend) else {
            return;
        };
        if !self.types.has_action(&tag) {
            return;
        }
        match meru_proto::codec::decode_action(payload, self.backend, &self.types) {
            Ok(action) => {
                for err in self.states.dispatch(action.as_ref()) {
                    warn!(%err, action = action.object_type(), "reducer error");
                }
            }
            Err(err) => warn!(%err, %tag, "dropping undecodable action during relay"),
        }
    }

    fn answer_snapshot_request(&self, payload: &[u8]) -> Option<Result<Vec<u8>, CodecError>> {
        let tag = peek_tag(payload, self.backend).ok()?;
        match tag.as_str() {
            "RequireState" => Some(self.answer_require_state(payload)),
            "Ping" => Some(self.answer_ping()),
            _ => None,
        }
    }

    fn answer_require_state(&self, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        let action = meru_proto::codec::decode_action(payload, self.backend, &self.types)?;
        let request = action
            .as_any()
            .downcast_ref::<RequireState>()
            .expect("tag already matched RequireState");

        let mut nodes: Vec<Box<dyn StateNode>> = Vec::new();
        let mut missing = Vec::new();
        for fqn in &request.nodes {
            match self.types.resolve_fqn(fqn).and_then(|tag| self.states.get_dyn(tag)) {
                Some(node) => nodes.push(node.clone_boxed()),
                None => missing.push(fqn.clone()),
            }
        }

        if missing.is_empty() {
            let envelope = Envelope::new(BROKER_IDENTITY, Topic::new("state"));
            encode_state_update(&envelope.origin, envelope.timestamp, &envelope.topic, &nodes, self.backend)
        } else {
            encode_action(&SnapshotError::new(BROKER_IDENTITY, missing), self.backend)
        }
    }

    fn answer_ping(&self) -> Result<Vec<u8>, CodecError> {
        encode_action(&Pong::new(BROKER_IDENTITY), self.backend)
    }
}

/// A bound broker: the three socket roles plus the registry the relay
/// and snapshot service share.
struct Broker {
    collector: Collector,
    publisher: Arc<Publisher>,
    snapshot: SnapshotServer,
    registry: BrokerRegistry,
}

impl Broker {
    async fn bind(config: &Config) -> Result<Self, BrokerError> {
        let collector = Collector::bind((config.bind_address.as_str(), COLLECTOR_PORT)).await?;
        let publisher = Publisher::bind((config.bind_address.as_str(), PUBLISHER_PORT)).await?;
        let snapshot = SnapshotServer::bind((config.bind_address.as_str(), SNAPSHOT_PORT)).await?;

        Ok(Self {
            collector,
            publisher,
            snapshot,
            registry: BrokerRegistry::new(config.serialization_method),
        })
    }

    /// Run relay, snapshot service, and liveness as one cooperative loop
    /// until `shutdown` resolves (spec.md §5: single-threaded cooperative
    /// scheduling means the state registry never needs a lock, since only
    /// this loop ever touches it).
    async fn run(mut self, mut shutdown: impl std::future::Future<Output = ()> + Unpin) {
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("broker shutting down");
                    return;
                }
                frame = self.collector.recv() => {
                    match frame {
                        Some((topic, payload)) => self.relay(&topic, &payload).await,
                        None => warn!("collector closed, relay idle"),
                    }
                }
                request = self.snapshot.recv() => {
                    if let Some((identity, payload)) = request {
                        self.handle_snapshot_request(&identity, &payload).await;
                    }
                }
            }
        }
    }

    async fn run_until_ctrl_c(self) {
        let shutdown = Box::pin(async {
            tokio::signal::ctrl_c().await.ok();
        });
        self.run(shutdown).await;
    }

    /// Apply to the local replica, then forward the original bytes
    /// unchanged so every subscriber sees exactly what the collector
    /// accepted.
    async fn relay(&mut self, topic: &Topic, payload: &[u8]) {
        self.registry.decode_and_dispatch(payload);
        if let Err(err) = self.publisher.publish(topic, payload).await {
            warn!(%err, "failed to publish relayed frame");
        }
    }

    async fn handle_snapshot_request(&mut self, identity: &str, payload: &[u8]) {
        let Some(reply) = self.registry.answer_snapshot_request(payload) else {
            warn!(%identity, "dropping unknown or malformed snapshot request");
            return;
        };
        let Ok(bytes) = reply else {
            warn!(%identity, "failed to encode snapshot reply");
            return;
        };
        if let Err(err) = self.snapshot.reply(identity, &bytes).await {
            warn!(%identity, %err, "failed to deliver snapshot reply");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let broker = Broker::bind(&config).await?;
    info!(
        bind_address = %config.bind_address,
        collector_port = COLLECTOR_PORT,
        publisher_port = PUBLISHER_PORT,
        snapshot_port = SNAPSHOT_PORT,
        "broker listening"
    );
    broker.run_until_ctrl_c().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use meru_proto::{meru_state_node, Envelope};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct FooState {
        field: String,
    }
    meru_state_node!(FooState);

    fn registry_with_foo_registered() -> BrokerRegistry {
        let mut registry = BrokerRegistry::new(Backend::Json);
        registry.types.register_state_node::<FooState>().unwrap();
        registry.states.register_state::<FooState>().unwrap();
        registry
    }

    #[test]
    fn require_state_resolves_known_name_to_a_node() {
        let registry = registry_with_foo_registered();
        let fqn = TypeRegistry::fqn_of::<FooState>();
        let request = RequireState::new("worker-1", vec![fqn]);
        let payload = encode_action(&request, Backend::Json).unwrap();

        let reply = registry.answer_require_state(&payload).unwrap();
        let tag = peek_tag(&reply, Backend::Json).unwrap();
        assert_eq!(tag, "StateUpdate");
    }

    #[test]
    fn require_state_reports_unknown_name_as_snapshot_error() {
        let registry = registry_with_foo_registered();
        let request = RequireState::new("worker-1", vec!["nowhere::Bogus".to_string()]);
        let payload = encode_action(&request, Backend::Json).unwrap();

        let reply = registry.answer_require_state(&payload).unwrap();
        let tag = peek_tag(&reply, Backend::Json).unwrap();
        assert_eq!(tag, "SnapshotError");
    }

    #[test]
    fn ping_is_answered_with_pong() {
        let registry = BrokerRegistry::new(Backend::Json);
        let reply = registry.answer_ping().unwrap();
        let tag = peek_tag(&reply, Backend::Json).unwrap();
        assert_eq!(tag, "Pong");
    }

    #[test]
    fn ping_is_answered_in_the_configured_backend() {
        let registry = BrokerRegistry::new(Backend::Binary);
        let reply = registry.answer_ping().unwrap();
        let tag = peek_tag(&reply, Backend::Binary).unwrap();
        assert_eq!(tag, "Pong");
    }

    #[test]
    fn relay_applies_registered_reducer_before_forwarding() {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        struct SetField {
            #[serde(flatten)]
            envelope: Envelope,
            value: String,
        }
        meru_proto::meru_action!(SetField);
        impl meru_runtime::Reduces<SetField> for FooState {
            fn reduce(&mut self, action: &SetField) {
                self.field.clone_from(&action.value);
            }
        }

        let mut registry = registry_with_foo_registered();
        registry.types.register_action::<SetField>().unwrap();
        registry.states.register_reducer::<FooState, SetField>();

        let action = SetField {
            envelope: Envelope::new("worker-1", Topic::empty()),
            value: "hello".to_string(),
        };
        let payload = encode_action(&action, Backend::Json).unwrap();

        registry.decode_and_dispatch(&payload);
        assert_eq!(registry.states.get::<FooState>().unwrap().field, "hello");
    }
}
