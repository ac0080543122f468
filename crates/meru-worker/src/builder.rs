// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Builds a [`crate::Worker`]: registers types, states, reducers, and
//! handlers, then opens the three worker-side sockets and runs the
//! startup snapshot handshake (spec.md §4.7 steps 1-4).

use std::time::Duration;

use meru_config::Config;
use meru_net::{Pusher, SnapshotClient, Subscriber};
use meru_proto::codec::{decode_action, decode_state_update, encode_action, peek_tag};
use meru_proto::{Action, MeruObject, Ping, Pong, Registrar, RequireState, SnapshotError, StateNode, Topic, TypeRegistry};
use meru_runtime::{ActionHandler, HandlerRegistry, Reduces, StateRegistry};
use serde::de::DeserializeOwned;

use crate::error::WorkerError;
use crate::worker::Worker;

/// Default liveness ping period (spec.md §4.7: "every *P* seconds,
/// default 10").
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);

/// Accumulates type/state/handler registrations for one worker process,
/// then connects to the broker and runs the `RequireState`/`StateUpdate`
/// handshake to produce a running [`Worker`].
pub struct WorkerBuilder {
    config: Config,
    identity: String,
    types: TypeRegistry,
    states: StateRegistry,
    handlers: HandlerRegistry,
    topics: Vec<Topic>,
    ping_interval: Duration,
    required_fqns: Vec<String>,
}

impl WorkerBuilder {
    /// Start a builder from `config`, deriving the process identity the
    /// spec's deterministic scheme produces (spec.md §3, §4.8) unless
    /// overridden by [`WorkerBuilder::identity`].
    pub fn new(config: Config) -> Self {
        let identity = meru_config::process_identity(&config);
        let mut types = TypeRegistry::new();
        // Built-in wire vocabulary every worker needs regardless of what
        // its host application registers.
        types.register_action::<Ping>().expect("fresh registry");
        types.register_action::<Pong>().expect("fresh registry");
        types.register_action::<RequireState>().expect("fresh registry");
        types.register_action::<SnapshotError>().expect("fresh registry");
        Self {
            config,
            identity,
            types,
            states: StateRegistry::new(),
            handlers: HandlerRegistry::new(),
            topics: Vec::new(),
            ping_interval: DEFAULT_PING_INTERVAL,
            required_fqns: Vec::new(),
        }
    }

    /// Override the derived process identity (mostly useful in tests,
    /// which otherwise get a time-suffixed identity per run).
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Fold a [`Registrar`]'s action/state-node registrations in — the
    /// Rust-native stand-in for "supply one or more module paths"
    /// (spec.md §4.2).
    pub fn register_types(mut self, registrar: Registrar) -> Self {
        self.types.apply(registrar);
        self
    }

    /// Register a user action type for decode, independent of any
    /// handler (e.g. an action only reducers react to).
    ///
    /// # Errors
    /// Returns [`WorkerError::Registry`] if the tag is already registered.
    pub fn register_action<A>(mut self) -> Result<Self, WorkerError>
    where
        A: Action + MeruObject + DeserializeOwned + 'static,
    {
        self.types.register_action::<A>()?;
        Ok(self)
    }

    /// Register a state-node type: its singleton, its decode entry, and
    /// its fully-qualified name for the startup `RequireState` request.
    ///
    /// A second registration of the same type logs a warning and keeps
    /// the first instance (spec.md §9 Open Question (c)) rather than
    /// erroring.
    ///
    /// # Errors
    /// Returns [`WorkerError::Registry`] if the type's wire tag collides
    /// with an unrelated type already registered.
    pub fn register_state<S>(mut self) -> Result<Self, WorkerError>
    where
        S: StateNode + MeruObject + Default + Clone + DeserializeOwned + 'static,
    {
        self.types.register_state_node::<S>()?;
        if let Err(err) = self.states.register_state::<S>() {
            tracing::warn!(%err, "state node already registered, keeping first instance");
        }
        self.required_fqns.push(TypeRegistry::fqn_of::<S>());
        Ok(self)
    }

    /// Register the reducer relationship `S: Reduces<A>` (spec.md §4.4).
    /// Does not itself register `S`'s singleton — pair with
    /// [`WorkerBuilder::register_state`].
    pub fn register_reducer<S, A>(mut self) -> Self
    where
        S: Reduces<A> + StateNode + MeruObject + 'static,
        A: Action + MeruObject + 'static,
    {
        self.states.register_reducer::<S, A>();
        self
    }

    /// Register `handler` for action type `A`, transitively registering
    /// every state-node type its signature names (spec.md §4.3).
    ///
    /// # Errors
    /// Returns [`WorkerError::Handler`] on a duplicate-state or
    /// duplicate-handler signature error; see [`HandlerRegistry::register`].
    pub fn register_handler<A, H>(mut self, handler: H, allow_override: bool) -> Result<Self, WorkerError>
    where
        A: Action + MeruObject + DeserializeOwned + 'static,
        H: ActionHandler<A>,
    {
        if let Err(err) = self.types.register_action::<A>() {
            tracing::debug!(%err, "action already registered");
        }
        self.handlers.register::<A, H>(&mut self.states, handler, allow_override)?;
        Ok(self)
    }

    /// Set the egress topic-prefix filters this worker subscribes with.
    /// Empty (the default) means every topic (spec.md §4.7 step 3).
    pub fn topics(mut self, topics: Vec<Topic>) -> Self {
        self.topics = topics;
        self
    }

    /// Override the liveness ping period (spec.md §4.7; default
    /// [`DEFAULT_PING_INTERVAL`]).
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Open the pusher, subscriber, and snapshot-client sockets, run the
    /// `RequireState`/`StateUpdate` handshake, and return a [`Worker`]
    /// ready for [`Worker::run`].
    ///
    /// # Errors
    /// Returns [`WorkerError::Net`] if any socket fails to connect,
    /// [`WorkerError::PingTimeout`] if the snapshot reply doesn't arrive
    /// within the configured receive timeout, or
    /// [`WorkerError::UnknownStateNodes`] if the broker reports one or
    /// more requested names as unresolvable.
    pub async fn build(mut self) -> Result<Worker, WorkerError> {
        let backend = self.config.serialization_method;
        let ingress = (self.config.broker_address.as_str(), meru_config::COLLECTOR_PORT);
        let egress = (self.config.broker_address.as_str(), meru_config::PUBLISHER_PORT);
        let snapshot_addr = (self.config.broker_address.as_str(), meru_config::SNAPSHOT_PORT);

        let pusher = Pusher::connect(ingress).await?;
        let subscriber = Subscriber::connect(egress, &self.topics).await?;
        let mut snapshot = SnapshotClient::connect(snapshot_addr, &self.identity, self.config.receive_timeout).await?;

        if !self.required_fqns.is_empty() {
            let request = RequireState::new(self.identity.clone(), self.required_fqns.clone());
            let payload = encode_action(&request, backend)?;
            let reply = snapshot.request(&payload).await.map_err(map_timeout)?;
            self.apply_snapshot_reply(&reply, backend)?;
        }

        Ok(Worker::new(
            self.identity,
            backend,
            self.types,
            self.states,
            self.handlers,
            pusher,
            subscriber,
            snapshot,
            self.ping_interval,
        ))
    }

    fn apply_snapshot_reply(&mut self, reply: &[u8], backend: meru_proto::Backend) -> Result<(), WorkerError> {
        let tag = peek_tag(reply, backend)?;
        match tag.as_str() {
            "StateUpdate" => {
                let decoded = decode_state_update(reply, backend, &self.types)?;
                for node in decoded.nodes {
                    self.states.replace_state(node.object_type(), node);
                }
                Ok(())
            }
            "SnapshotError" => {
                let action = decode_action(reply, backend, &self.types)?;
                let missing = action
                    .as_any()
                    .downcast_ref::<SnapshotError>()
                    .map(|e| e.missing.clone())
                    .unwrap_or_default();
                Err(WorkerError::UnknownStateNodes(missing))
            }
            other => Err(meru_proto::RegistryError::UnknownTag(other.to_string()).into()),
        }
    }
}

fn map_timeout(err: meru_net::NetError) -> WorkerError {
    match err {
        meru_net::NetError::Timeout => WorkerError::PingTimeout,
        other => other.into(),
    }
}
