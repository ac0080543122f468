// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The worker run loop: subscribe, dispatch (reducers then handler), push
//! replies, and a periodic liveness ping (spec.md §4.7, §5).

use std::future::Future;
use std::time::Duration;

use meru_net::{NetError, Pusher, SnapshotClient, Subscriber};
use meru_proto::codec::{encode_action, peek_tag};
use meru_proto::{Action, Backend, MeruObject, Ping, TypeRegistry};
use meru_runtime::{HandlerRegistry, StateRegistry};
use tokio::time::MissedTickBehavior;

use crate::error::WorkerError;

/// A built, connected worker, ready to run its subscribe-dispatch-push
/// loop with [`Worker::run`] or [`Worker::run_until_ctrl_c`].
pub struct Worker {
    identity: String,
    backend: Backend,
    types: TypeRegistry,
    states: StateRegistry,
    handlers: HandlerRegistry,
    pusher: Pusher,
    subscriber: Subscriber,
    snapshot: SnapshotClient,
    ping_interval: Duration,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        identity: String,
        backend: Backend,
        types: TypeRegistry,
        states: StateRegistry,
        handlers: HandlerRegistry,
        pusher: Pusher,
        subscriber: Subscriber,
        snapshot: SnapshotClient,
        ping_interval: Duration,
    ) -> Self {
        Self {
            identity,
            backend,
            types,
            states,
            handlers,
            pusher,
            subscriber,
            snapshot,
            ping_interval,
        }
    }

    /// This worker's process identity, as sent in every action's `origin`.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Clone out the current value of a registered state-node type, for
    /// host application code that wants a read-only peek outside a
    /// handler invocation.
    pub fn state<S>(&self) -> Option<S>
    where
        S: meru_proto::StateNode + MeruObject + Clone + 'static,
    {
        self.states.get::<S>()
    }

    /// Run until `shutdown` resolves, dispatching every subscribed frame
    /// and emitting a liveness ping every [`crate::WorkerBuilder::ping_interval`]
    /// (spec.md §4.7 steps 5-7, §5 shutdown ordering).
    ///
    /// # Errors
    /// Returns [`WorkerError::Net`] if the subscriber connection breaks,
    /// or [`WorkerError::PingTimeout`] if a liveness ping's reply doesn't
    /// arrive in time.
    pub async fn run(mut self, mut shutdown: impl Future<Output = ()> + Unpin) -> Result<(), WorkerError> {
        let mut ping_timer = tokio::time::interval(self.ping_interval);
        ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping_timer.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    tracing::info!(identity = %self.identity, "worker shutting down");
                    return Ok(());
                }
                frame = self.subscriber.recv() => {
                    match frame {
                        Ok((_topic, payload)) => self.dispatch_frame(&payload).await?,
                        Err(err) => {
                            tracing::warn!(identity = %self.identity, %err, "subscriber connection lost");
                            return Err(err.into());
                        }
                    }
                }
                _ = ping_timer.tick() => {
                    self.send_liveness_ping().await?;
                }
            }
        }
    }

    /// Convenience wrapper around [`Worker::run`] using `Ctrl-C` as the
    /// shutdown signal, the same pattern the reference workspace's
    /// gateway process uses.
    ///
    /// # Errors
    /// Same as [`Worker::run`].
    pub async fn run_until_ctrl_c(self) -> Result<(), WorkerError> {
        let shutdown = Box::pin(async {
            tokio::signal::ctrl_c().await.ok();
        });
        self.run(shutdown).await
    }

    async fn dispatch_frame(&mut self, payload: &[u8]) -> Result<(), WorkerError> {
        let action = match meru_proto::codec::decode_action(payload, self.backend, &self.types) {
            Ok(action) => action,
            Err(err) => {
                tracing::warn!(identity = %self.identity, %err, "dropping undecodable action");
                return Ok(());
            }
        };

        for err in self.states.dispatch(action.as_ref()) {
            tracing::warn!(
                identity = %self.identity,
                action = action.object_type(),
                %err,
                "reducer error"
            );
        }

        let replies = self.handlers.dispatch(&self.states, action.as_ref());
        for reply in replies {
            self.queue_reply(reply).await?;
        }
        Ok(())
    }

    async fn queue_reply(&mut self, reply: Box<dyn Action>) -> Result<(), WorkerError> {
        let topic = reply.envelope().topic.clone();
        let bytes = encode_action(reply.as_ref(), self.backend)?;
        self.pusher.send(&topic, &bytes).await?;
        Ok(())
    }

    async fn send_liveness_ping(&mut self) -> Result<(), WorkerError> {
        let ping = Ping::new(self.identity.clone());
        let payload = encode_action(&ping, self.backend)?;
        let reply = self.snapshot.request(&payload).await.map_err(map_timeout)?;
        let tag = peek_tag(&reply, self.backend)?;
        if tag != "Pong" {
            tracing::warn!(identity = %self.identity, %tag, "unexpected reply to liveness ping");
        }
        Ok(())
    }
}

fn map_timeout(err: NetError) -> WorkerError {
    match err {
        NetError::Timeout => WorkerError::PingTimeout,
        other => other.into(),
    }
}
