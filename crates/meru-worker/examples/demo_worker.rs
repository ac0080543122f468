// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Minimal CLI worker exercising a full round trip against a running
//! `meru-broker`: a `Counter` state node, an `Increment` action a reducer
//! applies to it, and a handler that acknowledges each increment on the
//! `"ack"` topic.
//!
//! Run a broker first, then:
//! `cargo run -p meru-worker --example demo_worker`

use anyhow::{Context, Result};
use meru_config::Config;
use meru_proto::{meru_action, meru_state_node, Action, Envelope, Topic};
use meru_runtime::{ActionHandler, Reduces};
use meru_worker::WorkerBuilder;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Counter {
    value: u64,
}
meru_state_node!(Counter);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Increment {
    #[serde(flatten)]
    envelope: Envelope,
    by: u64,
}
meru_action!(Increment);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ack {
    #[serde(flatten)]
    envelope: Envelope,
    value: u64,
}
meru_action!(Ack);

impl Reduces<Increment> for Counter {
    fn reduce(&mut self, action: &Increment) {
        self.value += action.by;
    }
}

struct AckOnIncrement;

impl ActionHandler<Increment> for AckOnIncrement {
    type State = (Counter,);

    fn handle(&self, action: &Increment, (counter,): (Counter,)) -> Vec<Box<dyn Action>> {
        Vec::from([Box::new(Ack {
            envelope: Envelope::new(action.envelope().origin.clone(), Topic::new("ack")),
            value: counter.value,
        }) as Box<dyn Action>])
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env().context("load config")?;

    let worker = WorkerBuilder::new(config)
        .identity("demo-worker")
        .register_state::<Counter>()
        .context("register Counter")?
        .register_reducer::<Counter, Increment>()
        .register_handler::<Increment, _>(AckOnIncrement, false)
        .context("register Increment handler")?
        .topics(vec![Topic::new("ack")])
        .build()
        .await
        .context("connect to broker")?;

    tracing::info!(identity = worker.identity(), "demo worker connected");
    worker.run_until_ctrl_c().await.context("worker run loop")
}
