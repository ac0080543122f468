// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Broker-side fan-in socket: binds the ingress port and accepts pushes
//! from any number of workers.

use meru_proto::Topic;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::framing::read_topic_frame;
use crate::NetError;

const INBOX_CAPACITY: usize = 1024;

/// Bound ingress port; every accepted connection's frames are merged onto
/// one channel in first-arrival order, which is also the relay's ordering
/// point (spec.md §4.6 item 1).
pub struct Collector {
    rx: mpsc::Receiver<(Topic, Vec<u8>)>,
}

impl Collector {
    /// Bind `addr` and start accepting pusher connections in the
    /// background.
    ///
    /// # Errors
    /// Returns [`NetError::Io`] if the bind fails.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, NetError> {
        let listener = TcpListener::bind(addr).await?;
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        tokio::spawn(accept_loop(listener, tx));
        Ok(Self { rx })
    }

    /// Receive the next pushed `(topic, payload)` frame, in the order the
    /// collector accepted it from whichever connection sent it first.
    ///
    /// Returns `None` once every connection has closed and no more frames
    /// will ever arrive.
    pub async fn recv(&mut self) -> Option<(Topic, Vec<u8>)> {
        self.rx.recv().await
    }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<(Topic, Vec<u8>)>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(?err, "collector accept failed");
                continue;
            }
        };
        debug!(%peer, "collector accepted pusher connection");
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut stream = stream;
            loop {
                match read_topic_frame(&mut stream).await {
                    Ok((topic, payload)) => {
                        if tx.send((Topic(topic), payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });
    }
}
