// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Broker-side snapshot/liveness socket: binds the snapshot port, reads
//! each connecting worker's process identity off the wire, and lets the
//! broker address replies back to a specific identity (spec.md §4.5's
//! "router" role, minus the automatic identity-prefixing a real router
//! socket does on receipt — here the worker sends its identity once, up
//! front, instead).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::framing::{encode_part, read_part};
use crate::outbox::Outbox;
use crate::NetError;

const INBOX_CAPACITY: usize = 256;

/// Bound snapshot port with a live registry of worker identities.
pub struct SnapshotServer {
    rx: mpsc::Receiver<(String, Vec<u8>)>,
    peers: Arc<Mutex<HashMap<String, Outbox>>>,
}

impl SnapshotServer {
    /// Bind `addr` and start accepting worker connections in the
    /// background.
    ///
    /// # Errors
    /// Returns [`NetError::Io`] if the bind fails.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, NetError> {
        let listener = TcpListener::bind(addr).await?;
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let peers = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(accept_loop(listener, tx, peers.clone()));
        Ok(Self { rx, peers })
    }

    /// Receive the next `(identity, payload)` request.
    pub async fn recv(&mut self) -> Option<(String, Vec<u8>)> {
        self.rx.recv().await
    }

    /// Send `payload` to the worker known by `identity`.
    ///
    /// # Errors
    /// Returns [`NetError::Closed`] if that identity has no live
    /// connection (it disconnected, or never connected).
    pub async fn reply(&self, identity: &str, payload: &[u8]) -> Result<(), NetError> {
        let frame = encode_part(payload)?;
        let peers = self.peers.lock().await;
        let outbox = peers.get(identity).ok_or(NetError::Closed)?;
        outbox.send(frame).await
    }
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<(String, Vec<u8>)>,
    peers: Arc<Mutex<HashMap<String, Outbox>>>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(?err, "snapshot server accept failed");
                continue;
            }
        };
        let tx = tx.clone();
        let peers = peers.clone();
        tokio::spawn(async move {
            let (mut reader, writer) = stream.into_split();
            let identity = match read_part(&mut reader).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(_) => return,
            };
            debug!(%addr, %identity, "snapshot server accepted connection");
            let outbox = Outbox::spawn(writer);
            peers.lock().await.insert(identity.clone(), outbox);

            loop {
                match read_part(&mut reader).await {
                    Ok(payload) => {
                        if tx.send((identity.clone(), payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            peers.lock().await.remove(&identity);
        });
    }
}
