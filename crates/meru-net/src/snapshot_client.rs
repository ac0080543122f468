// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Worker-side snapshot/liveness socket: connects to the broker's snapshot
//! port, announces the worker's process identity, and exchanges
//! request/reply frames (`RequireState`/`StateUpdate`, `Ping`/`Pong`).

use std::time::Duration;

use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::net::tcp::OwnedReadHalf;
use tokio::time::timeout;

use crate::framing::{encode_part, read_part};
use crate::outbox::Outbox;
use crate::NetError;

/// Connected snapshot client, identified to the broker by `identity`.
pub struct SnapshotClient {
    reader: OwnedReadHalf,
    outbox: Outbox,
    receive_timeout: Duration,
}

impl SnapshotClient {
    /// Connect to `addr`, announce `identity`, and configure the bounded
    /// receive timeout every [`SnapshotClient::recv`] call enforces.
    ///
    /// # Errors
    /// Returns [`NetError::Io`] if the connection or handshake write fails.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        identity: &str,
        receive_timeout: Duration,
    ) -> Result<Self, NetError> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        let outbox = Outbox::spawn(writer);
        outbox.send(encode_part(identity.as_bytes())?).await?;
        Ok(Self {
            reader,
            outbox,
            receive_timeout,
        })
    }

    /// Send a request frame without waiting for a reply (used to emit a
    /// liveness `Ping` independently of [`SnapshotClient::recv`]).
    ///
    /// # Errors
    /// Returns [`NetError::Closed`] if the connection has died.
    pub async fn send(&self, payload: &[u8]) -> Result<(), NetError> {
        self.outbox.send(encode_part(payload)?).await
    }

    /// Receive the next reply frame, bounded by the configured receive
    /// timeout.
    ///
    /// # Errors
    /// Returns [`NetError::Timeout`] if no frame arrives in time, or
    /// [`NetError::Io`] if the connection breaks.
    pub async fn recv(&mut self) -> Result<Vec<u8>, NetError> {
        timeout(self.receive_timeout, read_part(&mut self.reader))
            .await
            .map_err(|_| NetError::Timeout)?
    }

    /// Send `payload` and await exactly one reply within the configured
    /// timeout — the common request/reply shape for `RequireState` and
    /// `Ping`.
    ///
    /// # Errors
    /// Same as [`SnapshotClient::send`] and [`SnapshotClient::recv`].
    pub async fn request(&mut self, payload: &[u8]) -> Result<Vec<u8>, NetError> {
        self.send(payload).await?;
        self.recv().await
    }
}
