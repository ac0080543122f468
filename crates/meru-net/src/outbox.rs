// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Non-lingering send path shared by every connection-owning socket role.
//!
//! Each connection gets a bounded channel and a writer task that drains it.
//! Shutdown is just dropping the [`Outbox`]: the channel closes, the writer
//! task's next `recv()` returns `None` and it exits, and nothing waits for
//! in-flight bytes to reach the peer. This gives the "abrupt termination
//! must not block on pending sends" behavior (spec.md §4.5) without a
//! platform-specific `SO_LINGER` knob.

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::NetError;

const OUTBOX_CAPACITY: usize = 256;

/// A connection's outgoing half: a bounded queue plus the task draining it.
///
/// Callers hand already-framed bytes to [`Outbox::send`] (built with
/// [`crate::framing::encode_part`] / [`crate::framing::encode_topic_frame`]);
/// the writer task just forwards them to the socket unmodified.
pub struct Outbox {
    tx: mpsc::Sender<Vec<u8>>,
    writer_task: JoinHandle<()>,
}

impl Outbox {
    /// Spawn a writer task over `writer` that writes whatever is pushed
    /// onto the returned [`Outbox`], in order.
    pub fn spawn(mut writer: OwnedWriteHalf) -> Self {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(OUTBOX_CAPACITY);
        let writer_task = tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if writer.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });
        Self { tx, writer_task }
    }

    /// Queue already-framed `bytes` for sending. Drops silently if the
    /// writer task has already exited (peer gone) — callers never block on
    /// a dead peer.
    ///
    /// # Errors
    /// Returns [`NetError::Closed`] if the outbox has already been closed.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<(), NetError> {
        self.tx.send(bytes).await.map_err(|_| NetError::Closed)
    }
}

impl Drop for Outbox {
    fn drop(&mut self) {
        self.writer_task.abort();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accept_result, connect_result) = tokio::join!(listener.accept(), connect);
        (accept_result.unwrap().0, connect_result.unwrap())
    }

    #[tokio::test]
    async fn queued_bytes_reach_the_peer() {
        let (server, client) = pair().await;
        let (_r, w) = server.into_split();
        let outbox = Outbox::spawn(w);
        outbox
            .send(crate::framing::encode_part(b"hello").unwrap())
            .await
            .unwrap();

        let mut client = client;
        let received = crate::framing::read_part(&mut client).await.unwrap();
        assert_eq!(received, b"hello");
        drop(outbox);
    }
}
