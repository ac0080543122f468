// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Broker-side fan-out socket: binds the egress port and accepts
//! subscriber connections, each announcing its topic-prefix filters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use meru_proto::Topic;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::framing::{encode_topic_frame, read_part, read_topic_frame};
use crate::outbox::Outbox;
use crate::NetError;

struct Subscription {
    filters: Vec<Topic>,
    outbox: Outbox,
}

impl Subscription {
    fn wants(&self, topic: &Topic) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|f| f.is_prefix_of(topic))
    }
}

/// Bound egress port with a live registry of subscriber connections.
///
/// `Publisher` is always used behind an `Arc` since the accept loop and
/// the publishing caller both need to reach the same subscription
/// registry concurrently.
pub struct Publisher {
    subs: Mutex<HashMap<u64, Subscription>>,
    next_id: AtomicU64,
}

impl Publisher {
    /// Bind `addr` and start accepting subscriber connections in the
    /// background.
    ///
    /// # Errors
    /// Returns [`NetError::Io`] if the bind fails.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Arc<Self>, NetError> {
        let listener = TcpListener::bind(addr).await?;
        let publisher = Arc::new(Self {
            subs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        });
        tokio::spawn(accept_loop(listener, publisher.clone()));
        Ok(publisher)
    }

    /// Broadcast `(topic, payload)` to every currently registered
    /// subscriber whose filter set matches `topic`.
    ///
    /// # Errors
    /// Returns [`NetError::FrameTooLarge`] if the frame can't be built;
    /// individual dead subscriber sends are dropped silently rather than
    /// failing the whole broadcast (relay must not stall on one slow peer).
    pub async fn publish(&self, topic: &Topic, payload: &[u8]) -> Result<(), NetError> {
        let frame = encode_topic_frame(&topic.0, payload)?;
        let subs = self.subs.lock().await;
        for sub in subs.values() {
            if sub.wants(topic) {
                let _ = sub.outbox.send(frame.clone()).await;
            }
        }
        Ok(())
    }

    async fn register(&self, id: u64, filters: Vec<Topic>, outbox: Outbox) {
        self.subs.lock().await.insert(id, Subscription { filters, outbox });
    }

    async fn deregister(&self, id: u64) {
        self.subs.lock().await.remove(&id);
    }
}

async fn accept_loop(listener: TcpListener, publisher: Arc<Publisher>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(?err, "publisher accept failed");
                continue;
            }
        };
        debug!(%peer, "publisher accepted subscriber connection");
        let publisher = publisher.clone();
        tokio::spawn(async move {
            let (mut reader, writer) = stream.into_split();
            let filters = match read_part(&mut reader).await {
                Ok(bytes) => decode_filters(&bytes),
                Err(_) => return,
            };
            let id = publisher.next_id.fetch_add(1, Ordering::Relaxed);
            let outbox = Outbox::spawn(writer);
            publisher.register(id, filters, outbox).await;

            // Subscriber connections are fan-out only; keep reading (and
            // discarding) so a closed/reset connection is detected promptly.
            let mut discard = [0u8; 64];
            use tokio::io::AsyncReadExt;
            loop {
                match reader.read(&mut discard).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            publisher.deregister(id).await;
        });
    }
}

/// Subscriber filter handshake: newline-joined list of UTF-8 topic
/// strings, empty meaning "no filters, receive everything".
fn decode_filters(bytes: &[u8]) -> Vec<Topic> {
    let text = String::from_utf8_lossy(bytes);
    text.lines().filter(|l| !l.is_empty()).map(Topic::new).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_filters_splits_on_newline() {
        let filters = decode_filters(b"state\nFooChanged");
        assert_eq!(filters, vec![Topic::new("state"), Topic::new("FooChanged")]);
    }

    #[test]
    fn empty_bytes_decode_to_no_filters() {
        assert!(decode_filters(b"").is_empty());
    }
}
