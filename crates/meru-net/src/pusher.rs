// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Worker-side fan-in socket: connects to the broker's ingress port and
//! pushes `(topic, payload)` frames.

use meru_proto::Topic;
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::framing::encode_topic_frame;
use crate::outbox::Outbox;
use crate::NetError;

/// Connected pusher. Sends queue onto a bounded outbox so a slow or dead
/// broker never blocks the caller (spec.md §4.5 non-linger requirement).
pub struct Pusher {
    outbox: Outbox,
}

impl Pusher {
    /// Connect to `addr`.
    ///
    /// # Errors
    /// Returns [`NetError::Io`] if the connection fails.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, NetError> {
        let stream = TcpStream::connect(addr).await?;
        let (_reader, writer) = stream.into_split();
        Ok(Self {
            outbox: Outbox::spawn(writer),
        })
    }

    /// Queue `(topic, payload)` for sending.
    ///
    /// # Errors
    /// Returns [`NetError::FrameTooLarge`] if the frame is oversized, or
    /// [`NetError::Closed`] if the connection has already died.
    pub async fn send(&self, topic: &Topic, payload: &[u8]) -> Result<(), NetError> {
        let frame = encode_topic_frame(&topic.0, payload)?;
        self.outbox.send(frame).await
    }
}
