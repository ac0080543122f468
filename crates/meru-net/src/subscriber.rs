// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Worker-side fan-out socket: connects to the broker's egress port and
//! announces a set of topic-prefix filters.

use meru_proto::Topic;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::net::tcp::OwnedReadHalf;

use crate::framing::{encode_part, read_topic_frame};
use crate::NetError;

/// Connected subscriber: reads every `(topic, payload)` frame the broker
/// forwards that matches the filters given at connect time.
pub struct Subscriber {
    reader: OwnedReadHalf,
}

impl Subscriber {
    /// Connect to `addr` and announce `filters` (empty means "every topic").
    ///
    /// # Errors
    /// Returns [`NetError::Io`] if the connection or handshake write fails.
    pub async fn connect(addr: impl ToSocketAddrs, filters: &[Topic]) -> Result<Self, NetError> {
        use tokio::io::AsyncWriteExt;
        let stream = TcpStream::connect(addr).await?;
        let (reader, mut writer) = stream.into_split();
        let handshake = encode_filters(filters);
        writer.write_all(&encode_part(&handshake)?).await?;
        writer.shutdown().await.ok();
        Ok(Self { reader })
    }

    /// Receive the next matching `(topic, payload)` frame.
    ///
    /// # Errors
    /// Returns [`NetError::Io`] if the connection breaks.
    pub async fn recv(&mut self) -> Result<(Topic, Vec<u8>), NetError> {
        let (topic, payload) = read_topic_frame(&mut self.reader).await?;
        Ok((Topic(topic), payload))
    }
}

fn encode_filters(filters: &[Topic]) -> Vec<u8> {
    let mut out = Vec::new();
    for filter in filters {
        out.extend_from_slice(&filter.0);
        out.push(b'\n');
    }
    out
}
