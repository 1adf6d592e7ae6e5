use moq_lite::{BroadcastConsumer, OriginConsumer, OriginProducer, Track};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::client::config::LinkDialerConfig;
use crate::client::connection::LinkConnection;
use crate::connection::{DecodedInbound, FrameInbound, FrameOutbound};
use crate::error::WireClientError;

const REPLY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Opens links from a participant to the broker.
pub struct LinkDialer {
    producer: Arc<OriginProducer>,
    consumer: OriginConsumer,
    config: LinkDialerConfig,
}

impl LinkDialer {
    pub fn new(
        producer: Arc<OriginProducer>,
        consumer: OriginConsumer,
        config: LinkDialerConfig,
    ) -> Self {
        Self {
            producer,
            consumer,
            config,
        }
    }

    /// Announce a link at `epoch` and wait for the broker to answer it.
    pub async fn dial(&self, epoch: u64) -> Result<LinkConnection, WireClientError> {
        let link = self.config.link_path(epoch);
        let client_path = self.config.client_path(&link);

        let mut broadcast = self.producer.create_broadcast(&client_path).ok_or_else(|| {
            WireClientError::BroadcastCreate(format!(
                "failed to create participant broadcast at '{client_path}'"
            ))
        })?;
        let outbound = FrameOutbound::new(broadcast.create_track(Track::new(&self.config.track_name)));

        let reply_path = self.config.reply_path(&link);
        debug!(client_path = %client_path, reply_path = %reply_path, "waiting for broker reply");

        let reply = tokio::time::timeout(self.config.timeout, self.await_reply(&reply_path)).await?;
        let inbound = DecodedInbound::new(FrameInbound::new(&reply, &self.config.track_name));

        info!(client_id = %self.config.client_id, epoch, "link established");

        Ok(LinkConnection::new(outbound, inbound, Arc::new(broadcast)))
    }

    async fn await_reply(&self, path: &str) -> BroadcastConsumer {
        loop {
            if let Some(broadcast) = self.consumer.consume_broadcast(path) {
                return broadcast;
            }
            tokio::time::sleep(REPLY_POLL_INTERVAL).await;
        }
    }
}
