use moq_lite::{BroadcastConsumer, OriginConsumer, OriginProducer, Track};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connection::{DecodedInbound, FrameInbound, FrameOutbound};
use crate::error::WireServerError;
use crate::path::LinkPath;
use crate::server::config::LinkListenerConfig;
use crate::server::guard::LinkMap;
use crate::server::link::{Link, LinkHandler, LinkKeepAlive};

/// Watches participant announcements and hands each new link to a handler.
pub struct LinkListener {
    consumer: OriginConsumer,
    producer: Arc<OriginProducer>,
    links: Arc<LinkMap>,
    config: LinkListenerConfig,
}

impl LinkListener {
    pub fn new(
        consumer: OriginConsumer,
        producer: Arc<OriginProducer>,
        config: LinkListenerConfig,
    ) -> Self {
        Self {
            consumer,
            producer,
            links: Arc::new(LinkMap::new()),
            config,
        }
    }

    /// Run the listener until the announcement stream closes.
    ///
    /// Link tasks spawned by the handler keep running independently.
    pub async fn run<H: LinkHandler>(self, handler: H) -> Result<(), WireServerError> {
        let producer = self.producer;
        let links = self.links;
        let config = self.config;

        let mut announcements = match &config.client_prefix {
            Some(prefix) => self.consumer.with_root(prefix).ok_or_else(|| {
                WireServerError::Unauthorized(format!("prefix '{prefix}' not authorized"))
            })?,
            None => self.consumer,
        };

        info!(prefix = ?config.client_prefix, "link listener started");

        loop {
            match announcements.announced().await {
                Some((path, Some(broadcast))) => {
                    let path_str = path.to_string();
                    debug!(path = %path_str, "participant announced");

                    if let Err(e) =
                        Self::attach(&producer, &links, &config, &path_str, broadcast, &handler)
                    {
                        warn!(path = %path_str, error = %e, "failed to attach link");
                    }
                }

                Some((path, None)) => {
                    // the handler sees its inbound stream end; the guard detaches on drop
                    debug!(path = %path.to_string(), "participant unannounced");
                }

                None => {
                    info!("announcement stream closed, link listener shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    fn attach<H: LinkHandler>(
        producer: &Arc<OriginProducer>,
        links: &Arc<LinkMap>,
        config: &LinkListenerConfig,
        path: &str,
        broadcast: BroadcastConsumer,
        handler: &H,
    ) -> Result<(), WireServerError> {
        let link_path = LinkPath::parse(path)?;
        let guard = links.try_attach(link_path.clone())?;

        let reply_path = config.reply_path(&link_path);
        let mut reply_broadcast = producer.create_broadcast(&reply_path).ok_or_else(|| {
            WireServerError::BroadcastCreate(format!(
                "failed to create reply broadcast at '{reply_path}'"
            ))
        })?;

        let outbound = FrameOutbound::new(reply_broadcast.create_track(Track::new(&config.track_name)));
        let inbound = DecodedInbound::new(FrameInbound::new(&broadcast, &config.track_name));

        info!(
            client_id = %link_path.client_id,
            epoch = link_path.epoch,
            reply_path = %reply_path,
            "link attached"
        );

        handler.on_link(Link {
            path: link_path,
            inbound,
            outbound,
            keep_alive: LinkKeepAlive {
                guard,
                _reply_broadcast: reply_broadcast,
            },
        });

        Ok(())
    }
}
