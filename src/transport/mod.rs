//! MoQ binding for the gateway.
//!
//! Participants announce `participant/{id}/{epoch}` on the relay; each
//! announcement becomes one gateway connection answered on
//! `broker/{id}/{epoch}`.

mod codec;
mod link;

use std::sync::Arc;

use anyhow::Result;
use moq_lite::{Client, Origin, OriginConsumer, OriginProducer, Session};
use rtc_wire::WireServerError;
use rtc_wire::server::{LinkListener, LinkListenerConfig};
use url::Url;
use web_transport_quinn::ClientBuilder;

use crate::gateway::Gateway;

pub use codec::CodecError;
pub use link::GatewayLinks;

/// Connect to the relay as a publisher and subscriber.
/// Returns the session handle and the origin producer/consumer pair.
pub async fn connect_bidirectional(
    relay_url: &str,
) -> Result<(Session, OriginProducer, OriginConsumer)> {
    let pub_origin = Origin::produce();
    let sub_origin = Origin::produce();

    let wt_client = ClientBuilder::new()
        .dangerous()
        .with_no_certificate_verification()?;
    let wt_session = wt_client.connect(relay_url.parse::<Url>()?).await?;

    let client = Client::new()
        .with_publish(pub_origin.consumer)
        .with_consume(sub_origin.producer);
    let session = client.connect(wt_session).await?;

    Ok((session, pub_origin.producer, sub_origin.consumer))
}

/// Serve participant links until the relay stops announcing.
pub async fn serve(
    gateway: Gateway,
    producer: OriginProducer,
    consumer: OriginConsumer,
    config: LinkListenerConfig,
) -> Result<(), WireServerError> {
    LinkListener::new(consumer, Arc::new(producer), config)
        .run(GatewayLinks::new(gateway))
        .await
}
