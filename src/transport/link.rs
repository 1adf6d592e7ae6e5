use futures::StreamExt;
use rtc_wire::WireError;
use rtc_wire::proto::ServerFrame;
use rtc_wire::server::{Link, LinkHandler};
use tracing::{debug, info, warn};

use crate::event::{ClientEvent, ServerEvent};
use crate::gateway::Gateway;

/// Binds each attached participant link to a gateway connection.
///
/// One task drains the connection's outbound queue onto the reply track;
/// the other feeds decoded frames to the gateway in arrival order. When the
/// participant's track ends the connection is closed, which the
/// coordinators treat as a disconnect.
pub struct GatewayLinks {
    gateway: Gateway,
}

impl GatewayLinks {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }
}

impl LinkHandler for GatewayLinks {
    fn on_link(&self, link: Link) {
        let gateway = self.gateway.clone();
        tokio::spawn(serve_link(gateway, link));
    }
}

async fn serve_link(gateway: Gateway, link: Link) {
    let path = link.path.clone();
    let (mut inbound, mut outbound, keep_alive) = link.into_parts();
    let (connection, mut events) = gateway.open_connection();

    info!(client_id = %path.client_id, epoch = path.epoch, connection = %connection.id(), "participant link open");

    let writer = tokio::spawn(async move {
        // the reply broadcast stays announced until the queue closes
        let _keep_alive = keep_alive;
        while let Some(event) = events.recv().await {
            if let Err(e) = outbound.send(&ServerFrame::from(&event)) {
                warn!(error = %e, "failed to encode outbound frame");
            }
        }
    });

    while let Some(item) = inbound.next().await {
        match item {
            Ok(frame) => match ClientEvent::try_from(frame) {
                Ok(event) => gateway.handle(&connection, event).await,
                Err(e) => {
                    debug!(client_id = %path.client_id, error = %e, "malformed frame");
                    connection.send(ServerEvent::Error {
                        code: e.code(),
                        message: e.to_string(),
                    });
                }
            },
            Err(WireError::Decode(e)) => {
                warn!(client_id = %path.client_id, error = %e, "undecodable frame skipped");
            }
            Err(e) => {
                warn!(client_id = %path.client_id, error = %e, "participant link failed");
                break;
            }
        }
    }

    gateway.close_connection(&connection).await;
    drop(connection);

    if let Err(e) = writer.await {
        warn!(client_id = %path.client_id, error = %e, "link writer task failed");
    }
    info!(client_id = %path.client_id, epoch = path.epoch, "participant link closed");
}
