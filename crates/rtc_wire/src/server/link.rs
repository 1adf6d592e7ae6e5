use moq_lite::BroadcastProducer;

use crate::connection::{DecodedInbound, FrameOutbound};
use crate::path::LinkPath;
use crate::proto::ClientFrame;
use crate::server::guard::LinkGuard;

/// Receives every newly attached participant link.
///
/// Implementations typically spawn one task reading `inbound` and one task
/// writing to `outbound`, holding the [`LinkKeepAlive`] for as long as the
/// link should stay open.
pub trait LinkHandler: Send + Sync + 'static {
    fn on_link(&self, link: Link);
}

/// A freshly attached participant link.
pub struct Link {
    pub path: LinkPath,
    pub inbound: DecodedInbound<ClientFrame>,
    pub outbound: FrameOutbound,
    pub keep_alive: LinkKeepAlive,
}

impl Link {
    pub fn into_parts(self) -> (DecodedInbound<ClientFrame>, FrameOutbound, LinkKeepAlive) {
        (self.inbound, self.outbound, self.keep_alive)
    }
}

// Dropping this detaches the link and closes the reply broadcast.
pub struct LinkKeepAlive {
    pub(crate) guard: LinkGuard,
    pub(crate) _reply_broadcast: BroadcastProducer,
}

impl LinkKeepAlive {
    pub fn path(&self) -> &LinkPath {
        self.guard.path()
    }
}
