use futures::Stream;
use moq_lite::BroadcastProducer;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::connection::{DecodedInbound, FrameOutbound};
use crate::error::{WireError, WireSendError};
use crate::proto::{ClientFrame, ServerFrame};

/// A participant's link to the broker.
///
/// Sends `ClientFrame`s and yields `ServerFrame`s. Can be split into
/// `LinkSender` and `LinkReceiver` halves for concurrent use.
pub struct LinkConnection {
    sender: LinkSender,
    receiver: LinkReceiver,
}

impl LinkConnection {
    pub(crate) fn new(
        outbound: FrameOutbound,
        inbound: DecodedInbound<ServerFrame>,
        broadcast: Arc<BroadcastProducer>,
    ) -> Self {
        Self {
            sender: LinkSender {
                outbound,
                _broadcast: Arc::clone(&broadcast),
            },
            receiver: LinkReceiver {
                inbound,
                _broadcast: broadcast,
            },
        }
    }

    pub fn send(&mut self, frame: &ClientFrame) -> Result<(), WireSendError> {
        self.sender.send(frame)
    }

    /// Split the link into separate send and receive halves.
    ///
    /// Both halves share ownership of the participant broadcast, so the link
    /// stays announced as long as either half is alive.
    pub fn split(self) -> (LinkSender, LinkReceiver) {
        (self.sender, self.receiver)
    }
}

impl Stream for LinkConnection {
    type Item = Result<ServerFrame, WireError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

/// The send half of a `LinkConnection`.
pub struct LinkSender {
    outbound: FrameOutbound,
    // Keeps the broadcast alive; shared with LinkReceiver when split
    _broadcast: Arc<BroadcastProducer>,
}

impl LinkSender {
    pub fn send(&mut self, frame: &ClientFrame) -> Result<(), WireSendError> {
        self.outbound.send(frame)
    }
}

/// The receive half of a `LinkConnection`.
pub struct LinkReceiver {
    inbound: DecodedInbound<ServerFrame>,
    // Keeps the broadcast alive; shared with LinkSender when split
    _broadcast: Arc<BroadcastProducer>,
}

impl Stream for LinkReceiver {
    type Item = Result<ServerFrame, WireError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inbound).poll_next(cx)
    }
}
