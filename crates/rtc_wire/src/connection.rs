//! Framing over a single MoQ track: one protobuf message per frame.

use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use async_stream::stream;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use moq_lite::{BroadcastConsumer, Track, TrackConsumer, TrackProducer};
use prost::Message;

use crate::error::{WireError, WireSendError};

/// Raw frames read from one track, group by group.
pub struct FrameInbound {
    frames: BoxStream<'static, Result<Bytes, WireError>>,
}

impl FrameInbound {
    pub fn new(broadcast: &BroadcastConsumer, track_name: &str) -> Self {
        Self::from_track(broadcast.subscribe_track(&Track::new(track_name)))
    }

    /// A transport error is yielded once and ends the stream.
    pub fn from_track(mut track: TrackConsumer) -> Self {
        let frames = stream! {
            loop {
                let mut group = match track.next_group().await {
                    Ok(Some(group)) => group,
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(WireError::Transport(e));
                        break;
                    }
                };
                while let Ok(Some(frame)) = group.read_frame().await {
                    yield Ok(frame);
                }
            }
        };
        Self {
            frames: frames.boxed(),
        }
    }
}

impl Stream for FrameInbound {
    type Item = Result<Bytes, WireError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.frames.poll_next_unpin(cx)
    }
}

/// Inbound frames decoded as `M`.
///
/// A frame that fails to decode is yielded as an error and reading goes on.
pub struct DecodedInbound<M> {
    frames: FrameInbound,
    _message: PhantomData<fn() -> M>,
}

impl<M> DecodedInbound<M> {
    pub fn new(frames: FrameInbound) -> Self {
        Self {
            frames,
            _message: PhantomData,
        }
    }
}

impl<M: Message + Default> Stream for DecodedInbound<M> {
    type Item = Result<M, WireError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let next = ready!(self.frames.poll_next_unpin(cx));
        Poll::Ready(next.map(|frame| frame.and_then(|bytes| Ok(M::decode(bytes)?))))
    }
}

/// Writes each message as its own frame on a track.
pub struct FrameOutbound {
    track: TrackProducer,
}

impl FrameOutbound {
    pub fn new(track: TrackProducer) -> Self {
        Self { track }
    }

    pub fn send<M: Message>(&mut self, msg: &M) -> Result<(), WireSendError> {
        let mut frame = Vec::with_capacity(msg.encoded_len());
        msg.encode(&mut frame)?;
        self.track.write_frame(Bytes::from(frame));
        Ok(())
    }
}
