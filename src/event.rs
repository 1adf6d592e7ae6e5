//! Inbound and outbound real-time events, independent of the wire encoding.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::ids::{ConnectionId, ParticipantId, RoomId, SessionId, StreamId};

/// Minor currency units (cents).
pub type Cents = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Requester,
    Provider,
}

/// One end of a 1:1 session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Requester,
    Provider,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

/// A negotiation message. The payload is never inspected.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub kind: SignalKind,
    pub payload: Bytes,
}

impl Signal {
    pub fn new(kind: SignalKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }
}

/// Why a session ended. The string form is stable and machine-readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndReason {
    EndedByUser,
    InsufficientBalance,
    DisconnectedTimeout,
    BillingFailed,
    Shutdown,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::EndedByUser => "ended_by_user",
            EndReason::InsufficientBalance => "insufficient_balance",
            EndReason::DisconnectedTimeout => "disconnected_timeout",
            EndReason::BillingFailed => "billing_failed",
            EndReason::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastSummary {
    pub stream_id: StreamId,
    pub provider_id: ParticipantId,
    pub title: String,
    pub viewer_count: usize,
}

/// Events a participant sends to the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Register {
        participant: ParticipantId,
        role: Role,
    },
    RequestSession {
        provider: ParticipantId,
    },
    AcceptSession {
        session: SessionId,
    },
    Signal {
        session: SessionId,
        signal: Signal,
    },
    Connectivity {
        session: SessionId,
        connected: bool,
    },
    Chat {
        session: SessionId,
        text: String,
    },
    EndSession {
        session: SessionId,
    },
    StartBroadcast {
        title: String,
    },
    ListBroadcasts,
    JoinBroadcast {
        stream: StreamId,
    },
    LeaveBroadcast,
    /// From a viewer when `to` is empty; from the broadcaster to the tagged
    /// viewer otherwise.
    LiveSignal {
        stream: StreamId,
        signal: Signal,
        to: Option<ConnectionId>,
    },
    Gift {
        stream: StreamId,
        amount_cents: Cents,
    },
    LiveChat {
        stream: StreamId,
        text: String,
    },
    EndBroadcast {
        stream: StreamId,
    },
}

/// Events the broker sends to a participant.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Registered {
        participant: ParticipantId,
    },
    SessionRequested {
        session: SessionId,
        rate_cents: Cents,
    },
    NewSessionRequest {
        session: SessionId,
        requester: ParticipantId,
    },
    SessionAccepted {
        session: SessionId,
        room: RoomId,
    },
    Signal {
        session: SessionId,
        signal: Signal,
    },
    UsageTick {
        session: SessionId,
        interval_index: u64,
        charged_cents: Cents,
        total_cents: Cents,
    },
    SessionEnded {
        session: SessionId,
        reason: EndReason,
    },
    ChatMessage {
        session: SessionId,
        sender: ParticipantId,
        text: String,
        at_ms: u64,
    },
    BroadcastStarted {
        stream: StreamId,
    },
    BroadcastList {
        streams: Vec<BroadcastSummary>,
    },
    ViewerCount {
        stream: StreamId,
        count: usize,
    },
    ViewerJoined {
        stream: StreamId,
        viewer_tag: ConnectionId,
        viewer: ParticipantId,
    },
    LiveSignal {
        stream: StreamId,
        signal: Signal,
        viewer_tag: Option<ConnectionId>,
    },
    GiftReceived {
        stream: StreamId,
        payer: ParticipantId,
        amount_cents: Cents,
    },
    LiveChat {
        stream: StreamId,
        sender: ParticipantId,
        text: String,
        at_ms: u64,
    },
    BroadcastEnded {
        stream: StreamId,
    },
    Error {
        code: &'static str,
        message: String,
    },
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
