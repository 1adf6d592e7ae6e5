//! Conversions between wire frames and broker events.

use rtc_wire::proto::{self, client_frame, server_frame};
use thiserror::Error;

use crate::event::{BroadcastSummary, ClientEvent, Role, ServerEvent, Signal, SignalKind};
use crate::ids::{ConnectionId, ParticipantId, SessionId, StreamId};

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    #[error("frame carries no event")]
    MissingEvent,

    #[error("unknown role {0}")]
    UnknownRole(i32),

    #[error("unknown signal kind {0}")]
    UnknownSignalKind(i32),

    #[error("field '{0}' must not be empty")]
    EmptyField(&'static str),
}

impl CodecError {
    pub fn code(&self) -> &'static str {
        "bad_frame"
    }
}

fn required(value: String, field: &'static str) -> Result<String, CodecError> {
    if value.is_empty() {
        Err(CodecError::EmptyField(field))
    } else {
        Ok(value)
    }
}

fn role_from_wire(raw: i32) -> Result<Role, CodecError> {
    match proto::Role::try_from(raw) {
        Ok(proto::Role::Requester) => Ok(Role::Requester),
        Ok(proto::Role::Provider) => Ok(Role::Provider),
        _ => Err(CodecError::UnknownRole(raw)),
    }
}

fn signal_kind_from_wire(raw: i32) -> Result<SignalKind, CodecError> {
    match proto::SignalKind::try_from(raw) {
        Ok(proto::SignalKind::Offer) => Ok(SignalKind::Offer),
        Ok(proto::SignalKind::Answer) => Ok(SignalKind::Answer),
        Ok(proto::SignalKind::IceCandidate) => Ok(SignalKind::IceCandidate),
        _ => Err(CodecError::UnknownSignalKind(raw)),
    }
}

fn signal_kind_to_wire(kind: SignalKind) -> proto::SignalKind {
    match kind {
        SignalKind::Offer => proto::SignalKind::Offer,
        SignalKind::Answer => proto::SignalKind::Answer,
        SignalKind::IceCandidate => proto::SignalKind::IceCandidate,
    }
}

fn signal_from_wire(signal: &proto::Signal) -> Result<Signal, CodecError> {
    Ok(Signal {
        kind: signal_kind_from_wire(signal.kind)?,
        payload: signal.payload.clone(),
    })
}

fn signal_to_wire(target: &str, signal: &Signal, viewer_tag: Option<&ConnectionId>) -> proto::Signal {
    proto::Signal {
        kind: signal_kind_to_wire(signal.kind) as i32,
        target_id: target.to_string(),
        payload: signal.payload.clone(),
        to: None,
        viewer_tag: viewer_tag.map(|tag| tag.to_string()),
    }
}

fn chat_to_wire(target: &str, sender: &ParticipantId, text: &str, at_ms: u64) -> proto::Chat {
    proto::Chat {
        target_id: target.to_string(),
        text: text.to_string(),
        sender: sender.to_string(),
        at_ms,
    }
}

fn stream_ref(stream: &StreamId) -> proto::StreamRef {
    proto::StreamRef {
        stream_id: stream.to_string(),
    }
}

impl TryFrom<proto::ClientFrame> for ClientEvent {
    type Error = CodecError;

    fn try_from(frame: proto::ClientFrame) -> Result<Self, Self::Error> {
        use client_frame::Event;

        let event = match frame.event.ok_or(CodecError::MissingEvent)? {
            Event::Register(register) => ClientEvent::Register {
                participant: required(register.participant_id, "participant_id")?.into(),
                role: role_from_wire(register.role)?,
            },
            Event::RequestSession(request) => ClientEvent::RequestSession {
                provider: required(request.provider_id, "provider_id")?.into(),
            },
            Event::AcceptSession(session) => ClientEvent::AcceptSession {
                session: required(session.session_id, "session_id")?.into(),
            },
            Event::Signal(signal) => ClientEvent::Signal {
                signal: signal_from_wire(&signal)?,
                session: SessionId::from(required(signal.target_id, "target_id")?),
            },
            Event::Connectivity(connectivity) => ClientEvent::Connectivity {
                session: required(connectivity.session_id, "session_id")?.into(),
                connected: connectivity.connected,
            },
            Event::Chat(chat) => ClientEvent::Chat {
                session: required(chat.target_id, "target_id")?.into(),
                text: chat.text,
            },
            Event::EndSession(session) => ClientEvent::EndSession {
                session: required(session.session_id, "session_id")?.into(),
            },
            Event::StartBroadcast(start) => ClientEvent::StartBroadcast { title: start.title },
            Event::ListBroadcasts(_) => ClientEvent::ListBroadcasts,
            Event::JoinBroadcast(stream) => ClientEvent::JoinBroadcast {
                stream: required(stream.stream_id, "stream_id")?.into(),
            },
            Event::LeaveBroadcast(_) => ClientEvent::LeaveBroadcast,
            Event::LiveSignal(signal) => ClientEvent::LiveSignal {
                signal: signal_from_wire(&signal)?,
                stream: StreamId::from(required(signal.target_id, "target_id")?),
                to: signal.to.filter(|to| !to.is_empty()).map(ConnectionId::from),
            },
            Event::Gift(gift) => ClientEvent::Gift {
                stream: required(gift.stream_id, "stream_id")?.into(),
                amount_cents: gift.amount_cents,
            },
            Event::LiveChat(chat) => ClientEvent::LiveChat {
                stream: required(chat.target_id, "target_id")?.into(),
                text: chat.text,
            },
            Event::EndBroadcast(stream) => ClientEvent::EndBroadcast {
                stream: required(stream.stream_id, "stream_id")?.into(),
            },
        };
        Ok(event)
    }
}

impl From<&ServerEvent> for proto::ServerFrame {
    fn from(event: &ServerEvent) -> Self {
        use server_frame::Event;

        let event = match event {
            ServerEvent::Registered { participant } => Event::Registered(proto::Registered {
                participant_id: participant.to_string(),
            }),
            ServerEvent::SessionRequested {
                session,
                rate_cents,
            } => Event::SessionRequested(proto::SessionRequested {
                session_id: session.to_string(),
                rate_cents: *rate_cents,
            }),
            ServerEvent::NewSessionRequest { session, requester } => {
                Event::NewSessionRequest(proto::NewSessionRequest {
                    session_id: session.to_string(),
                    requester_id: requester.to_string(),
                })
            }
            ServerEvent::SessionAccepted { session, room } => {
                Event::SessionAccepted(proto::SessionAccepted {
                    session_id: session.to_string(),
                    room_id: room.to_string(),
                })
            }
            ServerEvent::Signal { session, signal } => {
                Event::Signal(signal_to_wire(session.as_str(), signal, None))
            }
            ServerEvent::UsageTick {
                session,
                interval_index,
                charged_cents,
                total_cents,
            } => Event::UsageTick(proto::UsageTick {
                session_id: session.to_string(),
                interval_index: *interval_index,
                charged_cents: *charged_cents,
                total_cents: *total_cents,
            }),
            ServerEvent::SessionEnded { session, reason } => {
                Event::SessionEnded(proto::SessionEnded {
                    session_id: session.to_string(),
                    reason: reason.as_str().to_string(),
                })
            }
            ServerEvent::ChatMessage {
                session,
                sender,
                text,
                at_ms,
            } => Event::ChatMessage(chat_to_wire(session.as_str(), sender, text, *at_ms)),
            ServerEvent::BroadcastStarted { stream } => Event::BroadcastStarted(stream_ref(stream)),
            ServerEvent::BroadcastList { streams } => Event::BroadcastList(proto::BroadcastList {
                streams: streams.iter().map(summary_to_wire).collect(),
            }),
            ServerEvent::ViewerCount { stream, count } => {
                Event::ViewerCount(proto::ViewerCount {
                    stream_id: stream.to_string(),
                    count: *count as u64,
                })
            }
            ServerEvent::ViewerJoined {
                stream,
                viewer_tag,
                viewer,
            } => Event::ViewerJoined(proto::ViewerJoined {
                stream_id: stream.to_string(),
                viewer_tag: viewer_tag.to_string(),
                viewer_id: viewer.to_string(),
            }),
            ServerEvent::LiveSignal {
                stream,
                signal,
                viewer_tag,
            } => Event::LiveSignal(signal_to_wire(stream.as_str(), signal, viewer_tag.as_ref())),
            ServerEvent::GiftReceived {
                stream,
                payer,
                amount_cents,
            } => Event::GiftReceived(proto::Gift {
                stream_id: stream.to_string(),
                amount_cents: *amount_cents,
                payer_id: payer.to_string(),
            }),
            ServerEvent::LiveChat {
                stream,
                sender,
                text,
                at_ms,
            } => Event::LiveChat(chat_to_wire(stream.as_str(), sender, text, *at_ms)),
            ServerEvent::BroadcastEnded { stream } => Event::BroadcastEnded(stream_ref(stream)),
            ServerEvent::Error { code, message } => Event::Error(proto::ErrorNotice {
                code: code.to_string(),
                message: message.clone(),
            }),
        };

        proto::ServerFrame { event: Some(event) }
    }
}

fn summary_to_wire(summary: &BroadcastSummary) -> proto::BroadcastSummary {
    proto::BroadcastSummary {
        stream_id: summary.stream_id.to_string(),
        provider_id: summary.provider_id.to_string(),
        title: summary.title.clone(),
        viewer_count: summary.viewer_count as u64,
    }
}
