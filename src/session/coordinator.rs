use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::collaborators::{
    ChatRecord, Collaborators, FinalSessionRecord, Ledger, ProviderDirectory, RecordStore,
    SessionRecord,
};
use crate::error::BrokerError;
use crate::event::{Cents, EndReason, ServerEvent, Side, Signal, unix_millis};
use crate::ids::{ParticipantId, RoomId, SessionId};
use crate::relay::SignalRelay;
use crate::session::actor::{SessionActor, SessionCommand};
use crate::session::billing::BillingClock;
use crate::session::monitor::DisconnectMonitor;
use crate::session::state::{Session, SessionSummary};
use crate::session::table::{LiveSession, LiveSessions};
use crate::settlement::Settlement;

const COMMAND_QUEUE_DEPTH: usize = 32;

/// What the requester is told after a successful request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionQuote {
    pub session: SessionId,
    pub rate_cents: Cents,
}

/// Owns the 1:1 session state machine.
///
/// Requested sessions wait in a pending table. Accepted sessions are each
/// owned by a spawned actor task; this handle only routes commands to it.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    relay: Arc<SignalRelay>,
    ledger: Arc<dyn Ledger>,
    records: Arc<dyn RecordStore>,
    providers: Arc<dyn ProviderDirectory>,
    settlement: Arc<Settlement>,
    billing_interval: Duration,
    disconnect_grace: Duration,
    pending: DashMap<SessionId, Session, ahash::RandomState>,
    live: Arc<LiveSessions>,
}

impl SessionCoordinator {
    pub fn new(
        relay: Arc<SignalRelay>,
        collaborators: &Collaborators,
        settlement: Arc<Settlement>,
        billing_interval: Duration,
        disconnect_grace: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                relay,
                ledger: collaborators.ledger.clone(),
                records: collaborators.records.clone(),
                providers: collaborators.providers.clone(),
                settlement,
                billing_interval,
                disconnect_grace,
                pending: DashMap::default(),
                live: Arc::new(LiveSessions::new()),
            }),
        }
    }

    /// Create a `requested` session and notify the provider.
    pub async fn request_session(
        &self,
        requester: &ParticipantId,
        provider: &ParticipantId,
    ) -> Result<SessionQuote, BrokerError> {
        let profile = self
            .inner
            .providers
            .find_eligible_provider(provider)
            .await?
            .ok_or_else(|| BrokerError::ProviderNotFound(provider.clone()))?;

        let session_id = SessionId::generate();
        let session = Session::requested(
            session_id.clone(),
            requester.clone(),
            profile.id.clone(),
            profile.rate_cents,
        );

        self.inner
            .records
            .create_session_record(&SessionRecord {
                session_id: session_id.clone(),
                requester_id: requester.clone(),
                provider_id: profile.id.clone(),
                rate_cents: profile.rate_cents,
            })
            .await?;

        self.inner.pending.insert(session_id.clone(), session);
        self.inner.relay.send_to(
            &profile.id,
            ServerEvent::NewSessionRequest {
                session: session_id.clone(),
                requester: requester.clone(),
            },
        );

        info!(
            session_id = %session_id,
            requester = %requester,
            provider = %profile.id,
            rate = profile.rate_cents,
            "session requested"
        );

        Ok(SessionQuote {
            session: session_id,
            rate_cents: profile.rate_cents,
        })
    }

    /// Accept a requested session, open its room and start its actor.
    ///
    /// Fails with `Forbidden` if the caller is not the session's provider or
    /// the session is no longer `requested`; nothing changes in that case.
    pub async fn accept_session(
        &self,
        provider: &ParticipantId,
        session_id: &SessionId,
    ) -> Result<RoomId, BrokerError> {
        let removed = self
            .inner
            .pending
            .remove_if(session_id, |_, session| &session.provider == provider);

        let mut session = match removed {
            Some((_, session)) => session,
            None if self.inner.pending.contains_key(session_id) => {
                return Err(BrokerError::Forbidden(format!(
                    "only the provider may accept session '{session_id}'"
                )));
            }
            None if self.inner.live.contains(session_id) => {
                return Err(BrokerError::Forbidden(format!(
                    "session '{session_id}' is not awaiting acceptance"
                )));
            }
            None => return Err(BrokerError::SessionNotFound(session_id.clone())),
        };

        let room = RoomId::generate();
        let started_at = unix_millis();
        session.accept(room.clone(), started_at);

        // no await until the session is reachable in the live table
        self.inner.relay.open_room(
            room.clone(),
            [session.requester.clone(), session.provider.clone()],
        );

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let guard = self.inner.live.try_insert(
            session_id.clone(),
            LiveSession::new(
                session.requester.clone(),
                session.provider.clone(),
                room.clone(),
                tx,
            ),
        )?;

        let requester = session.requester.clone();
        let actor = SessionActor {
            session,
            clock: BillingClock::new(self.inner.billing_interval),
            monitor: DisconnectMonitor::new(self.inner.disconnect_grace),
            commands: rx,
            guard: Some(guard),
            relay: self.inner.relay.clone(),
            ledger: self.inner.ledger.clone(),
            records: self.inner.records.clone(),
            settlement: self.inner.settlement.clone(),
        };
        tokio::spawn(actor.run());

        self.inner.relay.fan_out(
            &room,
            ServerEvent::SessionAccepted {
                session: session_id.clone(),
                room: room.clone(),
            },
        );

        info!(
            session_id = %session_id,
            requester = %requester,
            provider = %provider,
            room = %room,
            "session accepted"
        );
        Ok(room)
    }

    /// Which side of a live session the participant is on.
    pub fn side_of(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
    ) -> Result<Side, BrokerError> {
        let live = self
            .inner
            .live
            .get(session_id)
            .ok_or_else(|| BrokerError::SessionNotFound(session_id.clone()))?;
        live.side_of(participant).ok_or_else(|| {
            BrokerError::Forbidden(format!("not a participant of session '{session_id}'"))
        })
    }

    /// Update one side's connectivity flag.
    pub async fn report_connectivity(
        &self,
        session_id: &SessionId,
        side: Side,
        connected: bool,
    ) -> Result<(), BrokerError> {
        let live = self
            .inner
            .live
            .get(session_id)
            .ok_or_else(|| BrokerError::SessionNotFound(session_id.clone()))?;
        if live.is_closing() {
            return Err(BrokerError::AlreadyTerminated(session_id.clone()));
        }

        live.commands
            .send(SessionCommand::Connectivity { side, connected })
            .await
            .map_err(|_| BrokerError::AlreadyTerminated(session_id.clone()))
    }

    /// Connectivity report on behalf of a participant; the side is derived
    /// from their identity.
    pub async fn report_connectivity_by(
        &self,
        participant: &ParticipantId,
        session_id: &SessionId,
        connected: bool,
    ) -> Result<(), BrokerError> {
        let side = self.side_of(session_id, participant)?;
        self.report_connectivity(session_id, side, connected).await
    }

    /// Terminate a session. Only the first call has effect; later calls
    /// return `AlreadyTerminated` while the session is finalizing, or
    /// `SessionNotFound` once it is gone.
    pub async fn end_session(
        &self,
        session_id: &SessionId,
        reason: EndReason,
    ) -> Result<SessionSummary, BrokerError> {
        if let Some((_, pending)) = self.inner.pending.remove(session_id) {
            return Ok(self.cancel_pending(pending, reason).await);
        }

        let live = self
            .inner
            .live
            .get(session_id)
            .ok_or_else(|| BrokerError::SessionNotFound(session_id.clone()))?;
        if !live.begin_closing() {
            debug!(session_id = %session_id, "duplicate end ignored");
            return Err(BrokerError::AlreadyTerminated(session_id.clone()));
        }

        let (done, finished) = oneshot::channel();
        live.commands
            .send(SessionCommand::End { reason, done })
            .await
            .map_err(|_| BrokerError::AlreadyTerminated(session_id.clone()))?;
        drop(live);

        finished
            .await
            .map_err(|_| BrokerError::AlreadyTerminated(session_id.clone()))
    }

    /// End a session at a participant's request.
    pub async fn end_session_by(
        &self,
        participant: &ParticipantId,
        session_id: &SessionId,
    ) -> Result<SessionSummary, BrokerError> {
        let is_party = match self.inner.pending.get(session_id) {
            Some(pending) => pending.side_of(participant).is_some(),
            None => self.side_of(session_id, participant).is_ok(),
        };
        if !is_party {
            if !self.inner.pending.contains_key(session_id) && !self.inner.live.contains(session_id) {
                return Err(BrokerError::SessionNotFound(session_id.clone()));
            }
            return Err(BrokerError::Forbidden(format!(
                "not a participant of session '{session_id}'"
            )));
        }
        self.end_session(session_id, EndReason::EndedByUser).await
    }

    /// Relay a negotiation message to the other member of the session room.
    pub fn relay_signal(
        &self,
        from: &ParticipantId,
        session_id: &SessionId,
        signal: Signal,
    ) -> Result<usize, BrokerError> {
        let live = self.authorized(from, session_id)?;
        Ok(self.inner.relay.relay_to_peers(
            &live.room,
            from,
            ServerEvent::Signal {
                session: session_id.clone(),
                signal,
            },
        ))
    }

    /// Persist a chat line (best effort) and fan it out to the room.
    pub async fn chat(
        &self,
        sender: &ParticipantId,
        session_id: &SessionId,
        text: String,
    ) -> Result<usize, BrokerError> {
        let live = self.authorized(sender, session_id)?;
        let at_ms = unix_millis();

        let record = ChatRecord {
            session_id: session_id.clone(),
            sender: sender.clone(),
            text: text.clone(),
            at_ms,
        };
        if let Err(e) = self.inner.records.append_chat_record(&record).await {
            warn!(session_id = %session_id, error = %e, "chat not persisted");
        }

        Ok(self.inner.relay.fan_out(
            &live.room,
            ServerEvent::ChatMessage {
                session: session_id.clone(),
                sender: sender.clone(),
                text,
                at_ms,
            },
        ))
    }

    /// Mark the participant disconnected in every live session they are in.
    ///
    /// Once neither party of a session is registered, an accepted session
    /// that never started ends and a pending request is withdrawn.
    pub async fn participant_disconnected(&self, participant: &ParticipantId) {
        let abandoned: Vec<SessionId> = self
            .inner
            .pending
            .iter()
            .filter(|entry| entry.side_of(participant).is_some())
            .filter(|entry| !self.either_registered(&entry.requester, &entry.provider))
            .map(|entry| entry.key().clone())
            .collect();
        for session_id in abandoned {
            if let Some((_, session)) = self.inner.pending.remove(&session_id) {
                self.cancel_pending(session, EndReason::DisconnectedTimeout).await;
            }
        }

        for (session_id, live) in self.inner.live.involving(participant) {
            let Some(side) = live.side_of(participant) else {
                continue;
            };
            if live.is_closing() {
                continue;
            }
            if live
                .commands
                .send(SessionCommand::Connectivity {
                    side,
                    connected: false,
                })
                .await
                .is_err()
            {
                debug!(session_id = %session_id, "session finished before disconnect was applied");
                continue;
            }
            if !self.either_registered(&live.requester, &live.provider)
                && live.commands.send(SessionCommand::Abandoned).await.is_err()
            {
                debug!(session_id = %session_id, "session finished before it was abandoned");
            }
        }
    }

    fn either_registered(&self, requester: &ParticipantId, provider: &ParticipantId) -> bool {
        let registry = self.inner.relay.registry();
        registry.lookup(requester).is_some() || registry.lookup(provider).is_some()
    }

    /// End every live session with `shutdown` and wait for finalization.
    pub async fn shutdown(&self) -> Vec<SessionSummary> {
        let ids = self.inner.live.ids();
        info!(sessions = ids.len(), "ending live sessions for shutdown");

        join_all(
            ids.iter()
                .map(|id| self.end_session(id, EndReason::Shutdown)),
        )
        .await
        .into_iter()
        .filter_map(Result::ok)
        .collect()
    }

    pub fn is_live(&self, session_id: &SessionId) -> bool {
        self.inner.live.contains(session_id)
    }

    pub fn is_pending(&self, session_id: &SessionId) -> bool {
        self.inner.pending.contains_key(session_id)
    }

    pub fn live_count(&self) -> usize {
        self.inner.live.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    fn authorized(
        &self,
        participant: &ParticipantId,
        session_id: &SessionId,
    ) -> Result<Arc<LiveSession>, BrokerError> {
        let live = self
            .inner
            .live
            .get(session_id)
            .filter(|live| !live.is_closing())
            .ok_or_else(|| BrokerError::SessionNotFound(session_id.clone()))?;
        if live.side_of(participant).is_none() {
            return Err(BrokerError::Forbidden(format!(
                "not a participant of session '{session_id}'"
            )));
        }
        Ok(live)
    }

    // A request withdrawn before acceptance: nothing was charged.
    async fn cancel_pending(&self, mut session: Session, reason: EndReason) -> SessionSummary {
        session.end();
        let session_id = session.id.clone();

        let record = FinalSessionRecord {
            session_id: session_id.clone(),
            total_seconds: 0,
            amount_charged_cents: 0,
        };
        if let Err(e) = self.inner.records.finalize_session_record(&record).await {
            warn!(session_id = %session_id, error = %e, "failed to persist cancelled session");
        }

        self.inner.relay.deliver(
            &[session.requester.clone(), session.provider.clone()],
            ServerEvent::SessionEnded {
                session: session_id.clone(),
                reason,
            },
        );
        info!(session_id = %session_id, reason = reason.as_str(), "pending session withdrawn");
        session.summary(reason, None)
    }
}
