//! One-to-many live broadcasts.
//!
//! A broadcast lives only while its broadcaster's connection does. Its relay
//! room holds the broadcaster and every viewer; viewers are addressed in
//! signaling by their connection id.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::collaborators::{Collaborators, GiftRecord, Ledger, LedgerCause, RecordStore};
use crate::error::BrokerError;
use crate::event::{BroadcastSummary, Cents, Role, ServerEvent, Signal, unix_millis};
use crate::ids::{ConnectionId, ParticipantId, RoomId, StreamId};
use crate::relay::SignalRelay;

const DEFAULT_TITLE: &str = "Live";

#[derive(Debug, Clone)]
pub struct LiveBroadcast {
    pub id: StreamId,
    pub provider: ParticipantId,
    pub title: String,
    pub connection: ConnectionId,
    pub room: RoomId,
    pub started_at_ms: u64,
    pub viewers: HashSet<ParticipantId>,
}

impl LiveBroadcast {
    fn summary(&self) -> BroadcastSummary {
        BroadcastSummary {
            stream_id: self.id.clone(),
            provider_id: self.provider.clone(),
            title: self.title.clone(),
            viewer_count: self.viewers.len(),
        }
    }
}

pub struct BroadcastCoordinator {
    relay: Arc<SignalRelay>,
    ledger: Arc<dyn Ledger>,
    records: Arc<dyn RecordStore>,
    broadcasts: DashMap<StreamId, LiveBroadcast, ahash::RandomState>,
    // a viewer watches at most one stream at a time
    watching: DashMap<ParticipantId, StreamId, ahash::RandomState>,
}

impl BroadcastCoordinator {
    pub fn new(relay: Arc<SignalRelay>, collaborators: &Collaborators) -> Self {
        Self {
            relay,
            ledger: collaborators.ledger.clone(),
            records: collaborators.records.clone(),
            broadcasts: DashMap::default(),
            watching: DashMap::default(),
        }
    }

    /// Start a broadcast bound to the caller's connection.
    pub fn start_broadcast(
        &self,
        provider: &ParticipantId,
        connection: &ConnectionId,
        title: &str,
    ) -> Result<StreamId, BrokerError> {
        if self.relay.registry().role(provider) != Some(Role::Provider) {
            return Err(BrokerError::Forbidden(
                "only providers can broadcast".to_string(),
            ));
        }

        let title = match title.trim() {
            "" => DEFAULT_TITLE.to_string(),
            trimmed => trimmed.to_string(),
        };
        let stream = StreamId::generate();
        let room = RoomId::from(&stream);

        self.relay.open_room(room.clone(), [provider.clone()]);
        self.broadcasts.insert(
            stream.clone(),
            LiveBroadcast {
                id: stream.clone(),
                provider: provider.clone(),
                title: title.clone(),
                connection: connection.clone(),
                room,
                started_at_ms: unix_millis(),
                viewers: HashSet::new(),
            },
        );

        info!(stream_id = %stream, provider = %provider, title = %title, "broadcast started");

        self.relay.send_to_connection(
            connection,
            ServerEvent::BroadcastStarted {
                stream: stream.clone(),
            },
        );
        self.announce_directory();
        Ok(stream)
    }

    /// Live broadcasts, oldest first.
    pub fn list_broadcasts(&self) -> Vec<BroadcastSummary> {
        let mut live: Vec<(u64, BroadcastSummary)> = self
            .broadcasts
            .iter()
            .map(|entry| (entry.started_at_ms, entry.summary()))
            .collect();
        live.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.stream_id.cmp(&b.1.stream_id)));
        live.into_iter().map(|(_, summary)| summary).collect()
    }

    /// Add a viewer, publish the new count and tell the broadcaster how to
    /// reach them. Returns the viewer count.
    pub fn join_broadcast(
        &self,
        viewer: &ParticipantId,
        stream: &StreamId,
    ) -> Result<usize, BrokerError> {
        let viewer_conn = self
            .relay
            .registry()
            .lookup(viewer)
            .ok_or(BrokerError::NotRegistered)?;

        if let Some(current) = self.watching.get(viewer).map(|s| s.clone()) {
            if &current != stream {
                self.leave_broadcast(viewer);
            }
        }

        let (room, broadcaster, count) = {
            let mut broadcast = self
                .broadcasts
                .get_mut(stream)
                .ok_or_else(|| BrokerError::BroadcastNotFound(stream.clone()))?;
            if &broadcast.provider == viewer {
                return Err(BrokerError::Forbidden(
                    "cannot watch your own broadcast".to_string(),
                ));
            }
            broadcast.viewers.insert(viewer.clone());
            (
                broadcast.room.clone(),
                broadcast.connection.clone(),
                broadcast.viewers.len(),
            )
        };

        self.watching.insert(viewer.clone(), stream.clone());
        self.relay.join(&room, viewer.clone());

        debug!(stream_id = %stream, viewer = %viewer, count, "viewer joined");

        self.relay.fan_out(
            &room,
            ServerEvent::ViewerCount {
                stream: stream.clone(),
                count,
            },
        );
        self.relay.send_to_connection(
            &broadcaster,
            ServerEvent::ViewerJoined {
                stream: stream.clone(),
                viewer_tag: viewer_conn.id().clone(),
                viewer: viewer.clone(),
            },
        );
        Ok(count)
    }

    /// Remove the viewer from whatever they are watching. Returns the stream
    /// left and its new viewer count.
    pub fn leave_broadcast(&self, viewer: &ParticipantId) -> Option<(StreamId, usize)> {
        let (_, stream) = self.watching.remove(viewer)?;

        let (room, count) = {
            let mut broadcast = self.broadcasts.get_mut(&stream)?;
            broadcast.viewers.remove(viewer);
            (broadcast.room.clone(), broadcast.viewers.len())
        };
        self.relay.leave(&room, viewer);

        debug!(stream_id = %stream, viewer = %viewer, count, "viewer left");

        self.relay.fan_out(
            &room,
            ServerEvent::ViewerCount {
                stream: stream.clone(),
                count,
            },
        );
        Some((stream, count))
    }

    /// Route a viewer's negotiation message to the broadcaster, tagged with
    /// the viewer's connection id.
    pub fn relay_from_viewer(
        &self,
        viewer: &ParticipantId,
        stream: &StreamId,
        signal: Signal,
    ) -> Result<bool, BrokerError> {
        let broadcaster = {
            let broadcast = self
                .broadcasts
                .get(stream)
                .ok_or_else(|| BrokerError::BroadcastNotFound(stream.clone()))?;
            if !broadcast.viewers.contains(viewer) {
                return Err(BrokerError::Forbidden(format!(
                    "not a viewer of broadcast '{stream}'"
                )));
            }
            broadcast.connection.clone()
        };

        let Some(tag) = self.relay.registry().lookup(viewer).map(|c| c.id().clone()) else {
            return Ok(false);
        };

        Ok(self.relay.send_to_connection(
            &broadcaster,
            ServerEvent::LiveSignal {
                stream: stream.clone(),
                signal,
                viewer_tag: Some(tag),
            },
        ))
    }

    /// Route the broadcaster's reply back to the viewer named by `to`.
    ///
    /// A tag that no longer names a viewer of this stream drops the message.
    pub fn relay_from_broadcaster(
        &self,
        connection: &ConnectionId,
        stream: &StreamId,
        to: &ConnectionId,
        signal: Signal,
    ) -> Result<bool, BrokerError> {
        let target_is_viewer = {
            let broadcast = self
                .broadcasts
                .get(stream)
                .ok_or_else(|| BrokerError::BroadcastNotFound(stream.clone()))?;
            if &broadcast.connection != connection {
                return Err(BrokerError::Forbidden(format!(
                    "not the broadcaster of '{stream}'"
                )));
            }
            self.relay
                .registry()
                .participant_of(to)
                .is_some_and(|p| broadcast.viewers.contains(&p))
        };

        if !target_is_viewer {
            debug!(stream_id = %stream, to = %to, "reply to unknown viewer dropped");
            return Ok(false);
        }

        Ok(self.relay.send_to_connection(
            to,
            ServerEvent::LiveSignal {
                stream: stream.clone(),
                signal,
                viewer_tag: None,
            },
        ))
    }

    /// One-off debit from the payer, fanned out to the room on success.
    ///
    /// On insufficient funds nothing is recorded or fanned out; the caller
    /// reports the error to the payer alone.
    pub async fn send_gift(
        &self,
        payer: &ParticipantId,
        stream: &StreamId,
        amount_cents: Cents,
    ) -> Result<(), BrokerError> {
        if amount_cents == 0 {
            return Err(BrokerError::InvalidAmount(amount_cents));
        }
        if !self.broadcasts.contains_key(stream) {
            return Err(BrokerError::BroadcastNotFound(stream.clone()));
        }

        if !self
            .ledger
            .debit(payer, amount_cents, LedgerCause::Gift)
            .await?
        {
            debug!(stream_id = %stream, payer = %payer, amount_cents, "gift declined");
            return Err(BrokerError::InsufficientFunds);
        }

        // the broadcast may have ended while the debit was in flight
        let Some((provider, room)) = self
            .broadcasts
            .get(stream)
            .map(|b| (b.provider.clone(), b.room.clone()))
        else {
            if let Err(e) = self
                .ledger
                .credit(payer, amount_cents, LedgerCause::Refund)
                .await
            {
                warn!(stream_id = %stream, payer = %payer, error = %e, "gift refund failed");
            }
            return Err(BrokerError::BroadcastNotFound(stream.clone()));
        };

        let record = GiftRecord {
            stream_id: stream.clone(),
            provider_id: provider.clone(),
            payer_id: payer.clone(),
            amount_cents,
        };
        if let Err(e) = self.records.append_gift_record(&record).await {
            warn!(stream_id = %stream, error = %e, "gift record not persisted");
        }

        info!(stream_id = %stream, payer = %payer, provider = %provider, amount_cents, "gift sent");

        self.relay.fan_out(
            &room,
            ServerEvent::GiftReceived {
                stream: stream.clone(),
                payer: payer.clone(),
                amount_cents,
            },
        );
        Ok(())
    }

    /// Fan a chat line out to the room. Not persisted.
    pub fn chat(
        &self,
        sender: &ParticipantId,
        stream: &StreamId,
        text: String,
    ) -> Result<usize, BrokerError> {
        let room = self
            .broadcasts
            .get(stream)
            .map(|b| b.room.clone())
            .ok_or_else(|| BrokerError::BroadcastNotFound(stream.clone()))?;
        if !self.relay.is_member(&room, sender) {
            return Err(BrokerError::Forbidden(format!(
                "not in broadcast '{stream}'"
            )));
        }

        Ok(self.relay.fan_out(
            &room,
            ServerEvent::LiveChat {
                stream: stream.clone(),
                sender: sender.clone(),
                text,
                at_ms: unix_millis(),
            },
        ))
    }

    /// Stop a broadcast. Only its own broadcaster connection may do so.
    pub fn end_broadcast(
        &self,
        connection: &ConnectionId,
        stream: &StreamId,
    ) -> Result<(), BrokerError> {
        let owner = self
            .broadcasts
            .get(stream)
            .map(|b| b.connection.clone())
            .ok_or_else(|| BrokerError::BroadcastNotFound(stream.clone()))?;
        if &owner != connection {
            return Err(BrokerError::Forbidden(format!(
                "not the broadcaster of '{stream}'"
            )));
        }
        self.teardown(stream);
        Ok(())
    }

    /// Handle a closed transport connection: broadcasts bound to it end, and
    /// if its participant is now offline they stop watching.
    pub fn connection_closed(&self, connection: &ConnectionId, offline: Option<&ParticipantId>) {
        let owned: Vec<StreamId> = self
            .broadcasts
            .iter()
            .filter(|entry| &entry.connection == connection)
            .map(|entry| entry.key().clone())
            .collect();
        for stream in owned {
            info!(stream_id = %stream, "broadcaster disconnected");
            self.teardown(&stream);
        }

        if let Some(participant) = offline {
            self.leave_broadcast(participant);
        }
    }

    /// Push the directory to every registered connection.
    pub fn announce_directory(&self) -> usize {
        let streams = self.list_broadcasts();
        self.relay
            .registry()
            .registered()
            .iter()
            .filter(|conn| {
                conn.send(ServerEvent::BroadcastList {
                    streams: streams.clone(),
                })
            })
            .count()
    }

    pub fn is_live(&self, stream: &StreamId) -> bool {
        self.broadcasts.contains_key(stream)
    }

    pub fn viewer_count(&self, stream: &StreamId) -> Option<usize> {
        self.broadcasts.get(stream).map(|b| b.viewers.len())
    }

    pub fn len(&self) -> usize {
        self.broadcasts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.broadcasts.is_empty()
    }

    fn teardown(&self, stream: &StreamId) {
        let Some((_, broadcast)) = self.broadcasts.remove(stream) else {
            return;
        };
        for viewer in &broadcast.viewers {
            self.watching.remove_if(viewer, |_, watched| watched == stream);
        }

        let members = self.relay.close_room(&broadcast.room);
        let notified = self.relay.deliver(
            &members,
            ServerEvent::BroadcastEnded {
                stream: stream.clone(),
            },
        );

        info!(
            stream_id = %stream,
            viewers = broadcast.viewers.len(),
            notified,
            "broadcast ended"
        );
        self.announce_directory();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SignalKind;
    use crate::memory::InMemoryBackend;
    use crate::registry::{Connection, ConnectionHandle, ConnectionRegistry};
    use tokio::sync::mpsc::Receiver;

    struct Harness {
        broadcasts: BroadcastCoordinator,
        backend: InMemoryBackend,
        registry: Arc<ConnectionRegistry>,
    }

    fn harness() -> Harness {
        let backend = InMemoryBackend::new();
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = Arc::new(SignalRelay::new(registry.clone()));
        Harness {
            broadcasts: BroadcastCoordinator::new(relay, &backend.collaborators()),
            backend,
            registry,
        }
    }

    fn connect(h: &Harness, id: &str, role: Role) -> (ConnectionHandle, Receiver<ServerEvent>) {
        let (conn, rx) = Connection::channel(64);
        h.registry.register(ParticipantId::from(id), role, conn.clone());
        (conn, rx)
    }

    fn drain(rx: &mut Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn requesters_cannot_broadcast() {
        let h = harness();
        let (conn, _rx) = connect(&h, "req", Role::Requester);
        let result = h
            .broadcasts
            .start_broadcast(&ParticipantId::from("req"), conn.id(), "hi");
        assert!(matches!(result, Err(BrokerError::Forbidden(_))));
    }

    #[test]
    fn empty_title_defaults() {
        let h = harness();
        let (conn, _rx) = connect(&h, "prov", Role::Provider);
        h.broadcasts
            .start_broadcast(&ParticipantId::from("prov"), conn.id(), "  ")
            .unwrap();

        let listed = h.broadcasts.list_broadcasts();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "Live");
        assert_eq!(listed[0].viewer_count, 0);
    }

    #[test]
    fn start_pushes_directory_to_everyone() {
        let h = harness();
        let (conn, mut prov_rx) = connect(&h, "prov", Role::Provider);
        let (_viewer, mut viewer_rx) = connect(&h, "v1", Role::Requester);

        let stream = h
            .broadcasts
            .start_broadcast(&ParticipantId::from("prov"), conn.id(), "show")
            .unwrap();

        assert!(drain(&mut prov_rx).contains(&ServerEvent::BroadcastStarted { stream }));
        assert!(
            drain(&mut viewer_rx)
                .iter()
                .any(|e| matches!(e, ServerEvent::BroadcastList { streams } if streams.len() == 1))
        );
    }

    #[test]
    fn join_notifies_broadcaster_with_viewer_tag() {
        let h = harness();
        let (conn, mut prov_rx) = connect(&h, "prov", Role::Provider);
        let (viewer_conn, mut viewer_rx) = connect(&h, "v1", Role::Requester);
        let stream = h
            .broadcasts
            .start_broadcast(&ParticipantId::from("prov"), conn.id(), "show")
            .unwrap();
        drain(&mut prov_rx);
        drain(&mut viewer_rx);

        let count = h
            .broadcasts
            .join_broadcast(&ParticipantId::from("v1"), &stream)
            .unwrap();
        assert_eq!(count, 1);

        let to_broadcaster = drain(&mut prov_rx);
        assert!(to_broadcaster.contains(&ServerEvent::ViewerJoined {
            stream: stream.clone(),
            viewer_tag: viewer_conn.id().clone(),
            viewer: ParticipantId::from("v1"),
        }));
        assert!(drain(&mut viewer_rx).contains(&ServerEvent::ViewerCount {
            stream: stream.clone(),
            count: 1,
        }));
    }

    #[test]
    fn signaling_round_trip_uses_viewer_tag() {
        let h = harness();
        let (conn, mut prov_rx) = connect(&h, "prov", Role::Provider);
        let (viewer_conn, mut viewer_rx) = connect(&h, "v1", Role::Requester);
        let stream = h
            .broadcasts
            .start_broadcast(&ParticipantId::from("prov"), conn.id(), "show")
            .unwrap();
        h.broadcasts
            .join_broadcast(&ParticipantId::from("v1"), &stream)
            .unwrap();
        drain(&mut prov_rx);
        drain(&mut viewer_rx);

        let offer = Signal::new(SignalKind::Offer, "viewer-offer");
        assert!(h
            .broadcasts
            .relay_from_viewer(&ParticipantId::from("v1"), &stream, offer.clone())
            .unwrap());
        assert_eq!(
            drain(&mut prov_rx),
            vec![ServerEvent::LiveSignal {
                stream: stream.clone(),
                signal: offer,
                viewer_tag: Some(viewer_conn.id().clone()),
            }]
        );

        let answer = Signal::new(SignalKind::Answer, "broadcaster-answer");
        assert!(h
            .broadcasts
            .relay_from_broadcaster(conn.id(), &stream, viewer_conn.id(), answer.clone())
            .unwrap());
        assert_eq!(
            drain(&mut viewer_rx),
            vec![ServerEvent::LiveSignal {
                stream: stream.clone(),
                signal: answer,
                viewer_tag: None,
            }]
        );
    }

    #[test]
    fn only_the_broadcaster_connection_may_reply_or_end() {
        let h = harness();
        let (conn, _prov_rx) = connect(&h, "prov", Role::Provider);
        let (viewer_conn, _viewer_rx) = connect(&h, "v1", Role::Requester);
        let stream = h
            .broadcasts
            .start_broadcast(&ParticipantId::from("prov"), conn.id(), "show")
            .unwrap();
        h.broadcasts
            .join_broadcast(&ParticipantId::from("v1"), &stream)
            .unwrap();

        let reply = h.broadcasts.relay_from_broadcaster(
            viewer_conn.id(),
            &stream,
            viewer_conn.id(),
            Signal::new(SignalKind::Answer, "x"),
        );
        assert!(matches!(reply, Err(BrokerError::Forbidden(_))));
        assert!(matches!(
            h.broadcasts.end_broadcast(viewer_conn.id(), &stream),
            Err(BrokerError::Forbidden(_))
        ));
        assert!(h.broadcasts.is_live(&stream));
    }

    #[test]
    fn leave_updates_count() {
        let h = harness();
        let (conn, mut prov_rx) = connect(&h, "prov", Role::Provider);
        let (_v1, _rx1) = connect(&h, "v1", Role::Requester);
        let (_v2, _rx2) = connect(&h, "v2", Role::Requester);
        let stream = h
            .broadcasts
            .start_broadcast(&ParticipantId::from("prov"), conn.id(), "show")
            .unwrap();
        h.broadcasts.join_broadcast(&ParticipantId::from("v1"), &stream).unwrap();
        h.broadcasts.join_broadcast(&ParticipantId::from("v2"), &stream).unwrap();
        drain(&mut prov_rx);

        assert_eq!(
            h.broadcasts.leave_broadcast(&ParticipantId::from("v1")),
            Some((stream.clone(), 1))
        );
        assert!(drain(&mut prov_rx).contains(&ServerEvent::ViewerCount {
            stream: stream.clone(),
            count: 1,
        }));
        assert_eq!(h.broadcasts.leave_broadcast(&ParticipantId::from("v1")), None);
    }

    #[tokio::test]
    async fn zero_gift_is_invalid() {
        let h = harness();
        let (conn, _rx) = connect(&h, "prov", Role::Provider);
        let stream = h
            .broadcasts
            .start_broadcast(&ParticipantId::from("prov"), conn.id(), "show")
            .unwrap();

        let result = h
            .broadcasts
            .send_gift(&ParticipantId::from("v1"), &stream, 0)
            .await;
        assert!(matches!(result, Err(BrokerError::InvalidAmount(0))));
    }

    #[tokio::test]
    async fn gift_debits_records_and_fans_out() {
        let h = harness();
        h.backend.ledger.set_balance("v1", 500);
        let (conn, mut prov_rx) = connect(&h, "prov", Role::Provider);
        let (_v1, _rx1) = connect(&h, "v1", Role::Requester);
        let stream = h
            .broadcasts
            .start_broadcast(&ParticipantId::from("prov"), conn.id(), "show")
            .unwrap();
        h.broadcasts.join_broadcast(&ParticipantId::from("v1"), &stream).unwrap();
        drain(&mut prov_rx);

        h.broadcasts
            .send_gift(&ParticipantId::from("v1"), &stream, 300)
            .await
            .unwrap();

        assert_eq!(h.backend.ledger.balance(&ParticipantId::from("v1")), 200);
        let gifts = h.backend.records.gifts();
        assert_eq!(gifts.len(), 1);
        assert_eq!(gifts[0].provider_id, ParticipantId::from("prov"));
        assert!(drain(&mut prov_rx).contains(&ServerEvent::GiftReceived {
            stream,
            payer: ParticipantId::from("v1"),
            amount_cents: 300,
        }));
    }

    #[test]
    fn broadcaster_disconnect_ends_broadcast() {
        let h = harness();
        let (conn, _prov_rx) = connect(&h, "prov", Role::Provider);
        let (_v1, mut rx1) = connect(&h, "v1", Role::Requester);
        let stream = h
            .broadcasts
            .start_broadcast(&ParticipantId::from("prov"), conn.id(), "show")
            .unwrap();
        h.broadcasts.join_broadcast(&ParticipantId::from("v1"), &stream).unwrap();
        drain(&mut rx1);

        let offline = h.registry.forget(conn.id());
        h.broadcasts.connection_closed(conn.id(), offline.as_ref());

        assert!(!h.broadcasts.is_live(&stream));
        assert!(drain(&mut rx1).contains(&ServerEvent::BroadcastEnded {
            stream: stream.clone(),
        }));
        assert!(matches!(
            h.broadcasts
                .relay_from_viewer(&ParticipantId::from("v1"), &stream, Signal::new(SignalKind::Offer, "x")),
            Err(BrokerError::BroadcastNotFound(_))
        ));
        assert_eq!(h.broadcasts.leave_broadcast(&ParticipantId::from("v1")), None);
    }
}
