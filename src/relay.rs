//! Room membership and best-effort event delivery.
//!
//! Rooms hold participant ids, resolved to their current connection at send
//! time so a reconnecting participant keeps receiving room traffic. Nothing
//! is buffered: a missing destination drops the event.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::event::ServerEvent;
use crate::ids::{ConnectionId, ParticipantId, RoomId};
use crate::registry::ConnectionRegistry;

pub struct SignalRelay {
    registry: Arc<ConnectionRegistry>,
    rooms: DashMap<RoomId, HashSet<ParticipantId>, ahash::RandomState>,
}

impl SignalRelay {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            rooms: DashMap::default(),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn open_room(&self, room: RoomId, members: impl IntoIterator<Item = ParticipantId>) {
        let members: HashSet<_> = members.into_iter().collect();
        debug!(room = %room, members = members.len(), "room opened");
        self.rooms.insert(room, members);
    }

    /// Add a member. Returns `false` if the room is not open.
    pub fn join(&self, room: &RoomId, participant: ParticipantId) -> bool {
        match self.rooms.get_mut(room) {
            Some(mut members) => {
                members.insert(participant);
                true
            }
            None => false,
        }
    }

    /// Remove a member. Returns `true` if they were in the room.
    pub fn leave(&self, room: &RoomId, participant: &ParticipantId) -> bool {
        self.rooms
            .get_mut(room)
            .map(|mut members| members.remove(participant))
            .unwrap_or(false)
    }

    /// Close the room and return its former members. Later relays through
    /// it deliver nothing.
    pub fn close_room(&self, room: &RoomId) -> Vec<ParticipantId> {
        match self.rooms.remove(room) {
            Some((_, members)) => {
                debug!(room = %room, members = members.len(), "room closed");
                members.into_iter().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn is_open(&self, room: &RoomId) -> bool {
        self.rooms.contains_key(room)
    }

    pub fn is_member(&self, room: &RoomId, participant: &ParticipantId) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains(participant))
    }

    pub fn members(&self, room: &RoomId) -> Vec<ParticipantId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn member_count(&self, room: &RoomId) -> usize {
        self.rooms.get(room).map(|members| members.len()).unwrap_or(0)
    }

    /// Deliver to a participant's current connection.
    pub fn send_to(&self, participant: &ParticipantId, event: ServerEvent) -> bool {
        match self.registry.lookup(participant) {
            Some(connection) => connection.send(event),
            None => {
                debug!(participant = %participant, "no connection, event dropped");
                false
            }
        }
    }

    /// Deliver to one specific connection, if it is still registered.
    pub fn send_to_connection(&self, connection: &ConnectionId, event: ServerEvent) -> bool {
        match self.registry.connection(connection) {
            Some(handle) => handle.send(event),
            None => {
                debug!(connection = %connection, "connection gone, event dropped");
                false
            }
        }
    }

    /// Deliver to every member except `from`.
    ///
    /// Delivers nothing if the room is closed or `from` is not a member.
    pub fn relay_to_peers(&self, room: &RoomId, from: &ParticipantId, event: ServerEvent) -> usize {
        let peers: Vec<ParticipantId> = match self.rooms.get(room) {
            Some(members) if members.contains(from) => {
                members.iter().filter(|m| *m != from).cloned().collect()
            }
            _ => {
                debug!(room = %room, from = %from, "relay refused, room closed or sender not a member");
                return 0;
            }
        };
        self.deliver(&peers, event)
    }

    /// Deliver to every member of the room.
    pub fn fan_out(&self, room: &RoomId, event: ServerEvent) -> usize {
        let members = self.members(room);
        self.deliver(&members, event)
    }

    /// Deliver to an explicit participant list.
    pub fn deliver(&self, participants: &[ParticipantId], event: ServerEvent) -> usize {
        participants
            .iter()
            .filter(|participant| self.send_to(participant, event.clone()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Role, Signal, SignalKind};
    use crate::ids::SessionId;
    use crate::registry::Connection;
    use tokio::sync::mpsc;

    fn setup() -> (
        SignalRelay,
        mpsc::Receiver<ServerEvent>,
        mpsc::Receiver<ServerEvent>,
    ) {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a, rx_a) = Connection::channel(8);
        let (b, rx_b) = Connection::channel(8);
        registry.register(ParticipantId::from("a"), Role::Requester, a);
        registry.register(ParticipantId::from("b"), Role::Provider, b);
        (SignalRelay::new(registry), rx_a, rx_b)
    }

    fn offer() -> ServerEvent {
        ServerEvent::Signal {
            session: SessionId::from("s"),
            signal: Signal::new(SignalKind::Offer, "sdp"),
        }
    }

    #[test]
    fn relays_to_the_other_member_only() {
        let (relay, mut rx_a, mut rx_b) = setup();
        let room = RoomId::from("r");
        relay.open_room(room.clone(), [ParticipantId::from("a"), ParticipantId::from("b")]);

        assert_eq!(relay.relay_to_peers(&room, &ParticipantId::from("a"), offer()), 1);
        assert_eq!(rx_b.try_recv().unwrap(), offer());
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn closed_room_relays_nothing() {
        let (relay, _rx_a, mut rx_b) = setup();
        let room = RoomId::from("r");
        relay.open_room(room.clone(), [ParticipantId::from("a"), ParticipantId::from("b")]);

        let former = relay.close_room(&room);
        assert_eq!(former.len(), 2);
        assert_eq!(relay.relay_to_peers(&room, &ParticipantId::from("a"), offer()), 0);
        assert!(rx_b.try_recv().is_err());
        assert!(!relay.join(&room, ParticipantId::from("c")));
    }

    #[test]
    fn outsider_cannot_relay_into_room() {
        let (relay, _rx_a, mut rx_b) = setup();
        let room = RoomId::from("r");
        relay.open_room(room.clone(), [ParticipantId::from("b")]);

        assert_eq!(relay.relay_to_peers(&room, &ParticipantId::from("a"), offer()), 0);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn missing_destination_is_dropped_silently() {
        let (relay, _rx_a, _rx_b) = setup();
        let room = RoomId::from("r");
        relay.open_room(room.clone(), [ParticipantId::from("a"), ParticipantId::from("ghost")]);

        assert_eq!(relay.relay_to_peers(&room, &ParticipantId::from("a"), offer()), 0);
    }

    #[test]
    fn join_and_leave_update_membership() {
        let (relay, _rx_a, _rx_b) = setup();
        let room = RoomId::from("r");
        relay.open_room(room.clone(), [ParticipantId::from("a")]);

        assert!(relay.join(&room, ParticipantId::from("b")));
        assert_eq!(relay.member_count(&room), 2);
        assert!(relay.leave(&room, &ParticipantId::from("b")));
        assert!(!relay.leave(&room, &ParticipantId::from("b")));
        assert_eq!(relay.member_count(&room), 1);
    }
}
