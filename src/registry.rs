//! Participant to connection mapping.
//!
//! Entirely in memory. After a restart nothing is registered, so every
//! session touching a lost entry is treated as disconnected.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::event::{Role, ServerEvent};
use crate::ids::{ConnectionId, ParticipantId};

/// Outbound half of one participant transport connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<ServerEvent>,
    dropped: AtomicU64,
}

pub type ConnectionHandle = Arc<Connection>;

impl Connection {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id,
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    /// A connection with a fresh id plus the receiver its writer drains.
    pub fn channel(capacity: usize) -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Self::new(ConnectionId::generate(), tx)), rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue an event without waiting.
    ///
    /// Returns `false` if the buffer is full or the writer is gone; the
    /// event is dropped and counted.
    pub fn send(&self, event: ServerEvent) -> bool {
        if self.tx.try_send(event).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
struct Registration {
    role: Role,
    connection: ConnectionHandle,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    participants: DashMap<ParticipantId, Registration, ahash::RandomState>,
    connections: DashMap<ConnectionId, ParticipantId, ahash::RandomState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or overwrite the participant's current connection.
    pub fn register(&self, participant: ParticipantId, role: Role, connection: ConnectionHandle) {
        let conn_id = connection.id().clone();

        // a connection speaks for one participant at a time
        if let Some(previous) = self.connections.insert(conn_id.clone(), participant.clone()) {
            if previous != participant {
                self.participants
                    .remove_if(&previous, |_, reg| reg.connection.id() == &conn_id);
            }
        }

        let replaced = self.participants.insert(
            participant.clone(),
            Registration { role, connection },
        );

        info!(
            participant = %participant,
            connection = %conn_id,
            role = ?role,
            replaced = replaced.is_some(),
            "participant registered"
        );
    }

    pub fn lookup(&self, participant: &ParticipantId) -> Option<ConnectionHandle> {
        self.participants
            .get(participant)
            .map(|reg| reg.connection.clone())
    }

    pub fn role(&self, participant: &ParticipantId) -> Option<Role> {
        self.participants.get(participant).map(|reg| reg.role)
    }

    pub fn participant_of(&self, connection: &ConnectionId) -> Option<ParticipantId> {
        self.connections.get(connection).map(|p| p.clone())
    }

    /// Current registered connection with the given id, if any.
    pub fn connection(&self, connection: &ConnectionId) -> Option<ConnectionHandle> {
        let participant = self.participant_of(connection)?;
        self.lookup(&participant)
            .filter(|handle| handle.id() == connection)
    }

    /// Drop the mappings of a closed connection.
    ///
    /// Returns the participant only if this was their current connection,
    /// i.e. they are now offline. A connection already superseded by a newer
    /// registration returns `None`.
    pub fn forget(&self, connection: &ConnectionId) -> Option<ParticipantId> {
        let (_, participant) = self.connections.remove(connection)?;
        let removed = self
            .participants
            .remove_if(&participant, |_, reg| reg.connection.id() == connection);

        match removed {
            Some(_) => {
                info!(participant = %participant, connection = %connection, "participant offline");
                Some(participant)
            }
            None => {
                debug!(participant = %participant, connection = %connection, "superseded connection closed");
                None
            }
        }
    }

    /// Every currently registered connection.
    pub fn registered(&self) -> Vec<ConnectionHandle> {
        self.participants
            .iter()
            .map(|entry| entry.connection.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
