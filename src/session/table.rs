use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::error::BrokerError;
use crate::event::Side;
use crate::ids::{ParticipantId, RoomId, SessionId};
use crate::session::actor::SessionCommand;

/// Immutable routing facts of a live session plus its command queue.
///
/// Mutable session state lives only inside the session's actor.
#[derive(Debug)]
pub(crate) struct LiveSession {
    pub requester: ParticipantId,
    pub provider: ParticipantId,
    pub room: RoomId,
    pub commands: mpsc::Sender<SessionCommand>,
    closing: AtomicBool,
}

impl LiveSession {
    pub fn new(
        requester: ParticipantId,
        provider: ParticipantId,
        room: RoomId,
        commands: mpsc::Sender<SessionCommand>,
    ) -> Self {
        Self {
            requester,
            provider,
            room,
            commands,
            closing: AtomicBool::new(false),
        }
    }

    pub fn side_of(&self, participant: &ParticipantId) -> Option<Side> {
        if participant == &self.requester {
            Some(Side::Requester)
        } else if participant == &self.provider {
            Some(Side::Provider)
        } else {
            None
        }
    }

    /// Flag the session as terminating. Only the first caller gets `true`.
    pub fn begin_closing(&self) -> bool {
        !self.closing.swap(true, Ordering::AcqRel)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }
}

/// Live sessions by id.
///
/// Inserting returns a guard that removes the entry when dropped. The
/// session actor holds the guard, so an entry lives exactly as long as the
/// actor has not finished finalizing.
#[derive(Debug, Default)]
pub(crate) struct LiveSessions {
    sessions: DashMap<SessionId, Arc<LiveSession>, ahash::RandomState>,
}

impl LiveSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_insert(
        self: &Arc<Self>,
        id: SessionId,
        session: LiveSession,
    ) -> Result<LiveGuard, BrokerError> {
        use dashmap::mapref::entry::Entry;

        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => Err(BrokerError::Forbidden(format!(
                "session '{id}' is already live"
            ))),
            Entry::Vacant(slot) => {
                let session = Arc::new(session);
                slot.insert(Arc::clone(&session));
                Ok(LiveGuard {
                    id,
                    session,
                    map: Arc::clone(self),
                })
            }
        }
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<LiveSession>> {
        self.sessions.get(id).map(|entry| Arc::clone(&entry))
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Ids of live sessions the participant takes part in.
    pub fn involving(&self, participant: &ParticipantId) -> Vec<(SessionId, Arc<LiveSession>)> {
        self.sessions
            .iter()
            .filter(|entry| entry.side_of(participant).is_some())
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    fn remove(&self, id: &SessionId) {
        self.sessions.remove(id);
    }
}

pub(crate) struct LiveGuard {
    id: SessionId,
    session: Arc<LiveSession>,
    map: Arc<LiveSessions>,
}

impl LiveGuard {
    pub fn session(&self) -> &LiveSession {
        &self.session
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

impl fmt::Debug for LiveGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveGuard").field("id", &self.id).finish()
    }
}
