use tokio::time::Instant;

use crate::event::{Cents, EndReason, Side};
use crate::ids::{ParticipantId, RoomId, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Requested,
    Accepted,
    /// Both sides have reported connectivity at least once.
    Active,
    Ended,
}

/// Effect of a connectivity report on the "both connected" condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityChange {
    BecameBoth,
    LostBoth,
    Unchanged,
}

/// A bounded, billed interaction between one requester and one provider.
///
/// `amount_charged_cents` is always `rate_cents * intervals`.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub requester: ParticipantId,
    pub provider: ParticipantId,
    pub rate_cents: Cents,
    pub room: Option<RoomId>,
    pub status: SessionStatus,
    pub requester_connected: bool,
    pub provider_connected: bool,
    pub connected_seconds: u64,
    pub amount_charged_cents: Cents,
    pub intervals: u64,
    pub started_at_ms: Option<u64>,
    pub disconnect_deadline: Option<Instant>,
    pub active: bool,
}

impl Session {
    pub fn requested(
        id: SessionId,
        requester: ParticipantId,
        provider: ParticipantId,
        rate_cents: Cents,
    ) -> Self {
        Self {
            id,
            requester,
            provider,
            rate_cents,
            room: None,
            status: SessionStatus::Requested,
            requester_connected: false,
            provider_connected: false,
            connected_seconds: 0,
            amount_charged_cents: 0,
            intervals: 0,
            started_at_ms: None,
            disconnect_deadline: None,
            active: true,
        }
    }

    /// `requested -> accepted`. Returns `false` from any other state.
    pub fn accept(&mut self, room: RoomId, started_at_ms: u64) -> bool {
        if self.status != SessionStatus::Requested {
            return false;
        }
        self.status = SessionStatus::Accepted;
        self.room = Some(room);
        self.started_at_ms = Some(started_at_ms);
        true
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

    pub fn both_connected(&self) -> bool {
        self.requester_connected && self.provider_connected
    }

    pub fn set_connected(&mut self, side: Side, connected: bool) -> ConnectivityChange {
        if !self.active {
            return ConnectivityChange::Unchanged;
        }

        let before = self.both_connected();
        match side {
            Side::Requester => self.requester_connected = connected,
            Side::Provider => self.provider_connected = connected,
        }
        let after = self.both_connected();

        match (before, after) {
            (false, true) => {
                if self.status == SessionStatus::Accepted {
                    self.status = SessionStatus::Active;
                }
                ConnectivityChange::BecameBoth
            }
            (true, false) => ConnectivityChange::LostBoth,
            _ => ConnectivityChange::Unchanged,
        }
    }

    /// Account one completed, successfully debited interval. Returns its
    /// 1-based index.
    pub fn record_interval(&mut self, interval_seconds: u64) -> u64 {
        self.intervals += 1;
        self.connected_seconds += interval_seconds;
        self.amount_charged_cents = self.rate_cents * self.intervals;
        self.intervals
    }

    /// Move to `ended`. Only the first call returns `true`.
    pub fn end(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.status = SessionStatus::Ended;
        self.disconnect_deadline = None;
        true
    }

    pub fn summary(&self, reason: EndReason, payout_cents: Option<Cents>) -> SessionSummary {
        SessionSummary {
            session: self.id.clone(),
            requester: self.requester.clone(),
            provider: self.provider.clone(),
            reason,
            intervals: self.intervals,
            total_seconds: self.connected_seconds,
            amount_charged_cents: self.amount_charged_cents,
            payout_cents,
        }
    }
}

/// Final figures of a terminated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session: SessionId,
    pub requester: ParticipantId,
    pub provider: ParticipantId,
    pub reason: EndReason,
    pub intervals: u64,
    pub total_seconds: u64,
    pub amount_charged_cents: Cents,
    pub payout_cents: Option<Cents>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::requested(
            SessionId::from("s"),
            ParticipantId::from("req"),
            ParticipantId::from("prov"),
            200,
        )
    }

    #[test]
    fn accept_only_from_requested() {
        let mut s = session();
        assert!(s.accept(RoomId::from("r"), 1));
        assert!(!s.accept(RoomId::from("r2"), 2));
        assert_eq!(s.room, Some(RoomId::from("r")));
    }

    #[test]
    fn both_connected_transitions() {
        let mut s = session();
        s.accept(RoomId::from("r"), 1);

        assert_eq!(s.set_connected(Side::Requester, true), ConnectivityChange::Unchanged);
        assert_eq!(s.set_connected(Side::Provider, true), ConnectivityChange::BecameBoth);
        assert_eq!(s.status, SessionStatus::Active);
        assert_eq!(s.set_connected(Side::Provider, true), ConnectivityChange::Unchanged);
        assert_eq!(s.set_connected(Side::Requester, false), ConnectivityChange::LostBoth);
        assert_eq!(s.set_connected(Side::Provider, false), ConnectivityChange::Unchanged);
    }

    #[test]
    fn charge_tracks_completed_intervals() {
        let mut s = session();
        assert_eq!(s.record_interval(60), 1);
        assert_eq!(s.record_interval(60), 2);
        assert_eq!(s.amount_charged_cents, 400);
        assert_eq!(s.connected_seconds, 120);
    }

    #[test]
    fn end_happens_once_and_freezes_connectivity() {
        let mut s = session();
        assert!(s.end());
        assert!(!s.end());
        assert_eq!(s.status, SessionStatus::Ended);
        assert_eq!(s.set_connected(Side::Requester, true), ConnectivityChange::Unchanged);
        assert!(!s.requester_connected);
    }

    #[test]
    fn side_is_derived_from_identity() {
        let s = session();
        assert_eq!(s.side_of(&ParticipantId::from("req")), Some(Side::Requester));
        assert_eq!(s.side_of(&ParticipantId::from("prov")), Some(Side::Provider));
        assert_eq!(s.side_of(&ParticipantId::from("other")), None);
    }
}
