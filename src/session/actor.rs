//! The task that exclusively owns one live session.
//!
//! Commands, billing ticks and the disconnect deadline are multiplexed in
//! one `select!` loop and handled one at a time, so a tick never interleaves
//! with a connectivity change or a termination of the same session.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::collaborators::{FinalSessionRecord, Ledger, LedgerCause, RecordStore, UsageRecord};
use crate::event::{EndReason, ServerEvent, Side};
use crate::relay::SignalRelay;
use crate::session::billing::BillingClock;
use crate::session::monitor::DisconnectMonitor;
use crate::session::state::{ConnectivityChange, Session, SessionStatus, SessionSummary};
use crate::session::table::LiveGuard;
use crate::settlement::Settlement;

#[derive(Debug)]
pub(crate) enum SessionCommand {
    Connectivity {
        side: Side,
        connected: bool,
    },
    End {
        reason: EndReason,
        done: oneshot::Sender<SessionSummary>,
    },
    /// Neither party has a registered connection any more.
    Abandoned,
}

enum Wake {
    Command(SessionCommand),
    Tick,
    Deadline,
}

pub(crate) struct SessionActor {
    pub session: Session,
    pub clock: BillingClock,
    pub monitor: DisconnectMonitor,
    pub commands: mpsc::Receiver<SessionCommand>,
    pub guard: Option<LiveGuard>,
    pub relay: Arc<SignalRelay>,
    pub ledger: Arc<dyn Ledger>,
    pub records: Arc<dyn RecordStore>,
    pub settlement: Arc<Settlement>,
}

impl SessionActor {
    pub async fn run(mut self) {
        // commands queue behind this write, so an early end still lands last
        self.record_acceptance().await;

        loop {
            let wake = tokio::select! {
                biased;
                Some(command) = self.commands.recv() => Wake::Command(command),
                _ = self.clock.tick() => Wake::Tick,
                _ = self.monitor.expired() => Wake::Deadline,
            };

            match wake {
                Wake::Command(SessionCommand::Connectivity { side, connected }) => {
                    self.on_connectivity(side, connected);
                }
                Wake::Command(SessionCommand::End { reason, done }) => {
                    let summary = self.finalize(reason).await;
                    let _ = done.send(summary);
                    break;
                }
                Wake::Command(SessionCommand::Abandoned) => {
                    if self.on_abandoned() {
                        self.finalize(EndReason::DisconnectedTimeout).await;
                        break;
                    }
                }
                Wake::Tick => {
                    if let Some(reason) = self.on_tick().await {
                        self.finalize(reason).await;
                        break;
                    }
                }
                Wake::Deadline => {
                    if self.on_deadline() {
                        self.finalize(EndReason::DisconnectedTimeout).await;
                        break;
                    }
                }
            }
        }
    }

    fn on_connectivity(&mut self, side: Side, connected: bool) {
        let change = self.session.set_connected(side, connected);
        let session_id = &self.session.id;
        match change {
            ConnectivityChange::BecameBoth => {
                if self.clock.arm() {
                    info!(session_id = %session_id, "both sides connected, billing started");
                }
                if self.monitor.disarm() {
                    info!(session_id = %session_id, "connectivity restored within grace");
                }
            }
            ConnectivityChange::LostBoth => {
                if self.monitor.arm() {
                    info!(
                        session_id = %session_id,
                        side = ?side,
                        grace_secs = self.monitor.grace().as_secs(),
                        "connectivity lost, disconnect deadline armed"
                    );
                }
            }
            ConnectivityChange::Unchanged => {
                debug!(session_id = %session_id, side = ?side, connected, "connectivity report");
            }
        }
        self.session.disconnect_deadline = self.monitor.deadline();
    }

    async fn record_acceptance(&self) {
        let (Some(room), Some(started_at)) = (&self.session.room, self.session.started_at_ms) else {
            return;
        };
        if let Err(e) = self
            .records
            .mark_session_accepted(&self.session.id, room, started_at)
            .await
        {
            warn!(session_id = %self.session.id, error = %e, "failed to record acceptance");
        }
    }

    fn is_closing(&self) -> bool {
        self.guard
            .as_ref()
            .is_some_and(|guard| guard.session().is_closing())
    }

    /// Charge one interval. Returns the reason to terminate, if any.
    async fn on_tick(&mut self) -> Option<EndReason> {
        let session_id = self.session.id.clone();
        // an end request may already be queued behind this tick
        if !self.session.active || self.is_closing() {
            debug!(session_id = %session_id, "tick discarded, session closing");
            return None;
        }
        if !self.session.both_connected() {
            debug!(session_id = %session_id, "tick skipped, not both connected");
            return None;
        }

        let rate = self.session.rate_cents;
        match self
            .ledger
            .debit(&self.session.requester, rate, LedgerCause::Session)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                self.clock.stop();
                info!(session_id = %session_id, rate, "debit declined");
                return Some(EndReason::InsufficientBalance);
            }
            Err(e) => {
                self.clock.stop();
                error!(session_id = %session_id, error = %e, "ledger failed during billing");
                return Some(EndReason::BillingFailed);
            }
        }

        let interval_index = self.session.record_interval(self.clock.period().as_secs());
        let usage = UsageRecord {
            session_id: session_id.clone(),
            interval_index,
            charged_cents: rate,
        };
        if let Err(e) = self.records.append_usage_record(&usage).await {
            warn!(session_id = %session_id, interval_index, error = %e, "usage record not persisted");
        }

        let total = self.session.amount_charged_cents;
        debug!(session_id = %session_id, interval_index, total, "interval charged");
        if let Some(room) = &self.session.room {
            self.relay.fan_out(
                room,
                ServerEvent::UsageTick {
                    session: session_id,
                    interval_index,
                    charged_cents: rate,
                    total_cents: total,
                },
            );
        }
        None
    }

    /// Both parties went offline. A session that never became active has no
    /// disconnect deadline to end it, so it ends here; an active one is left
    /// to its grace period. Returns `true` to terminate.
    fn on_abandoned(&self) -> bool {
        if self.session.status != SessionStatus::Accepted || self.is_closing() {
            return false;
        }
        info!(session_id = %self.session.id, "both parties offline before the session started");
        true
    }

    /// Re-check connectivity at the deadline. Returns `true` to terminate.
    fn on_deadline(&mut self) -> bool {
        self.session.disconnect_deadline = None;
        if !self.session.active || self.session.both_connected() {
            debug!(session_id = %self.session.id, "stale disconnect deadline ignored");
            return false;
        }
        true
    }

    async fn finalize(&mut self, reason: EndReason) -> SessionSummary {
        self.clock.stop();
        self.monitor.disarm();
        if let Some(guard) = &self.guard {
            guard.session().begin_closing();
        }
        self.session.end();

        let session_id = self.session.id.clone();
        if let Some(room) = &self.session.room {
            self.relay.close_room(room);
        }

        let record = FinalSessionRecord {
            session_id: session_id.clone(),
            total_seconds: self.session.connected_seconds,
            amount_charged_cents: self.session.amount_charged_cents,
        };
        if let Err(e) = self.records.finalize_session_record(&record).await {
            error!(session_id = %session_id, error = %e, "failed to persist final session record");
        }

        let payout = match self
            .settlement
            .settle(&session_id, &self.session.provider, self.session.amount_charged_cents)
            .await
        {
            Ok(payout) => payout.map(|p| p.amount_cents),
            Err(e) => {
                error!(session_id = %session_id, error = %e, "settlement failed");
                None
            }
        };

        // drop from live memory before telling anyone
        self.guard.take();

        let summary = self.session.summary(reason, payout);
        self.relay.deliver(
            &[self.session.requester.clone(), self.session.provider.clone()],
            ServerEvent::SessionEnded {
                session: session_id.clone(),
                reason,
            },
        );

        info!(
            session_id = %session_id,
            reason = reason.as_str(),
            total_seconds = summary.total_seconds,
            amount_charged = summary.amount_charged_cents,
            "session ended"
        );
        summary
    }
}
