//! In-process collaborator implementations.
//!
//! Used by the `broker` binary for local runs and by tests to observe what
//! the coordinators persisted, debited and settled.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::collaborators::{
    ChatRecord, Collaborators, FinalSessionRecord, GiftRecord, Ledger, LedgerCause, Payout,
    PayoutGateway, ProviderDirectory, ProviderProfile, RecordStore, SessionRecord, UsageRecord,
};
use crate::error::ServiceError;
use crate::event::Cents;
use crate::ids::{ParticipantId, RoomId, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Credit,
    Debit,
    Refund,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub user: ParticipantId,
    pub kind: EntryKind,
    pub amount_cents: Cents,
    pub cause: LedgerCause,
}

/// Balances plus an append-only entry log.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    balances: DashMap<ParticipantId, Cents, ahash::RandomState>,
    entries: Mutex<Vec<LedgerEntry>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, user: impl Into<ParticipantId>, amount: Cents) {
        self.balances.insert(user.into(), amount);
    }

    pub fn balance(&self, user: &ParticipantId) -> Cents {
        self.balances.get(user).map(|b| *b).unwrap_or(0)
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.lock().clone()
    }

    fn append(&self, user: &ParticipantId, kind: EntryKind, amount: Cents, cause: LedgerCause) {
        self.entries.lock().push(LedgerEntry {
            user: user.clone(),
            kind,
            amount_cents: amount,
            cause,
        });
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn debit(
        &self,
        user: &ParticipantId,
        amount: Cents,
        cause: LedgerCause,
    ) -> Result<bool, ServiceError> {
        let debited = match self.balances.get_mut(user) {
            Some(mut balance) if *balance >= amount => {
                *balance -= amount;
                true
            }
            _ => false,
        };
        if debited {
            self.append(user, EntryKind::Debit, amount, cause);
        }
        Ok(debited)
    }

    async fn credit(
        &self,
        user: &ParticipantId,
        amount: Cents,
        cause: LedgerCause,
    ) -> Result<(), ServiceError> {
        *self.balances.entry(user.clone()).or_insert(0) += amount;
        let kind = match cause {
            LedgerCause::Refund => EntryKind::Refund,
            _ => EntryKind::Credit,
        };
        self.append(user, kind, amount, cause);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Requested,
    Accepted,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub record: SessionRecord,
    pub status: RecordStatus,
    pub room: Option<RoomId>,
    pub started_at_ms: Option<u64>,
    pub total_seconds: u64,
    pub amount_charged_cents: Cents,
}

/// Provider directory and record store in one table set.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    providers: DashMap<ParticipantId, ProviderProfile, ahash::RandomState>,
    sessions: DashMap<SessionId, StoredSession, ahash::RandomState>,
    usage: Mutex<Vec<UsageRecord>>,
    chats: Mutex<Vec<ChatRecord>>,
    gifts: Mutex<Vec<GiftRecord>>,
    finalizations: Mutex<Vec<FinalSessionRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_provider(&self, id: impl Into<ParticipantId>, rate_cents: Cents) {
        let id = id.into();
        self.providers.insert(
            id.clone(),
            ProviderProfile {
                id,
                rate_cents,
            },
        );
    }

    pub fn session(&self, id: &SessionId) -> Option<StoredSession> {
        self.sessions.get(id).map(|s| s.clone())
    }

    pub fn usage(&self) -> Vec<UsageRecord> {
        self.usage.lock().clone()
    }

    pub fn chats(&self) -> Vec<ChatRecord> {
        self.chats.lock().clone()
    }

    pub fn gifts(&self) -> Vec<GiftRecord> {
        self.gifts.lock().clone()
    }

    /// Every finalize call received, including any duplicates.
    pub fn finalizations(&self) -> Vec<FinalSessionRecord> {
        self.finalizations.lock().clone()
    }
}

#[async_trait]
impl ProviderDirectory for InMemoryRecordStore {
    async fn find_eligible_provider(
        &self,
        provider: &ParticipantId,
    ) -> Result<Option<ProviderProfile>, ServiceError> {
        Ok(self.providers.get(provider).map(|p| p.clone()))
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create_session_record(&self, record: &SessionRecord) -> Result<(), ServiceError> {
        self.sessions.insert(
            record.session_id.clone(),
            StoredSession {
                record: record.clone(),
                status: RecordStatus::Requested,
                room: None,
                started_at_ms: None,
                total_seconds: 0,
                amount_charged_cents: 0,
            },
        );
        Ok(())
    }

    async fn mark_session_accepted(
        &self,
        session: &SessionId,
        room: &RoomId,
        started_at_ms: u64,
    ) -> Result<(), ServiceError> {
        let mut stored = self
            .sessions
            .get_mut(session)
            .ok_or_else(|| ServiceError::Rejected(format!("unknown session '{session}'")))?;
        stored.status = RecordStatus::Accepted;
        stored.room = Some(room.clone());
        stored.started_at_ms = Some(started_at_ms);
        Ok(())
    }

    async fn append_usage_record(&self, record: &UsageRecord) -> Result<(), ServiceError> {
        self.usage.lock().push(record.clone());
        Ok(())
    }

    async fn append_chat_record(&self, record: &ChatRecord) -> Result<(), ServiceError> {
        self.chats.lock().push(record.clone());
        Ok(())
    }

    async fn append_gift_record(&self, record: &GiftRecord) -> Result<(), ServiceError> {
        self.gifts.lock().push(record.clone());
        Ok(())
    }

    async fn finalize_session_record(
        &self,
        record: &FinalSessionRecord,
    ) -> Result<(), ServiceError> {
        self.finalizations.lock().push(record.clone());
        if let Some(mut stored) = self.sessions.get_mut(&record.session_id) {
            stored.status = RecordStatus::Ended;
            stored.total_seconds = record.total_seconds;
            stored.amount_charged_cents = record.amount_charged_cents;
        }
        Ok(())
    }
}

/// Records payout requests instead of moving money.
#[derive(Debug, Default)]
pub struct RecordingPayouts {
    payouts: Mutex<Vec<Payout>>,
}

impl RecordingPayouts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payouts(&self) -> Vec<Payout> {
        self.payouts.lock().clone()
    }
}

#[async_trait]
impl PayoutGateway for RecordingPayouts {
    async fn settle_payout(&self, payout: &Payout) -> Result<(), ServiceError> {
        self.payouts.lock().push(payout.clone());
        Ok(())
    }
}

/// The full in-memory collaborator set, with typed handles kept for inspection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    pub ledger: Arc<InMemoryLedger>,
    pub records: Arc<InMemoryRecordStore>,
    pub payouts: Arc<RecordingPayouts>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            ledger: self.ledger.clone(),
            records: self.records.clone(),
            providers: self.records.clone(),
            payouts: self.payouts.clone(),
        }
    }
}
