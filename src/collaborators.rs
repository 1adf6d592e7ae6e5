//! Interfaces to the systems the coordinator delegates to.
//!
//! The coordinator never touches balances or durable records directly; it
//! calls these traits and treats their results as authoritative.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::event::Cents;
use crate::ids::{ParticipantId, RoomId, SessionId, StreamId};

/// Why a ledger entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerCause {
    TopUp,
    Session,
    Gift,
    Refund,
}

impl LedgerCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerCause::TopUp => "topup",
            LedgerCause::Session => "session",
            LedgerCause::Gift => "gift",
            LedgerCause::Refund => "refund",
        }
    }
}

/// Atomic balance mutations. Each call appends one immutable ledger entry.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Debit `amount` if the balance covers it. `Ok(false)` means
    /// insufficient funds and nothing was written.
    async fn debit(
        &self,
        user: &ParticipantId,
        amount: Cents,
        cause: LedgerCause,
    ) -> Result<bool, ServiceError>;

    async fn credit(
        &self,
        user: &ParticipantId,
        amount: Cents,
        cause: LedgerCause,
    ) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub id: ParticipantId,
    pub rate_cents: Cents,
}

/// Identity-side lookup of providers that can currently take sessions.
#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    async fn find_eligible_provider(
        &self,
        provider: &ParticipantId,
    ) -> Result<Option<ProviderProfile>, ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub requester_id: ParticipantId,
    pub provider_id: ParticipantId,
    pub rate_cents: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub session_id: SessionId,
    pub interval_index: u64,
    pub charged_cents: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    pub session_id: SessionId,
    pub sender: ParticipantId,
    pub text: String,
    pub at_ms: u64,
}

/// A zero-duration monetized record attributed to a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GiftRecord {
    pub stream_id: StreamId,
    pub provider_id: ParticipantId,
    pub payer_id: ParticipantId,
    pub amount_cents: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalSessionRecord {
    pub session_id: SessionId,
    pub total_seconds: u64,
    pub amount_charged_cents: Cents,
}

/// Durable storage of sessions, usage, transcripts and gifts.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_session_record(&self, record: &SessionRecord) -> Result<(), ServiceError>;

    async fn mark_session_accepted(
        &self,
        session: &SessionId,
        room: &RoomId,
        started_at_ms: u64,
    ) -> Result<(), ServiceError>;

    async fn append_usage_record(&self, record: &UsageRecord) -> Result<(), ServiceError>;

    async fn append_chat_record(&self, record: &ChatRecord) -> Result<(), ServiceError>;

    async fn append_gift_record(&self, record: &GiftRecord) -> Result<(), ServiceError>;

    /// Persist final totals and mark the session `ended`.
    async fn finalize_session_record(&self, record: &FinalSessionRecord)
    -> Result<(), ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    pub session_id: SessionId,
    pub provider_id: ParticipantId,
    pub amount_cents: Cents,
}

/// Moves the provider's share to their payout account.
#[async_trait]
pub trait PayoutGateway: Send + Sync {
    async fn settle_payout(&self, payout: &Payout) -> Result<(), ServiceError>;
}

/// Bundle of collaborator handles shared by the coordinators.
#[derive(Clone)]
pub struct Collaborators {
    pub ledger: Arc<dyn Ledger>,
    pub records: Arc<dyn RecordStore>,
    pub providers: Arc<dyn ProviderDirectory>,
    pub payouts: Arc<dyn PayoutGateway>,
}
