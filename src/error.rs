use thiserror::Error;

use crate::event::Cents;
use crate::ids::{ParticipantId, SessionId, StreamId};

/// Failures reported by external collaborators (ledger, record store,
/// provider directory, payout gateway).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// The collaborator could not be reached or timed out.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The collaborator refused the operation.
    #[error("service rejected the request: {0}")]
    Rejected(String),
}

/// Outcomes of coordinator operations that did not succeed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BrokerError {
    #[error("no eligible provider '{0}'")]
    ProviderNotFound(ParticipantId),

    #[error("session '{0}' not found")]
    SessionNotFound(SessionId),

    #[error("broadcast '{0}' not found")]
    BroadcastNotFound(StreamId),

    /// The connection has not registered a participant yet.
    #[error("connection is not registered")]
    NotRegistered,

    /// The caller is not entitled to this transition.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("insufficient balance")]
    InsufficientFunds,

    #[error("invalid amount: {0}")]
    InvalidAmount(Cents),

    /// A duplicate end request for a session that is already finalizing or gone.
    #[error("session '{0}' already terminated")]
    AlreadyTerminated(SessionId),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl BrokerError {
    /// Stable machine-readable code sent to the caller.
    pub fn code(&self) -> &'static str {
        match self {
            BrokerError::ProviderNotFound(_) => "provider_not_found",
            BrokerError::SessionNotFound(_) | BrokerError::BroadcastNotFound(_) => "not_found",
            BrokerError::NotRegistered => "not_registered",
            BrokerError::Forbidden(_) => "forbidden",
            BrokerError::InsufficientFunds => "insufficient_balance",
            BrokerError::InvalidAmount(_) => "invalid_amount",
            BrokerError::AlreadyTerminated(_) => "already_terminated",
            BrokerError::Service(_) => "service_unavailable",
        }
    }
}

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{name} has an invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}
